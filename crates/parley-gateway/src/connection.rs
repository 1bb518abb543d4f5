use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use parley_db::Database;
use parley_types::UserId;
use parley_types::events::{ClientCommand, InitialPosition, ServerMessage, ServerPayload};

use crate::registry::{ConnectionHandle, ConnectionRegistry, SendFailure};
use crate::topology::{load_initial, load_server_infos};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Runs one admitted socket until it closes, errors, or is superseded by a
/// newer connection of the same user. The user is unregistered on every exit
/// path by the registration guard.
pub async fn handle_connection(
    socket: WebSocket,
    db: Arc<Database>,
    registry: ConnectionRegistry,
    user_id: UserId,
) {
    let (mut sender, mut receiver) = socket.split();

    let (handle, mut outbound_rx) = ConnectionHandle::channel();
    let own = handle.clone();
    let mut superseded = handle.superseded();
    let registration = registry.admit(user_id, handle);
    info!("{} connected (connection {})", user_id, registration.connection_id());

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued frames -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                biased;
                _ = superseded.changed() => {
                    info!("{} superseded by a newer connection", user_id);
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(frame) => {
                            if sender.send(Message::Binary(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("{} heartbeat timeout (missed {} pongs), dropping connection", user_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(text.as_str()) {
                    Ok(cmd) => handle_command(&db, &own, user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.as_str().chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Binary(data) => {
                    warn!("{} sent an unexpected binary frame ({} bytes)", user_id, data.len());
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    drop(registration);
    info!("{} disconnected", user_id);
}

async fn handle_command(
    db: &Arc<Database>,
    own: &ConnectionHandle,
    user_id: UserId,
    cmd: ClientCommand,
) {
    let payload = match cmd {
        ClientCommand::Initial { pos } => {
            let position = match pos.parse::<InitialPosition>() {
                Ok(position) => position,
                Err(e) => {
                    warn!("{} sent initial with bad position '{}': {}", user_id, pos, e);
                    return;
                }
            };
            debug!("{} initial load ({:?})", user_id, position);

            let db = db.clone();
            let loaded = tokio::task::spawn_blocking(move || load_initial(&*db, user_id, position)).await;
            match loaded {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) => {
                    error!("{} initial load failed: {:#}", user_id, e);
                    return;
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    return;
                }
            }
        }

        ClientCommand::ChangeServer { server_id } => {
            debug!("{} changing to server {}", user_id, server_id);

            let db = db.clone();
            let loaded =
                tokio::task::spawn_blocking(move || load_server_infos(&*db, server_id, user_id)).await;
            match loaded {
                Ok(Ok(Some(server))) => ServerPayload::ChangeServer { server },
                Ok(Ok(None)) => {
                    warn!("{} asked for server {} without being a member", user_id, server_id);
                    return;
                }
                Ok(Err(e)) => {
                    error!("{} topology load for server {} failed: {:#}", user_id, server_id, e);
                    return;
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    return;
                }
            }
        }
    };

    reply(own, user_id, ServerMessage::new(payload));
}

fn reply(own: &ConnectionHandle, user_id: UserId, message: ServerMessage) {
    let frame = match message.encode() {
        Ok(frame) => Bytes::from(frame),
        Err(e) => {
            error!("{} reply skipped: {}", user_id, e);
            return;
        }
    };

    match own.try_send(frame) {
        Ok(()) => {}
        Err(SendFailure::Full) => warn!("{} queue full, dropped {} reply", user_id, message.kind),
        Err(SendFailure::Closed) => debug!("{} closed before {} reply", user_id, message.kind),
    }
}
