use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use parley_db::models::MessageRow;
use parley_db::{Store, StoreExt, statements};
use parley_types::api::SendMessageRequest;
use parley_types::events::{ServerMessage, ServerPayload};
use parley_types::models::{ChatMessage, UserProfile};
use parley_types::{ChannelId, MessageId, ServerId, UserId};

use crate::middleware::AuthUser;
use crate::{ApiError, AppState, blocking};

const MAX_CONTENT_LEN: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// A stored message and the users it should be pushed to.
#[derive(Debug)]
pub struct Posted {
    pub message: ChatMessage,
    pub recipients: Vec<UserId>,
}

fn store_message<S: Store>(
    store: &S,
    sender_id: UserId,
    channel_id: ChannelId,
    server_id: Option<ServerId>,
    req: &SendMessageRequest,
) -> Result<ChatMessage, ApiError> {
    let content = req.content.trim();
    if content.is_empty() || content.len() > MAX_CONTENT_LEN {
        return Err(ApiError::BadRequest(format!(
            "message must be 1 to {MAX_CONTENT_LEN} bytes"
        )));
    }

    let sender: UserProfile = store
        .find_user(sender_id)?
        .ok_or(ApiError::Unauthenticated)?
        .into();

    let row = MessageRow {
        message_id: MessageId::new(),
        channel_id,
        server_id,
        sender_id,
        content: content.to_string(),
        mentions: req.mentions.clone(),
        mentions_roles: req.mentions_roles.clone(),
        created_at: Utc::now(),
    };
    store.run(&statements::insert_message(&row))?;

    Ok(ChatMessage {
        id: row.message_id,
        channel_id: row.channel_id,
        server_id: row.server_id,
        content: row.content,
        mentions: row.mentions,
        mentions_roles: row.mentions_roles,
        sender,
        created_at: row.created_at,
    })
}

/// Posts into a server channel. Recipients are the channel's subscribers.
pub fn post_message<S: Store>(
    store: &S,
    sender_id: UserId,
    server_id: ServerId,
    channel_id: ChannelId,
    req: &SendMessageRequest,
) -> Result<Posted, ApiError> {
    if store.find_channel(server_id, channel_id)?.is_none() {
        return Err(ApiError::NotFound("channel"));
    }
    let recipients = store.channel_members(channel_id)?;
    if !recipients.contains(&sender_id) {
        return Err(ApiError::Forbidden);
    }

    let message = store_message(store, sender_id, channel_id, Some(server_id), req)?;
    Ok(Posted { message, recipients })
}

/// Posts into a direct conversation. Recipients are its participants, the
/// sender included.
pub fn post_direct_message<S: Store>(
    store: &S,
    sender_id: UserId,
    channel_id: ChannelId,
    req: &SendMessageRequest,
) -> Result<Posted, ApiError> {
    let mut recipients = store.channel_members(channel_id)?;
    if recipients.is_empty() {
        return Err(ApiError::NotFound("conversation"));
    }
    if !recipients.contains(&sender_id) {
        return Err(ApiError::Forbidden);
    }
    recipients.push(sender_id);

    let message = store_message(store, sender_id, channel_id, None, req)?;
    Ok(Posted { message, recipients })
}

/// Newest first. Only subscribers of the channel may read it.
pub fn list_messages<S: Store>(
    store: &S,
    user_id: UserId,
    channel_id: ChannelId,
    limit: u32,
) -> Result<Vec<ChatMessage>, ApiError> {
    if !store.channel_members(channel_id)?.contains(&user_id) {
        return Err(ApiError::Forbidden);
    }

    let rows = store.channel_messages(channel_id, limit.min(200))?;

    let mut senders: HashMap<UserId, Option<UserProfile>> = HashMap::new();
    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        if !senders.contains_key(&row.sender_id) {
            let profile = store.find_user(row.sender_id)?.map(UserProfile::from);
            senders.insert(row.sender_id, profile);
        }
        let Some(Some(sender)) = senders.get(&row.sender_id) else {
            warn!("Message {} has unknown sender {}, skipping", row.message_id, row.sender_id);
            continue;
        };

        messages.push(ChatMessage {
            id: row.message_id,
            channel_id: row.channel_id,
            server_id: row.server_id,
            content: row.content,
            mentions: row.mentions,
            mentions_roles: row.mentions_roles,
            sender: sender.clone(),
            created_at: row.created_at,
        });
    }

    debug!("{} read {} message(s) from {}", user_id, messages.len(), channel_id);
    Ok(messages)
}

fn push(state: &AppState, posted: &Posted) {
    let m = &posted.message;
    state.broadcaster.broadcast(
        posted.recipients.iter().copied(),
        &ServerMessage::new(ServerPayload::UserMessage {
            id: m.id,
            content: m.content.clone(),
            mentions: m.mentions.clone(),
            mentions_roles: m.mentions_roles.clone(),
            channel_id: m.channel_id,
            created_at: m.created_at,
            sender: m.sender.clone(),
        }),
    );
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path((server_id, channel_id)): Path<(ServerId, ChannelId)>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let posted =
        blocking(move || post_message(&*db, user_id, server_id, channel_id, &req)).await?;

    push(&state, &posted);
    Ok((StatusCode::CREATED, Json(posted.message)))
}

pub async fn send_direct_message(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(channel_id): Path<ChannelId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let posted = blocking(move || post_direct_message(&*db, user_id, channel_id, &req)).await?;

    push(&state, &posted);
    Ok((StatusCode::CREATED, Json(posted.message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(channel_id): Path<ChannelId>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let db = state.db.clone();
    let messages = blocking(move || list_messages(&*db, user_id, channel_id, query.limit)).await?;
    Ok(Json(messages))
}
