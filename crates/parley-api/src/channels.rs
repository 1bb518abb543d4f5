use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use parley_db::{Saga, Store, StoreExt, statements};
use parley_gateway::topology::load_server_infos;
use parley_types::api::{CreateChannelRequest, CreateChannelResponse, DeleteChannelRequest};
use parley_types::events::{ServerMessage, ServerPayload};
use parley_types::models::{Channel, ChannelStatus, ServerInfos};
use parley_types::{ChannelId, ServerId, UserId};

use crate::middleware::AuthUser;
use crate::{ApiError, AppState, blocking};

/// Access kind granted to whoever creates a private channel.
const CREATOR_ACCESS: &str = "owner";

/// Adds a channel under an existing category. Public channels subscribe every
/// member and are announced to all of them; private ones subscribe and are
/// announced to their creator only.
pub fn create_channel<S: Store>(
    store: &S,
    user_id: UserId,
    req: &CreateChannelRequest,
) -> Result<(Channel, Vec<UserId>), ApiError> {
    let spec = &req.channel;
    let server = store
        .find_server(spec.server_id)?
        .ok_or(ApiError::NotFound("server"))?;
    if server.owner != user_id {
        return Err(ApiError::Forbidden);
    }

    let name = spec.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("channel name must not be empty".into()));
    }
    let category = store
        .server_categories(spec.server_id)?
        .into_iter()
        .find(|c| c.category_id == spec.parent_id)
        .ok_or(ApiError::NotFound("category"))?;
    if req.category != category.name || spec.category != category.name {
        return Err(ApiError::BadRequest(format!(
            "category '{}' does not match its parent '{}'",
            req.category, category.name
        )));
    }

    let channel = Channel {
        server_id: spec.server_id,
        channel_id: ChannelId::new(),
        category: category.name,
        name: name.to_string(),
        parent_id: spec.parent_id,
        parent_position: spec.parent_position,
        position: spec.position,
        status: spec.status,
        kind: spec.kind,
    };
    let members = store.server_members(spec.server_id)?;
    let subscribers = match channel.status {
        ChannelStatus::Public => members.clone(),
        ChannelStatus::Private => vec![user_id],
    };

    let mut saga = Saga::new(store, "create_channel");
    saga.step(
        "insert channel",
        statements::insert_channel(&channel),
        Some(statements::delete_channel(channel.server_id, channel.channel_id)),
    )?;
    if channel.status == ChannelStatus::Private {
        saga.step(
            "grant creator access",
            statements::insert_channel_access(channel.channel_id, user_id, CREATOR_ACCESS),
            Some(statements::delete_channel_access(channel.channel_id)),
        )?;
    }
    for subscriber in &subscribers {
        saga.step(
            "subscribe channel",
            statements::insert_channel_user(channel.channel_id, *subscriber),
            Some(statements::delete_channel_user(channel.channel_id, *subscriber)),
        )?;
    }
    saga.complete();

    info!("{} created channel {} in server {}", user_id, channel.channel_id, channel.server_id);
    let recipients = audience(&channel, members, &[user_id]);
    Ok((channel, recipients))
}

/// Removes a channel along with its subscriptions, grants and messages.
/// Returns the channel as it was and who to tell: every member for a public
/// channel, the members holding access for a private one.
pub fn delete_channel<S: Store>(
    store: &S,
    user_id: UserId,
    server_id: ServerId,
    channel_id: ChannelId,
) -> Result<(Channel, Vec<UserId>), ApiError> {
    let server = store.find_server(server_id)?.ok_or(ApiError::NotFound("server"))?;
    if server.owner != user_id {
        return Err(ApiError::Forbidden);
    }
    let channel = store
        .find_channel(server_id, channel_id)?
        .ok_or(ApiError::NotFound("channel"))?;

    let subscribers = store.channel_members(channel_id)?;
    let grants = store.channel_access(channel_id)?;
    let holders: Vec<UserId> = grants.iter().map(|(u, _)| *u).collect();
    let recipients = audience(&channel, store.server_members(server_id)?, &holders);

    let mut saga = Saga::new(store, "delete_channel");
    saga.step(
        "delete channel",
        statements::delete_channel(server_id, channel_id),
        Some(statements::insert_channel(&channel)),
    )?;
    saga.step_with(
        "unsubscribe channel",
        statements::delete_channel_users(channel_id),
        subscribers.iter().map(|u| statements::insert_channel_user(channel_id, *u)),
    )?;
    saga.step_with(
        "revoke channel access",
        statements::delete_channel_access(channel_id),
        grants
            .iter()
            .map(|(u, kind)| statements::insert_channel_access(channel_id, *u, kind)),
    )?;
    saga.step("delete messages", statements::delete_channel_messages(channel_id), None)?;
    saga.complete();

    info!("{} deleted channel {} in server {}", user_id, channel_id, server_id);
    Ok((channel, recipients))
}

/// Narrows a membership snapshot to the members allowed to see `channel`.
fn audience(channel: &Channel, members: Vec<UserId>, holders: &[UserId]) -> Vec<UserId> {
    match channel.status {
        ChannelStatus::Public => members,
        ChannelStatus::Private => members.into_iter().filter(|m| holders.contains(m)).collect(),
    }
}

pub fn server_topology<S: Store>(
    store: &S,
    user_id: UserId,
    server_id: ServerId,
) -> Result<ServerInfos, ApiError> {
    if store.find_server(server_id)?.is_none() {
        return Err(ApiError::NotFound("server"));
    }
    load_server_infos(store, server_id, user_id)?.ok_or(ApiError::Forbidden)
}

// -- Handlers --

pub async fn create(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let (channel, recipients) = blocking(move || create_channel(&*db, user_id, &req)).await?;
    let channel_id = channel.channel_id;

    state.broadcaster.broadcast(
        recipients,
        &ServerMessage::new(ServerPayload::NewChannel {
            category: channel.category.clone(),
            channel,
        }),
    );
    Ok((StatusCode::CREATED, Json(CreateChannelResponse { channel_id })))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<DeleteChannelRequest>,
) -> Result<StatusCode, ApiError> {
    let db = state.db.clone();
    let (channel, recipients) =
        blocking(move || delete_channel(&*db, user_id, req.server_id, req.channel_id)).await?;

    state.broadcaster.broadcast(
        recipients,
        &ServerMessage::new(ServerPayload::ChannelDeletion {
            channel_id: channel.channel_id,
            category: channel.category,
        }),
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn topology(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(server_id): Path<ServerId>,
) -> Result<Json<ServerInfos>, ApiError> {
    let db = state.db.clone();
    Ok(Json(blocking(move || server_topology(&*db, user_id, server_id)).await?))
}
