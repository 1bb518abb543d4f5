//! Every write the service performs, as a query string plus arguments.
//!
//! Writes are plain values so a [`crate::Saga`] can record the statement that
//! undoes a step before or after running it.

use chrono::SecondsFormat;

use parley_types::models::Channel;
use parley_types::{CategoryId, ChannelId, InvitationId, ServerId, UserId};

use crate::models::{CategoryRow, MessageRow, ServerRow, ServerStateRow, SessionRow};
use crate::store::{Value, int, text};

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub query: &'static str,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(query: &'static str, args: Vec<Value>) -> Self {
        Self { query, args }
    }
}

// -- Users & sessions --

pub fn insert_user(id: UserId, email: &str, username: &str, password_hash: &str) -> Statement {
    Statement::new(
        "INSERT INTO users (id, email, username, password) VALUES (?1, ?2, ?3, ?4)",
        vec![text(id), text(email), text(username), text(password_hash)],
    )
}

pub fn insert_session(session: &SessionRow) -> Statement {
    Statement::new(
        "INSERT INTO sessions (session_id, user_id, timezone, user_agent) VALUES (?1, ?2, ?3, ?4)",
        vec![
            text(&session.session_id),
            text(session.user_id),
            text(&session.timezone),
            text(&session.user_agent),
        ],
    )
}

// -- Servers --

pub fn insert_server(server: &ServerRow) -> Statement {
    Statement::new(
        "INSERT INTO servers (server_id, name, description, banner, owner, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        vec![
            text(server.server_id),
            text(&server.name),
            text(&server.description),
            text(&server.banner),
            text(server.owner),
            text(&server.status),
            text(server.created_at.to_rfc3339()),
        ],
    )
}

pub fn delete_server(server_id: ServerId) -> Statement {
    Statement::new("DELETE FROM servers WHERE server_id = ?1", vec![text(server_id)])
}

pub fn insert_server_user(server_id: ServerId, user_id: UserId) -> Statement {
    Statement::new(
        "INSERT INTO server_users (server_id, user_id) VALUES (?1, ?2)",
        vec![text(server_id), text(user_id)],
    )
}

pub fn delete_server_user(server_id: ServerId, user_id: UserId) -> Statement {
    Statement::new(
        "DELETE FROM server_users WHERE server_id = ?1 AND user_id = ?2",
        vec![text(server_id), text(user_id)],
    )
}

pub fn delete_server_users(server_id: ServerId) -> Statement {
    Statement::new("DELETE FROM server_users WHERE server_id = ?1", vec![text(server_id)])
}

pub fn insert_user_server(user_id: UserId, server_id: ServerId) -> Statement {
    Statement::new(
        "INSERT INTO user_servers (user_id, server_id) VALUES (?1, ?2)",
        vec![text(user_id), text(server_id)],
    )
}

pub fn delete_user_server(user_id: UserId, server_id: ServerId) -> Statement {
    Statement::new(
        "DELETE FROM user_servers WHERE user_id = ?1 AND server_id = ?2",
        vec![text(user_id), text(server_id)],
    )
}

pub fn insert_server_state(state: &ServerStateRow) -> Statement {
    Statement::new(
        "INSERT INTO user_server_state (user_id, server_id, last_channel_id) VALUES (?1, ?2, ?3)",
        vec![
            text(state.user_id),
            text(state.server_id),
            text(state.last_channel_id),
        ],
    )
}

pub fn update_server_state(user_id: UserId, server_id: ServerId, channel_id: ChannelId) -> Statement {
    Statement::new(
        "UPDATE user_server_state SET last_channel_id = ?1 WHERE user_id = ?2 AND server_id = ?3",
        vec![text(channel_id), text(user_id), text(server_id)],
    )
}

pub fn delete_server_state(user_id: UserId, server_id: ServerId) -> Statement {
    Statement::new(
        "DELETE FROM user_server_state WHERE user_id = ?1 AND server_id = ?2",
        vec![text(user_id), text(server_id)],
    )
}

pub fn insert_invitation(id: InvitationId, server_id: ServerId, created_by: UserId) -> Statement {
    Statement::new(
        "INSERT INTO invitations (id, server_id, created_by) VALUES (?1, ?2, ?3)",
        vec![text(id), text(server_id), text(created_by)],
    )
}

pub fn delete_invitations(server_id: ServerId) -> Statement {
    Statement::new("DELETE FROM invitations WHERE server_id = ?1", vec![text(server_id)])
}

// -- Categories & channels --

pub fn insert_category(category: &CategoryRow) -> Statement {
    Statement::new(
        "INSERT INTO categories (server_id, category_id, name) VALUES (?1, ?2, ?3)",
        vec![
            text(category.server_id),
            text(category.category_id),
            text(&category.name),
        ],
    )
}

pub fn delete_category(server_id: ServerId, category_id: CategoryId) -> Statement {
    Statement::new(
        "DELETE FROM categories WHERE server_id = ?1 AND category_id = ?2",
        vec![text(server_id), text(category_id)],
    )
}

pub fn delete_categories(server_id: ServerId) -> Statement {
    Statement::new("DELETE FROM categories WHERE server_id = ?1", vec![text(server_id)])
}

pub fn insert_channel(channel: &Channel) -> Statement {
    Statement::new(
        "INSERT INTO channels (server_id, channel_id, category, name, parent_id, parent_position, position, status, type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        vec![
            text(channel.server_id),
            text(channel.channel_id),
            text(&channel.category),
            text(&channel.name),
            text(channel.parent_id),
            int(channel.parent_position),
            int(channel.position),
            text(channel.status.as_str()),
            text(channel.kind.as_str()),
        ],
    )
}

pub fn delete_channel(server_id: ServerId, channel_id: ChannelId) -> Statement {
    Statement::new(
        "DELETE FROM channels WHERE server_id = ?1 AND channel_id = ?2",
        vec![text(server_id), text(channel_id)],
    )
}

pub fn delete_channels(server_id: ServerId) -> Statement {
    Statement::new("DELETE FROM channels WHERE server_id = ?1", vec![text(server_id)])
}

pub fn insert_channel_user(channel_id: ChannelId, user_id: UserId) -> Statement {
    Statement::new(
        "INSERT INTO channel_users (channel_id, user_id) VALUES (?1, ?2)",
        vec![text(channel_id), text(user_id)],
    )
}

pub fn delete_channel_user(channel_id: ChannelId, user_id: UserId) -> Statement {
    Statement::new(
        "DELETE FROM channel_users WHERE channel_id = ?1 AND user_id = ?2",
        vec![text(channel_id), text(user_id)],
    )
}

pub fn delete_channel_users(channel_id: ChannelId) -> Statement {
    Statement::new("DELETE FROM channel_users WHERE channel_id = ?1", vec![text(channel_id)])
}

pub fn insert_channel_access(channel_id: ChannelId, user_id: UserId, kind: &str) -> Statement {
    Statement::new(
        "INSERT INTO channel_access (channel_id, user_id, kind) VALUES (?1, ?2, ?3)",
        vec![text(channel_id), text(user_id), text(kind)],
    )
}

pub fn delete_channel_access(channel_id: ChannelId) -> Statement {
    Statement::new("DELETE FROM channel_access WHERE channel_id = ?1", vec![text(channel_id)])
}

// -- Messages --

pub fn insert_message(message: &MessageRow) -> Statement {
    let mentions: Vec<String> = message.mentions.iter().map(ToString::to_string).collect();
    Statement::new(
        "INSERT INTO messages (message_id, channel_id, server_id, sender_id, content, mentions, mentions_roles, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        vec![
            text(message.message_id),
            text(message.channel_id),
            message.server_id.map(text).unwrap_or(Value::Null),
            text(message.sender_id),
            text(&message.content),
            text(serde_json::Value::from(mentions)),
            text(serde_json::Value::from(message.mentions_roles.clone())),
            // Fixed width, so ORDER BY created_at is chronological.
            text(message.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        ],
    )
}

pub fn delete_channel_messages(channel_id: ChannelId) -> Statement {
    Statement::new("DELETE FROM messages WHERE channel_id = ?1", vec![text(channel_id)])
}
