//! Database row types. Channels map straight onto the wire `Channel`; the
//! rest stay distinct from the `parley-types` models so the password hash and
//! raw storage shapes never leak past this crate by accident.

use chrono::{DateTime, Utc};

use parley_types::models::{ServerSummary, UserProfile};
use parley_types::{CategoryId, ChannelId, MessageId, ServerId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub session_id: String,
    pub user_id: UserId,
    pub timezone: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub about: String,
    pub avatar: String,
    pub banner: String,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            username: row.username,
            display_name: row.display_name,
            about: row.about,
            avatar: row.avatar,
            banner: row.banner,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerRow {
    pub server_id: ServerId,
    pub name: String,
    pub description: String,
    pub banner: String,
    pub owner: UserId,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<ServerRow> for ServerSummary {
    fn from(row: ServerRow) -> Self {
        Self {
            server_id: row.server_id,
            name: row.name,
            description: row.description,
            banner: row.banner,
            owner: row.owner,
            status: row.status,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRow {
    pub server_id: ServerId,
    pub category_id: CategoryId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub server_id: Option<ServerId>,
    pub sender_id: UserId,
    pub content: String,
    pub mentions: Vec<UserId>,
    pub mentions_roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStateRow {
    pub user_id: UserId,
    pub server_id: ServerId,
    pub last_channel_id: ChannelId,
}
