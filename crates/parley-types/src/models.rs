use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CategoryId, ChannelId, MessageId, ServerId, UserId};

/// Public profile of a user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub about: String,
    pub avatar: String,
    pub banner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub server_id: ServerId,
    pub name: String,
    pub description: String,
    pub banner: String,
    pub owner: UserId,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Public,
    Private,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Textual,
    Vocal,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Textual => "textual",
            Self::Vocal => "vocal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "textual" => Some(Self::Textual),
            "vocal" => Some(Self::Vocal),
            _ => None,
        }
    }
}

/// One channel row. `category` is the category *name*; grouping is by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub category: String,
    pub name: String,
    pub parent_id: CategoryId,
    pub parent_position: i32,
    pub position: i32,
    pub status: ChannelStatus,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
}

/// A named group of channels, in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub channels: Vec<Channel>,
}

/// Categorized topology of one server as seen by one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfos {
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub server_id: Option<ServerId>,
    pub content: String,
    pub mentions: Vec<UserId>,
    pub mentions_roles: Vec<String>,
    pub sender: UserProfile,
    pub created_at: DateTime<Utc>,
}
