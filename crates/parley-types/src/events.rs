use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, MessageId, ServerId, UserId};
use crate::models::{Channel, ServerInfos, ServerSummary, UserProfile};

/// Envelope pushed to clients as a binary frame.
///
/// `kind` is always derived from `payload`, so a consumer that does not decode
/// the payload can still route on the string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: ServerPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerPayload {
    /// A message was posted in a channel or a direct conversation
    UserMessage {
        id: MessageId,
        content: String,
        mentions: Vec<UserId>,
        mentions_roles: Vec<String>,
        channel_id: ChannelId,
        created_at: DateTime<Utc>,
        sender: UserProfile,
    },

    /// The server no longer exists
    ServerDeletion { id: ServerId },

    /// A member left the server
    ServerLeave { user_id: UserId, server_id: ServerId },

    /// A channel was added to a category
    NewChannel { category: String, channel: Channel },

    /// A channel was removed from a category
    ChannelDeletion { channel_id: ChannelId, category: String },

    /// A user joined the server through an invitation
    ServerJoin { user_id: UserId, server: ServerSummary },

    /// Topology requested with `change_server`
    ChangeServer { server: ServerInfos },

    /// Answer to `initial`
    InitialLoad {
        user: UserProfile,
        servers: Vec<ServerSummary>,
        server: Option<ServerInfos>,
    },
}

impl ServerPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "message",
            Self::ServerDeletion { .. } => "server_deletion",
            Self::ServerLeave { .. } => "user_leaving",
            Self::NewChannel { .. } => "channel_creation",
            Self::ChannelDeletion { .. } => "channel_deletion",
            Self::ServerJoin { .. } => "server_join",
            Self::ChangeServer { .. } => "change_server",
            Self::InitialLoad { .. } => "initial",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to encode {kind} envelope: {source}")]
    Encode {
        kind: String,
        #[source]
        source: bincode::Error,
    },
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] bincode::Error),
}

impl ServerMessage {
    pub fn new(payload: ServerPayload) -> Self {
        Self {
            kind: payload.kind().to_string(),
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::serialize(self).map_err(|source| EncodeError::Encode {
            kind: self.kind.clone(),
            source,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EncodeError> {
        bincode::deserialize(bytes).map_err(EncodeError::Decode)
    }
}

impl From<ServerPayload> for ServerMessage {
    fn from(payload: ServerPayload) -> Self {
        Self::new(payload)
    }
}

/// Text frames sent FROM client TO server over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Ask for the profile and server list; `pos` is `"me"` or a server id
    Initial { pos: String },

    /// Ask for the topology of another server
    ChangeServer { server_id: ServerId },
}

/// Where the client currently is when it asks for its initial load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialPosition {
    Home,
    Server(ServerId),
}

impl FromStr for InitialPosition {
    type Err = uuid::Error;

    fn from_str(pos: &str) -> Result<Self, Self::Err> {
        if pos == "me" {
            Ok(Self::Home)
        } else {
            pos.parse().map(Self::Server)
        }
    }
}
