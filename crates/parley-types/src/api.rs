use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, InvitationId, ServerId, UserId};
use crate::models::{ChannelKind, ChannelStatus};

// -- Session token --

/// Claims carried by the `session` cookie. Shared by the REST middleware and
/// the socket admission step; every field must match the stored session row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub session_id: String,
    pub user_id: UserId,
    pub timezone: String,
    pub user_agent: String,
    pub exp: usize,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

// -- Servers --

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_server_status")]
    pub status: String,
}

fn default_server_status() -> String {
    "public".to_string()
}

#[derive(Debug, Serialize)]
pub struct CreateServerResponse {
    pub server_id: ServerId,
}

#[derive(Debug, Deserialize)]
pub struct ServerRef {
    pub server_id: ServerId,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct InvitationRef {
    pub invitation_id: InvitationId,
}

/// Last visited channel per server, keyed by server id.
pub type ServerState = HashMap<ServerId, ChannelId>;

// -- Channels --

#[derive(Debug, Deserialize)]
pub struct NewChannelSpec {
    pub server_id: ServerId,
    pub category: String,
    pub name: String,
    pub parent_id: crate::ids::CategoryId,
    #[serde(default)]
    pub parent_position: i32,
    #[serde(default)]
    pub position: i32,
    pub status: ChannelStatus,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub category: String,
    pub channel: NewChannelSpec,
}

#[derive(Debug, Serialize)]
pub struct CreateChannelResponse {
    pub channel_id: ChannelId,
}

#[derive(Debug, Deserialize)]
pub struct DeleteChannelRequest {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub category: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<UserId>,
    #[serde(default)]
    pub mentions_roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
