use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Digest, DigestSource, DigestUserConfig};

// -- JWT Claims --

/// JWT claims shared between the REST middleware and the room gateway's
/// upgrade authentication. Canonical definition lives here in alcove-types
/// to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// -- Digest settings --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveDigestSettingsRequest {
    /// HH:MM, already converted to UTC by the client.
    pub delivery_time_utc: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct DigestSettingsResponse {
    pub user_id: Uuid,
    pub delivery_time_utc: String,
    pub topics: Vec<String>,
    pub custom_prompt: Option<String>,
    pub enabled: bool,
    pub has_notification_token: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<DigestUserConfig> for DigestSettingsResponse {
    fn from(config: DigestUserConfig) -> Self {
        Self {
            user_id: config.user_id,
            delivery_time_utc: config.delivery_time_utc.to_string(),
            topics: config.topics,
            custom_prompt: config.custom_prompt,
            enabled: config.enabled,
            has_notification_token: config
                .notification_token
                .is_some_and(|t| !t.is_empty()),
            updated_at: config.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterPushTokenRequest {
    pub token: String,
}

// -- Digest history --

#[derive(Debug, Serialize)]
pub struct DigestResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub sources: Vec<DigestSource>,
    pub topics: Vec<String>,
    pub custom_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

impl From<Digest> for DigestResponse {
    fn from(digest: Digest) -> Self {
        Self {
            id: digest.id,
            user_id: digest.user_id,
            content: digest.content,
            sources: digest.sources,
            topics: digest.topics,
            custom_prompt: digest.custom_prompt,
            created_at: digest.created_at,
            read: digest.read,
            read_at: digest.read_at,
        }
    }
}

// -- Digest testing --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestDigestRequest {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    /// When true the generated digest is saved to the caller's history
    /// (no notification is ever sent from this endpoint).
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Serialize)]
pub struct TestDigestResponse {
    pub content: String,
    pub sources: Vec<DigestSource>,
    pub digest_id: Option<Uuid>,
}
