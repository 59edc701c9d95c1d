use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::DeliveryTime;

/// Upper bound on the number of topics a digest subscription may select.
pub const MAX_DIGEST_TOPICS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted chat message. Immutable once created; the realtime layer only
/// ever observes the live tail of inserts, never the full history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One connected subscriber of a room, as seen by everyone in that room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub username: String,
    pub connected_at: DateTime<Utc>,
}

/// A web source cited by a generated digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestSource {
    pub title: String,
    pub url: String,
}

/// A generated news digest, persisted to history once per successful
/// generation. Immutable apart from the one-way `read` flip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
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

/// Per-user digest delivery configuration. Mutated only through the settings
/// endpoints; the scheduler works from a read-only snapshot taken each tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestUserConfig {
    pub user_id: Uuid,
    pub delivery_time_utc: DeliveryTime,
    pub topics: Vec<String>,
    pub custom_prompt: Option<String>,
    pub enabled: bool,
    pub notification_token: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DigestUserConfig {
    /// True when the scheduler may deliver to this user at all: enabled and
    /// reachable through a notification token.
    pub fn deliverable(&self) -> bool {
        self.enabled
            && self
                .notification_token
                .as_deref()
                .is_some_and(|t| !t.is_empty())
    }
}
