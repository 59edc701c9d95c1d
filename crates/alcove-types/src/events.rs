use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::PresenceEntry;

/// Events delivered to room subscribers over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RoomEvent {
    /// Server confirms the subscription is live
    Ready {
        room_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    /// A new message was persisted in this room
    MessageCreate {
        id: Uuid,
        room_id: Uuid,
        sender_id: Uuid,
        sender_username: String,
        content: String,
        created_at: DateTime<Utc>,
    },

    /// A user started or stopped typing. `is_typing = false` may be
    /// synthesized by the server when a typing entry expires without an
    /// explicit stop signal.
    TypingUpdate {
        user_id: Uuid,
        username: String,
        is_typing: bool,
    },

    /// The full current presence set for the room. Sent on every join,
    /// leave, or reconnection — full sets rather than deltas, so a dropped
    /// event can never leave peers permanently diverged.
    PresenceSync { members: Vec<PresenceEntry> },
}

/// Commands sent FROM client TO server over the room WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RoomCommand {
    /// Indicate typing state. Clients send `true` on keystrokes and `false`
    /// when input goes idle; the server expires stale entries regardless.
    Typing { is_typing: bool },
}
