//! Storage collaborators consumed by the scheduler. The scheduler never
//! assumes in-process storage; any backend honoring these contracts works.

use anyhow::Result;
use uuid::Uuid;

use alcove_types::models::{Digest, DigestUserConfig};

/// Per-user digest settings, keyed by user id.
pub trait SettingsStore: Send + Sync {
    fn get(&self, user_id: Uuid) -> Result<Option<DigestUserConfig>>;

    /// Insert or update a user's settings. An existing notification token is
    /// preserved when `config.notification_token` is `None` — token
    /// registration is a separate flow.
    fn upsert(&self, config: &DigestUserConfig) -> Result<()>;

    /// Record a delivery address for a user, creating a disabled settings
    /// stub when the user has none yet.
    fn set_notification_token(&self, user_id: Uuid, token: &str) -> Result<()>;

    /// All users with `enabled = true` and a non-empty notification token.
    /// Everyone else is invisible to the scheduler — not an error.
    fn list_enabled_with_token(&self) -> Result<Vec<DigestUserConfig>>;
}

/// Append-only digest history with a per-user reverse-chronological index.
pub trait DigestHistoryStore: Send + Sync {
    fn insert(&self, digest: &Digest) -> Result<()>;

    fn get(&self, id: Uuid) -> Result<Option<Digest>>;

    /// Newest first.
    fn list_for_user(&self, user_id: Uuid, limit: u32) -> Result<Vec<Digest>>;

    /// One-way false→true flip; `read_at` is set on the first transition and
    /// never changes afterwards. Returns the digest as stored, or `None` if
    /// it does not exist.
    fn mark_read(&self, id: Uuid) -> Result<Option<Digest>>;

    /// Explicit deletion. Returns whether a digest was removed.
    fn delete(&self, id: Uuid) -> Result<bool>;
}
