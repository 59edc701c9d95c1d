//! rusqlite-backed implementations of the digest storage collaborators.
//! Topics and sources are stored as JSON text columns; timestamps as RFC 3339.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use uuid::Uuid;

use alcove_digest::store::{DigestHistoryStore, SettingsStore};
use alcove_types::models::{Digest, DigestSource, DigestUserConfig};

use crate::Database;
use crate::queries::OptionalExt;

impl SettingsStore for Database {
    fn get(&self, user_id: Uuid) -> Result<Option<DigestUserConfig>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, delivery_time_utc, topics, custom_prompt, enabled,
                        notification_token, updated_at
                 FROM digest_settings WHERE user_id = ?1",
            )?;
            stmt.query_row([user_id.to_string()], settings_from_row)
                .optional()?
                .transpose()
        })
    }

    fn upsert(&self, config: &DigestUserConfig) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO digest_settings
                     (user_id, delivery_time_utc, topics, custom_prompt, enabled,
                      notification_token, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(user_id) DO UPDATE SET
                     delivery_time_utc = excluded.delivery_time_utc,
                     topics = excluded.topics,
                     custom_prompt = excluded.custom_prompt,
                     enabled = excluded.enabled,
                     notification_token =
                         COALESCE(excluded.notification_token, digest_settings.notification_token),
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    config.user_id.to_string(),
                    config.delivery_time_utc.to_string(),
                    serde_json::to_string(&config.topics)?,
                    config.custom_prompt,
                    config.enabled,
                    config.notification_token,
                    config.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    fn set_notification_token(&self, user_id: Uuid, token: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            // Users registering a device before saving settings get a
            // disabled stub with defaults.
            conn.execute(
                "INSERT INTO digest_settings
                     (user_id, delivery_time_utc, topics, custom_prompt, enabled,
                      notification_token, updated_at)
                 VALUES (?1, '08:00', '[\"technology\"]', NULL, 0, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     notification_token = excluded.notification_token,
                     updated_at = excluded.updated_at",
                rusqlite::params![user_id.to_string(), token, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    fn list_enabled_with_token(&self) -> Result<Vec<DigestUserConfig>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, delivery_time_utc, topics, custom_prompt, enabled,
                        notification_token, updated_at
                 FROM digest_settings
                 WHERE enabled = 1
                   AND notification_token IS NOT NULL
                   AND notification_token != ''",
            )?;
            let rows = stmt
                .query_map([], settings_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
    }
}

impl DigestHistoryStore for Database {
    fn insert(&self, digest: &Digest) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO digests
                     (id, user_id, content, sources, topics, custom_prompt,
                      created_at, read, read_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    digest.id.to_string(),
                    digest.user_id.to_string(),
                    digest.content,
                    serde_json::to_string(&digest.sources)?,
                    serde_json::to_string(&digest.topics)?,
                    digest.custom_prompt,
                    digest.created_at.to_rfc3339(),
                    digest.read,
                    digest.read_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, id: Uuid) -> Result<Option<Digest>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, content, sources, topics, custom_prompt,
                        created_at, read, read_at
                 FROM digests WHERE id = ?1",
            )?;
            stmt.query_row([id.to_string()], digest_from_row)
                .optional()?
                .transpose()
        })
    }

    fn list_for_user(&self, user_id: Uuid, limit: u32) -> Result<Vec<Digest>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, content, sources, topics, custom_prompt,
                        created_at, read, read_at
                 FROM digests
                 WHERE user_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_id.to_string(), limit],
                    digest_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
    }

    fn mark_read(&self, id: Uuid) -> Result<Option<Digest>> {
        self.with_conn_mut(|conn| {
            // COALESCE keeps the original read_at: the flip is one-way.
            conn.execute(
                "UPDATE digests SET read = 1, read_at = COALESCE(read_at, ?2) WHERE id = ?1",
                rusqlite::params![id.to_string(), Utc::now().to_rfc3339()],
            )?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, content, sources, topics, custom_prompt,
                        created_at, read, read_at
                 FROM digests WHERE id = ?1",
            )?;
            stmt.query_row([id.to_string()], digest_from_row)
                .optional()?
                .transpose()
        })
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM digests WHERE id = ?1", [id.to_string()])?;
            Ok(changed > 0)
        })
    }
}

type SqlResult<T> = std::result::Result<T, rusqlite::Error>;

/// Row mappers return `Result<Result<..>>`: sqlite errors outside, JSON and
/// timestamp decoding errors inside, flattened by the callers' `transpose`.
fn settings_from_row(row: &Row<'_>) -> SqlResult<Result<DigestUserConfig>> {
    let user_id: String = row.get(0)?;
    let delivery_time_utc: String = row.get(1)?;
    let topics: String = row.get(2)?;
    let custom_prompt: Option<String> = row.get(3)?;
    let enabled: bool = row.get(4)?;
    let notification_token: Option<String> = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok((|| {
        Ok(DigestUserConfig {
            user_id: user_id.parse().context("corrupt user_id")?,
            delivery_time_utc: delivery_time_utc
                .parse()
                .map_err(|e| anyhow::anyhow!("corrupt delivery time: {e}"))?,
            topics: serde_json::from_str(&topics).context("corrupt topics")?,
            custom_prompt,
            enabled,
            notification_token,
            updated_at: parse_timestamp(&updated_at)?,
        })
    })())
}

fn digest_from_row(row: &Row<'_>) -> SqlResult<Result<Digest>> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let content: String = row.get(2)?;
    let sources: String = row.get(3)?;
    let topics: String = row.get(4)?;
    let custom_prompt: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;
    let read: bool = row.get(7)?;
    let read_at: Option<String> = row.get(8)?;

    Ok((|| {
        Ok(Digest {
            id: id.parse().context("corrupt digest id")?,
            user_id: user_id.parse().context("corrupt user_id")?,
            content,
            sources: serde_json::from_str::<Vec<DigestSource>>(&sources)
                .context("corrupt sources")?,
            topics: serde_json::from_str(&topics).context("corrupt topics")?,
            custom_prompt,
            created_at: parse_timestamp(&created_at)?,
            read,
            read_at: read_at.as_deref().map(parse_timestamp).transpose()?,
        })
    })())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{raw}'"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config(user_id: Uuid) -> DigestUserConfig {
        DigestUserConfig {
            user_id,
            delivery_time_utc: "08:00".parse().unwrap(),
            topics: vec!["technology".into(), "science".into()],
            custom_prompt: Some("keep it short".into()),
            enabled: true,
            notification_token: Some("ExponentPushToken[abc]".into()),
            updated_at: Utc::now(),
        }
    }

    fn sample_digest(user_id: Uuid) -> Digest {
        Digest {
            id: Uuid::new_v4(),
            user_id,
            content: "today's news".into(),
            sources: vec![DigestSource {
                title: "Example".into(),
                url: "https://example.com".into(),
            }],
            topics: vec!["technology".into()],
            custom_prompt: None,
            created_at: Utc::now(),
            read: false,
            read_at: None,
        }
    }

    #[test]
    fn settings_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        let config = sample_config(user_id);
        SettingsStore::upsert(&db, &config).unwrap();

        let loaded = SettingsStore::get(&db, user_id).unwrap().unwrap();
        assert_eq!(loaded.delivery_time_utc, config.delivery_time_utc);
        assert_eq!(loaded.topics, config.topics);
        assert_eq!(loaded.notification_token, config.notification_token);
        assert!(loaded.enabled);

        assert!(SettingsStore::get(&db, Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn upsert_without_token_preserves_the_registered_one() {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        SettingsStore::upsert(&db, &sample_config(user_id)).unwrap();

        let mut updated = sample_config(user_id);
        updated.notification_token = None;
        updated.delivery_time_utc = "21:30".parse().unwrap();
        SettingsStore::upsert(&db, &updated).unwrap();

        let loaded = SettingsStore::get(&db, user_id).unwrap().unwrap();
        assert_eq!(loaded.delivery_time_utc.to_string(), "21:30");
        assert_eq!(
            loaded.notification_token.as_deref(),
            Some("ExponentPushToken[abc]")
        );
    }

    #[test]
    fn token_registration_creates_a_disabled_stub() {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        db.set_notification_token(user_id, "ExponentPushToken[xyz]")
            .unwrap();

        let loaded = SettingsStore::get(&db, user_id).unwrap().unwrap();
        assert!(!loaded.enabled);
        assert_eq!(
            loaded.notification_token.as_deref(),
            Some("ExponentPushToken[xyz]")
        );
        // A stub is not deliverable until the user enables digests.
        assert!(db.list_enabled_with_token().unwrap().is_empty());
    }

    #[test]
    fn listing_filters_disabled_and_tokenless_users() {
        let db = Database::open_in_memory().unwrap();

        let active = sample_config(Uuid::new_v4());
        SettingsStore::upsert(&db, &active).unwrap();

        let mut disabled = sample_config(Uuid::new_v4());
        disabled.enabled = false;
        SettingsStore::upsert(&db, &disabled).unwrap();

        let mut tokenless = sample_config(Uuid::new_v4());
        tokenless.notification_token = None;
        SettingsStore::upsert(&db, &tokenless).unwrap();

        let listed = db.list_enabled_with_token().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].user_id, active.user_id);
    }

    #[test]
    fn digest_history_is_reverse_chronological() {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();

        let mut first = sample_digest(user_id);
        first.created_at = "2025-06-01T08:00:00+00:00".parse().unwrap();
        let mut second = sample_digest(user_id);
        second.created_at = "2025-06-02T08:00:00+00:00".parse().unwrap();
        DigestHistoryStore::insert(&db, &first).unwrap();
        DigestHistoryStore::insert(&db, &second).unwrap();
        DigestHistoryStore::insert(&db, &sample_digest(Uuid::new_v4())).unwrap();

        let history = db.list_for_user(user_id, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
        assert_eq!(history[1].id, first.id);

        let capped = db.list_for_user(user_id, 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn mark_read_is_a_one_way_flip() {
        let db = Database::open_in_memory().unwrap();
        let digest = sample_digest(Uuid::new_v4());
        DigestHistoryStore::insert(&db, &digest).unwrap();

        let read = db.mark_read(digest.id).unwrap().unwrap();
        assert!(read.read);
        let first_read_at = read.read_at.expect("read_at set");

        let again = db.mark_read(digest.id).unwrap().unwrap();
        assert_eq!(again.read_at, Some(first_read_at));

        assert!(db.mark_read(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn delete_removes_exactly_one_digest() {
        let db = Database::open_in_memory().unwrap();
        let digest = sample_digest(Uuid::new_v4());
        DigestHistoryStore::insert(&db, &digest).unwrap();

        assert!(DigestHistoryStore::delete(&db, digest.id).unwrap());
        assert!(!DigestHistoryStore::delete(&db, digest.id).unwrap());
        assert!(DigestHistoryStore::get(&db, digest.id).unwrap().is_none());
    }
}
