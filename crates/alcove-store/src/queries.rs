use crate::Database;
use crate::models::{MessageRow, RoomRow, UserRow};
use anyhow::{Result, anyhow};
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|_| anyhow!("User not found: {}", id))
        })
    }

    // -- Rooms --

    pub fn create_room(&self, id: &str, name: &str, created_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, name, created_at) VALUES (?1, ?2, ?3)",
                (id, name, created_at),
            )?;
            Ok(())
        })
    }

    /// Idempotent: joining a room twice is a no-op.
    pub fn add_room_member(&self, room_id: &str, user_id: &str, joined_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                (room_id, user_id, joined_at),
            )?;
            Ok(())
        })
    }

    pub fn is_room_member(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                (room_id, user_id),
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn room_exists(&self, room_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM rooms WHERE id = ?1",
                [room_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Rooms the user belongs to, newest first, each with its latest message
    /// for the conversation list.
    pub fn list_rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.created_at,
                        (SELECT content FROM messages m
                          WHERE m.room_id = r.id
                          ORDER BY m.created_at DESC LIMIT 1),
                        (SELECT created_at FROM messages m
                          WHERE m.room_id = r.id
                          ORDER BY m.created_at DESC LIMIT 1)
                 FROM rooms r
                 JOIN room_members rm ON rm.room_id = r.id
                 WHERE rm.user_id = ?1
                 ORDER BY r.created_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(RoomRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                        last_message: row.get(3)?,
                        last_message_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        room_id: &str,
        sender_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, sender_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, room_id, sender_id, content, created_at),
            )?;
            Ok(())
        })
    }

    /// Newest messages first, with cursor pagination: pass the `created_at`
    /// of the oldest message from the previous page to fetch older ones.
    pub fn get_messages(
        &self,
        room_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            // JOIN users to fetch sender_username in a single query
            let mut stmt = conn.prepare(
                "SELECT m.id, m.room_id, m.sender_id, u.username, m.content, m.created_at
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.room_id = ?1
                   AND (?2 IS NULL OR m.created_at < ?2)
                 ORDER BY m.created_at DESC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![room_id, before, limit], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        room_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        sender_username: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        content: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, created_at FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seed_user(db: &Database, id: &str, name: &str) {
        db.create_user(id, name, "hash", "2025-06-01T00:00:00+00:00")
            .unwrap();
    }

    #[test]
    fn user_round_trip() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "alice");

        let user = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert!(db.get_user_by_username("nobody").unwrap().is_none());
        assert_eq!(db.get_username_by_id("u1").unwrap(), "alice");
    }

    #[test]
    fn duplicate_usernames_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "alice");
        assert!(
            db.create_user("u2", "alice", "hash", "2025-06-01T00:00:00+00:00")
                .is_err()
        );
    }

    #[test]
    fn membership_and_room_listing() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "alice");
        db.create_room("r1", "general", "2025-06-01T00:00:00+00:00")
            .unwrap();
        db.create_room("r2", "private", "2025-06-02T00:00:00+00:00")
            .unwrap();
        db.add_room_member("r1", "u1", "2025-06-01T00:00:00+00:00")
            .unwrap();
        db.add_room_member("r1", "u1", "2025-06-01T00:00:00+00:00")
            .unwrap(); // idempotent

        assert!(db.is_room_member("r1", "u1").unwrap());
        assert!(!db.is_room_member("r2", "u1").unwrap());

        db.insert_message("m1", "r1", "u1", "hello", "2025-06-01T10:00:00+00:00")
            .unwrap();

        let rooms = db.list_rooms_for_user("u1").unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, "r1");
        assert_eq!(rooms[0].last_message.as_deref(), Some("hello"));
    }

    #[test]
    fn message_pagination_by_cursor() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "alice");
        db.create_room("r1", "general", "2025-06-01T00:00:00+00:00")
            .unwrap();
        for i in 0..5 {
            db.insert_message(
                &format!("m{i}"),
                "r1",
                "u1",
                &format!("msg {i}"),
                &format!("2025-06-01T10:00:0{i}+00:00"),
            )
            .unwrap();
        }

        let page = db.get_messages("r1", 2, None).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "m4");
        assert_eq!(page[0].sender_username, "alice");

        let older = db
            .get_messages("r1", 10, Some(&page[1].created_at))
            .unwrap();
        assert_eq!(older.len(), 3);
        assert_eq!(older[0].id, "m2");
    }
}
