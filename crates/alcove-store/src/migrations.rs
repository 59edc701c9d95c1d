use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS room_members (
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            sender_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS digest_settings (
            user_id             TEXT PRIMARY KEY,
            delivery_time_utc   TEXT NOT NULL,
            topics              TEXT NOT NULL,
            custom_prompt       TEXT,
            enabled             INTEGER NOT NULL DEFAULT 0,
            notification_token  TEXT,
            updated_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS digests (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            content         TEXT NOT NULL,
            sources         TEXT NOT NULL,
            topics          TEXT NOT NULL,
            custom_prompt   TEXT,
            created_at      TEXT NOT NULL,
            read            INTEGER NOT NULL DEFAULT 0,
            read_at         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_digests_user
            ON digests(user_id, created_at DESC);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
