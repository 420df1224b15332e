use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            room        TEXT NOT NULL,
            author      TEXT NOT NULL,
            kind        TEXT NOT NULL DEFAULT 'user',
            text        TEXT NOT NULL,
            image       TEXT,
            media       TEXT,
            css         TEXT,
            js          TEXT,
            base_url    TEXT,
            state       TEXT,
            from_bot    INTEGER,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room, id);

        CREATE TABLE IF NOT EXISTS bots (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            room        TEXT NOT NULL,
            name        TEXT NOT NULL,
            responds_to TEXT,
            url         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_bots_room
            ON bots(room, id);

        CREATE TABLE IF NOT EXISTS clears (
            room            TEXT PRIMARY KEY,
            last_cleared_id INTEGER NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
