use crate::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use necsus_types::models::{Bot, ClearMarker, Message, MessageKind, NewBot, NewMessage};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str =
    "id, room, author, kind, text, image, media, css, js, base_url, state, from_bot, created_at";

const BOT_COLUMNS: &str = "id, room, name, responds_to, url";

impl Database {
    // -- Messages --

    /// Store a message and return it as read back, with its assigned id and timestamp.
    pub fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let state = message.state.as_ref().map(serde_json::to_string).transpose()?;
        let created_at = Utc::now().to_rfc3339();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (room, author, kind, text, image, media, css, js, base_url, state, from_bot, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    message.room,
                    message.author,
                    message.kind.as_str(),
                    message.text,
                    message.image,
                    message.media,
                    message.css,
                    message.js,
                    message.base_url,
                    state,
                    message.from_bot,
                    created_at,
                ],
            )?;

            let id = conn.last_insert_rowid();
            query_message_by_id(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Message {} vanished after insert", id))
        })
    }

    /// Messages in `room` with id strictly greater than `since_id`, ascending.
    pub fn get_messages_since(&self, room: &str, since_id: i64) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room = ?1 AND id > ?2 ORDER BY id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![room, since_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn get_last_message(&self, room: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room = ?1 ORDER BY id DESC LIMIT 1"
            );
            conn.query_row(&sql, [room], message_from_row).optional()
        })
    }

    pub fn delete_room_messages(&self, room: &str) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM messages WHERE room = ?1", [room])?))
    }

    // -- Bots --

    pub fn get_bot(&self, id: i64) -> Result<Option<Bot>> {
        self.with_conn(|conn| query_bot_by_id(conn, id))
    }

    pub fn get_bot_by_url(&self, room: &str, url: &str) -> Result<Option<Bot>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {BOT_COLUMNS} FROM bots WHERE room = ?1 AND url = ?2 ORDER BY id ASC LIMIT 1"
            );
            conn.query_row(&sql, [room, url], bot_from_row).optional()
        })
    }

    /// Bots of one room, or of every room when `room` is `None`, ascending by id.
    pub fn get_bots(&self, room: Option<&str>) -> Result<Vec<Bot>> {
        self.with_conn(|conn| {
            let rows = match room {
                Some(room) => {
                    let sql = format!("SELECT {BOT_COLUMNS} FROM bots WHERE room = ?1 ORDER BY id ASC");
                    let mut stmt = conn.prepare(&sql)?;
                    let bots = stmt
                        .query_map([room], bot_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    bots
                }
                None => {
                    let sql = format!("SELECT {BOT_COLUMNS} FROM bots ORDER BY id ASC");
                    let mut stmt = conn.prepare(&sql)?;
                    let bots = stmt
                        .query_map([], bot_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    bots
                }
            };

            Ok(rows)
        })
    }

    /// Insert a bot, or overwrite the row with the given id if it exists.
    pub fn upsert_bot(&self, bot: &NewBot) -> Result<Bot> {
        self.with_conn(|conn| {
            let id = match bot.id {
                Some(id) if query_bot_by_id(conn, id)?.is_some() => {
                    conn.execute(
                        "UPDATE bots SET room = ?2, name = ?3, responds_to = ?4, url = ?5 WHERE id = ?1",
                        rusqlite::params![id, bot.room, bot.name, bot.responds_to, bot.url],
                    )?;
                    id
                }
                Some(id) => {
                    conn.execute(
                        "INSERT INTO bots (id, room, name, responds_to, url) VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![id, bot.room, bot.name, bot.responds_to, bot.url],
                    )?;
                    id
                }
                None => {
                    conn.execute(
                        "INSERT INTO bots (room, name, responds_to, url) VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![bot.room, bot.name, bot.responds_to, bot.url],
                    )?;
                    conn.last_insert_rowid()
                }
            };

            query_bot_by_id(conn, id)?.ok_or_else(|| anyhow::anyhow!("Bot {} vanished after write", id))
        })
    }

    /// Returns true if a row was removed.
    pub fn delete_bot(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM bots WHERE id = ?1", [id])? > 0))
    }

    // -- Clears --

    pub fn get_clear(&self, room: &str) -> Result<Option<ClearMarker>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT room, last_cleared_id FROM clears WHERE room = ?1",
                [room],
                |row| {
                    Ok(ClearMarker {
                        room: row.get(0)?,
                        last_cleared_id: row.get(1)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn set_clear(&self, room: &str, last_cleared_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO clears (room, last_cleared_id) VALUES (?1, ?2)
                 ON CONFLICT(room) DO UPDATE SET last_cleared_id = excluded.last_cleared_id",
                rusqlite::params![room, last_cleared_id],
            )?;
            Ok(())
        })
    }
}

fn query_message_by_id(conn: &Connection, id: i64) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    conn.query_row(&sql, [id], message_from_row).optional()
}

fn query_bot_by_id(conn: &Connection, id: i64) -> Result<Option<Bot>> {
    let sql = format!("SELECT {BOT_COLUMNS} FROM bots WHERE id = ?1");
    conn.query_row(&sql, [id], bot_from_row).optional()
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(3)?;

    let state = row
        .get::<_, Option<String>>(10)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

    let created_at: String = row.get(12)?;
    let when = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, Box::new(e)))?;

    Ok(Message {
        id: row.get(0)?,
        room: row.get(1)?,
        author: row.get(2)?,
        kind: MessageKind::parse(&kind),
        text: row.get(4)?,
        image: row.get(5)?,
        media: row.get(6)?,
        css: row.get(7)?,
        js: row.get(8)?,
        base_url: row.get(9)?,
        state,
        from_bot: row.get(11)?,
        when,
    })
}

fn bot_from_row(row: &Row<'_>) -> rusqlite::Result<Bot> {
    Ok(Bot {
        id: row.get(0)?,
        room: row.get(1)?,
        name: row.get(2)?,
        responds_to: row.get(3)?,
        url: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
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
