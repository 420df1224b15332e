//! The storage interface consumed by the dispatcher and the room gateway.

use anyhow::Result;
use necsus_types::models::{Bot, ClearMarker, Message, NewBot, NewMessage};
use serde_json::Value;

use crate::Database;

/// Durable storage for messages, bots and clear markers.
///
/// Every method is synchronous: callers rely on being able to store a message and
/// publish it without yielding in between.
pub trait Store: Send + Sync + 'static {
    /// Store a message; the returned copy carries the assigned id and timestamp.
    fn add_message(&self, message: &NewMessage) -> Result<Message>;

    /// Messages in `room` with id strictly greater than `since_id`, ascending by id.
    fn messages_since(&self, room: &str, since_id: i64) -> Result<Vec<Message>>;

    fn last_message(&self, room: &str) -> Result<Option<Message>>;

    fn delete_messages(&self, room: &str) -> Result<()>;

    fn find_bot(&self, id: i64) -> Result<Option<Bot>>;

    /// The lowest-id bot in `room` whose url is exactly `url`.
    fn find_bot_by_url(&self, room: &str, url: &str) -> Result<Option<Bot>>;

    /// Bots in `room`, ascending by id.
    fn bots_in_room(&self, room: &str) -> Result<Vec<Bot>>;

    fn all_bots(&self) -> Result<Vec<Bot>>;

    /// Create a bot, or overwrite the one with `bot.id`.
    fn put_bot(&self, bot: &NewBot) -> Result<Bot>;

    /// Returns true if the bot existed.
    fn remove_bot(&self, id: i64) -> Result<bool>;

    fn find_clear(&self, room: &str) -> Result<Option<ClearMarker>>;

    fn set_last_cleared_id(&self, room: &str, last_cleared_id: i64) -> Result<()>;

    /// `(bot_id, state)` when the newest message in `room` pins the room to a bot.
    fn room_state(&self, room: &str) -> Result<Option<(i64, Value)>> {
        Ok(self.last_message(room)?.and_then(|last| match (last.from_bot, last.state) {
            (Some(bot_id), Some(state)) if !state.is_null() => Some((bot_id, state)),
            _ => None,
        }))
    }
}

impl Store for Database {
    fn add_message(&self, message: &NewMessage) -> Result<Message> {
        self.insert_message(message)
    }

    fn messages_since(&self, room: &str, since_id: i64) -> Result<Vec<Message>> {
        self.get_messages_since(room, since_id)
    }

    fn last_message(&self, room: &str) -> Result<Option<Message>> {
        self.get_last_message(room)
    }

    fn delete_messages(&self, room: &str) -> Result<()> {
        self.delete_room_messages(room).map(|_| ())
    }

    fn find_bot(&self, id: i64) -> Result<Option<Bot>> {
        self.get_bot(id)
    }

    fn find_bot_by_url(&self, room: &str, url: &str) -> Result<Option<Bot>> {
        self.get_bot_by_url(room, url)
    }

    fn bots_in_room(&self, room: &str) -> Result<Vec<Bot>> {
        self.get_bots(Some(room))
    }

    fn all_bots(&self) -> Result<Vec<Bot>> {
        self.get_bots(None)
    }

    fn put_bot(&self, bot: &NewBot) -> Result<Bot> {
        self.upsert_bot(bot)
    }

    fn remove_bot(&self, id: i64) -> Result<bool> {
        self.delete_bot(id)
    }

    fn find_clear(&self, room: &str) -> Result<Option<ClearMarker>> {
        self.get_clear(room)
    }

    fn set_last_cleared_id(&self, room: &str, last_cleared_id: i64) -> Result<()> {
        self.set_clear(room, last_cleared_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use necsus_types::models::MessageKind;
    use serde_json::json;

    #[test]
    fn room_state_follows_only_the_newest_message() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.room_state("r").unwrap(), None);

        let mut reply = NewMessage::user("r", "Botty", "go on");
        reply.kind = MessageKind::Bot;
        reply.state = Some(json!({ "step": 1 }));
        reply.from_bot = Some(5);
        db.add_message(&reply).unwrap();

        assert_eq!(db.room_state("r").unwrap(), Some((5, json!({ "step": 1 }))));

        db.add_message(&NewMessage::user("r", "joel", "hello")).unwrap();
        assert_eq!(db.room_state("r").unwrap(), None);
    }

    #[test]
    fn state_without_bot_does_not_pin() {
        let db = Database::open_in_memory().unwrap();
        let mut reply = NewMessage::user("r", "Botty", "orphan");
        reply.state = Some(json!("x"));
        db.add_message(&reply).unwrap();

        assert_eq!(db.room_state("r").unwrap(), None);
    }
}
