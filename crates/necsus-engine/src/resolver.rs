//! Conversation pins.
//!
//! A bot that replies with a non-null `state` pins the room: the next inbound
//! message goes straight to that bot, whatever its text. The pin lives only on the
//! newest message, so any later message without state releases it.

use anyhow::Result;
use serde_json::Value;

use necsus_db::Store;

/// The bot a room is currently pinned to, with the state it handed back.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomConversationPointer {
    pub bot_id: i64,
    pub state: Value,
}

/// Derive the pin from the tail of the room's log.
pub fn resolve(store: &dyn Store, room: &str) -> Result<Option<RoomConversationPointer>> {
    Ok(store
        .room_state(room)?
        .map(|(bot_id, state)| RoomConversationPointer { bot_id, state }))
}
