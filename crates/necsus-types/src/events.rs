use serde::{Deserialize, Serialize};

use crate::models::{Bot, Message};

/// Events delivered to live room viewers over the WebSocket.
///
/// Serialized as `{"kind": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RoomEvent {
    /// A new message was stored in the room
    Message(Message),

    /// All messages in the room were removed; viewers drop their local history
    ClearMessages {},

    /// A bot was created or updated
    PutBot(Bot),

    /// A bot was removed
    DeleteBot(Bot),
}

impl RoomEvent {
    pub fn clear() -> Self {
        Self::ClearMessages {}
    }

    /// Returns the message id if this event carries a message.
    pub fn message_id(&self) -> Option<i64> {
        match self {
            Self::Message(message) => Some(message.id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageKind;

    #[test]
    fn clear_event_has_empty_data() {
        let json = serde_json::to_value(RoomEvent::clear()).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "clear_messages", "data": {} }));
    }

    #[test]
    fn message_event_wraps_message() {
        let message = Message {
            id: 7,
            room: "lobby".into(),
            author: "kenni".into(),
            text: "hi".into(),
            kind: MessageKind::User,
            image: None,
            media: None,
            css: None,
            js: None,
            base_url: None,
            state: None,
            from_bot: None,
            when: chrono::DateTime::default(),
        };

        let json = serde_json::to_value(RoomEvent::Message(message)).unwrap();
        assert_eq!(json["kind"], "message");
        assert_eq!(json["data"]["id"], 7);
        assert_eq!(json["data"]["kind"], "user");
    }
}
