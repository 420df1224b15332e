use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Bot,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
            Self::System => "system",
        }
    }

    /// Unknown kinds read back from storage are treated as user messages.
    pub fn parse(s: &str) -> Self {
        match s {
            "bot" => Self::Bot,
            "system" => Self::System,
            _ => Self::User,
        }
    }
}

/// A stored message. Ascending `id` is the room's history order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub room: String,
    pub author: String,
    pub text: String,
    pub kind: MessageKind,
    pub image: Option<String>,
    pub media: Option<String>,
    pub css: Option<String>,
    pub js: Option<String>,
    pub base_url: Option<String>,
    /// Opaque conversation state handed back by a bot.
    pub state: Option<Value>,
    pub from_bot: Option<i64>,
    pub when: DateTime<Utc>,
}

/// Fields for a message that has not been stored yet. The store assigns `id` and `when`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub room: String,
    pub author: String,
    pub text: String,
    pub kind: MessageKind,
    pub image: Option<String>,
    pub media: Option<String>,
    pub css: Option<String>,
    pub js: Option<String>,
    pub base_url: Option<String>,
    pub state: Option<Value>,
    pub from_bot: Option<i64>,
}

impl NewMessage {
    pub fn user(room: impl Into<String>, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::plain(room, author, text, MessageKind::User)
    }

    pub fn system(room: impl Into<String>, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::plain(room, author, text, MessageKind::System)
    }

    fn plain(room: impl Into<String>, author: impl Into<String>, text: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            room: room.into(),
            author: author.into(),
            text: text.into(),
            kind,
            image: None,
            media: None,
            css: None,
            js: None,
            base_url: None,
            state: None,
            from_bot: None,
        }
    }
}

/// Optional extras a human message may carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachments {
    pub image: Option<String>,
    pub media: Option<String>,
    pub css: Option<String>,
    pub js: Option<String>,
    pub base_url: Option<String>,
}

/// A bot registered against a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    pub id: i64,
    pub room: String,
    pub name: String,
    pub responds_to: Option<String>,
    pub url: Option<String>,
}

/// Fields for creating a bot, or updating one when `id` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBot {
    pub id: Option<i64>,
    pub room: String,
    pub name: String,
    pub responds_to: Option<String>,
    pub url: Option<String>,
}

/// History below `last_cleared_id` is hidden from new viewers of `room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearMarker {
    pub room: String,
    pub last_cleared_id: i64,
}
