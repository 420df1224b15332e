use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Attachments;

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub room: Option<String>,
    /// Kept as a string so that garbage falls back to "everything" instead of a 400.
    pub since: Option<String>,
}

impl MessagesQuery {
    pub fn since_id(&self) -> i64 {
        self.since
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(-1)
    }
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub room: Option<String>,
    pub author: Option<String>,
    pub text: Option<String>,
    #[serde(flatten)]
    pub attachments: Attachments,
}

#[derive(Debug, Deserialize)]
pub struct MessageFormRequest {
    pub room: Option<String>,
    pub author: Option<String>,
    pub bot_id: Option<i64>,
    pub action_url: Option<String>,
    pub form_data: Option<Value>,
}

// -- Bots --

#[derive(Debug, Deserialize)]
pub struct BotsQuery {
    pub room: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PutBotRequest {
    pub id: Option<i64>,
    pub room: Option<String>,
    pub name: Option<String>,
    pub responds_to: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBotRequest {
    pub id: Option<i64>,
}

// -- Rooms --

#[derive(Debug, Deserialize)]
pub struct RoomRequest {
    pub room: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomResponse {
    pub room: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub since: Option<String>,
}

impl StreamQuery {
    pub fn since_id(&self) -> i64 {
        self.since
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(-1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_defaults_to_everything() {
        let q = MessagesQuery { room: Some("r".into()), since: None };
        assert_eq!(q.since_id(), -1);

        let q = MessagesQuery { room: Some("r".into()), since: Some("abc".into()) };
        assert_eq!(q.since_id(), -1);

        let q = MessagesQuery { room: Some("r".into()), since: Some("12".into()) };
        assert_eq!(q.since_id(), 12);
    }

    #[test]
    fn post_message_flattens_attachments() {
        let req: PostMessageRequest = serde_json::from_value(serde_json::json!({
            "room": "r",
            "author": "a",
            "text": "t",
            "image": "cat.png",
        }))
        .unwrap();

        assert_eq!(req.attachments.image.as_deref(), Some("cat.png"));
        assert!(req.attachments.media.is_none());
    }
}
