//! Outbound calls to bot endpoints.
//!
//! A bot is any HTTP endpoint that accepts a JSON POST and answers with a JSON object
//! carrying at least a string `text`. Replies are copied field by field into a
//! [`SanitizedReply`]; anything not on the whitelist is dropped.

use std::time::Duration;

use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use necsus_types::models::{Bot, MessageKind, NewMessage};

use crate::error::BotError;

/// The endpoint being called. Transient targets (form actions pointing at a URL no
/// registered bot owns) have no id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotTarget {
    pub id: Option<i64>,
    pub name: String,
    pub url: Option<String>,
}

impl From<&Bot> for BotTarget {
    fn from(bot: &Bot) -> Self {
        Self {
            id: Some(bot.id),
            name: bot.name.clone(),
            url: bot.url.clone(),
        }
    }
}

/// Request body sent to a bot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    /// A room message matched the bot's trigger, or the room is pinned to it.
    Message {
        room: String,
        author: String,
        text: String,
        params: Map<String, Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<Value>,
    },

    /// A viewer submitted a form the bot rendered earlier.
    Form {
        room: String,
        author: String,
        form_data: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<Value>,
    },
}

/// A bot reply that passed validation, ready to be stored as a `bot` message.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedReply {
    pub room: String,
    pub author: String,
    pub text: String,
    pub state: Option<Value>,
    pub image: Option<String>,
    pub media: Option<String>,
    pub css: Option<String>,
    pub js: Option<String>,
    pub from_bot: Option<i64>,
    pub base_url: Option<String>,
}

impl SanitizedReply {
    pub fn into_message(self) -> NewMessage {
        NewMessage {
            room: self.room,
            author: self.author,
            text: self.text,
            kind: MessageKind::Bot,
            image: self.image,
            media: self.media,
            css: self.css,
            js: self.js,
            base_url: self.base_url,
            state: self.state,
            from_bot: self.from_bot,
        }
    }
}

/// HTTP client for bot calls. Cheap to clone.
#[derive(Clone)]
pub struct BotClient {
    http: reqwest::Client,
    timeout: Duration,
    allow_room_override: bool,
}

impl BotClient {
    pub fn new(timeout: Duration, allow_room_override: bool) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("necsus/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            timeout,
            allow_room_override,
        })
    }

    /// POST `envelope` to the target and validate what comes back.
    ///
    /// No retries: bots are not assumed to be idempotent.
    #[instrument(name = "BotClient::invoke", skip(self, envelope), fields(bot = %target.name))]
    pub async fn invoke(&self, room: &str, target: &BotTarget, envelope: &Envelope) -> Result<SanitizedReply, BotError> {
        let url = target
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(BotError::MissingUrl)?;
        let url = Url::parse(url).map_err(|_| BotError::InvalidUrl(url.to_string()))?;

        debug!("Calling bot at {}", url);

        let response = self
            .http
            .post(url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Status {
                code: status.as_u16(),
                hint: BotError::status_hint(status.as_u16()),
            });
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        let reply: Value = serde_json::from_slice(&body).map_err(|_| BotError::InvalidJson)?;

        sanitize(room, target, reply, self.allow_room_override)
    }

    fn classify(&self, err: reqwest::Error) -> BotError {
        if err.is_timeout() {
            BotError::Timeout(self.timeout)
        } else if err.is_builder() {
            BotError::InvalidUrl(err.url().map(Url::to_string).unwrap_or_default())
        } else {
            BotError::Connect(error_chain(&err))
        }
    }
}

/// Build a [`SanitizedReply`] from a raw reply, keeping only whitelisted fields.
pub fn sanitize(room: &str, target: &BotTarget, reply: Value, allow_room_override: bool) -> Result<SanitizedReply, BotError> {
    let Value::Object(mut fields) = reply else {
        return Err(BotError::NotAnObject);
    };

    let text = match fields.remove("text") {
        Some(Value::String(text)) => text,
        _ => return Err(BotError::MissingText),
    };

    let author = take_string(&mut fields, "author").unwrap_or_else(|| target.name.clone());

    let room = match take_string(&mut fields, "room") {
        Some(other) if allow_room_override => other,
        Some(other) => {
            if other != room {
                debug!("Ignoring room override {:?} from bot {:?}", other, target.name);
            }
            room.to_string()
        }
        None => room.to_string(),
    };

    let state = fields.remove("state").filter(|state| !state.is_null());

    let base = target.url.as_deref();
    let mut resource = |key: &str| take_string(&mut fields, key).map(|value| absolutize(base, &value));

    Ok(SanitizedReply {
        image: resource("image"),
        media: resource("media"),
        css: resource("css"),
        js: resource("js"),
        room,
        author,
        text,
        state,
        from_bot: target.id,
        base_url: target.url.clone(),
    })
}

/// Resolve `reference` against `base` with standard URL-join rules.
///
/// Returns `None` if `base` is not an absolute URL or the join fails.
pub fn resolve_url(base: &str, reference: &str) -> Option<String> {
    Url::parse(base).ok()?.join(reference).ok().map(String::from)
}

/// Like [`resolve_url`], but falls back to the reference unchanged.
fn absolutize(base: Option<&str>, reference: &str) -> String {
    base.and_then(|base| resolve_url(base, reference))
        .unwrap_or_else(|| reference.to_string())
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::json;

    fn target(url: &str) -> BotTarget {
        BotTarget {
            id: Some(7),
            name: "RelBot".into(),
            url: Some(url.into()),
        }
    }

    fn envelope() -> Envelope {
        Envelope::Message {
            room: "r".into(),
            author: "joel".into(),
            text: "hi".into(),
            params: Map::new(),
            state: None,
        }
    }

    #[test]
    fn envelope_omits_missing_state() {
        let json = serde_json::to_value(envelope()).unwrap();
        assert_eq!(json, json!({ "room": "r", "author": "joel", "text": "hi", "params": {} }));

        let form = Envelope::Form {
            room: "r".into(),
            author: "joel".into(),
            form_data: json!({ "size": "large" }),
            state: Some(json!([1])),
        };
        let json = serde_json::to_value(form).unwrap();
        assert_eq!(
            json,
            json!({ "room": "r", "author": "joel", "form_data": { "size": "large" }, "state": [1] })
        );
    }

    #[test]
    fn resources_resolve_against_the_bot_url() {
        let bot = "http://h/path/to/bot";
        for (reference, expected) in [
            ("resource", "http://h/path/to/resource"),
            ("/resource", "http://h/resource"),
            ("http://other/resource", "http://other/resource"),
        ] {
            let reply = json!({
                "text": "hello",
                "image": reference,
                "media": reference,
                "css": reference,
                "js": reference,
            });
            let sanitized = sanitize("r", &target(bot), reply, false).unwrap();

            assert_eq!(sanitized.image.as_deref(), Some(expected));
            assert_eq!(sanitized.media.as_deref(), Some(expected));
            assert_eq!(sanitized.css.as_deref(), Some(expected));
            assert_eq!(sanitized.js.as_deref(), Some(expected));
        }
    }

    #[test]
    fn whitelist_drops_unknown_fields_and_fills_defaults() {
        let reply = json!({ "text": "ok", "kind": "system", "id": 99, "from_bot": 1, "author": 5 });
        let sanitized = sanitize("r", &target("http://h/bot"), reply, false).unwrap();

        assert_eq!(
            sanitized,
            SanitizedReply {
                room: "r".into(),
                author: "RelBot".into(),
                text: "ok".into(),
                state: None,
                image: None,
                media: None,
                css: None,
                js: None,
                from_bot: Some(7),
                base_url: Some("http://h/bot".into()),
            }
        );
        assert_eq!(sanitized.into_message().kind, MessageKind::Bot);
    }

    #[test]
    fn null_state_is_no_state() {
        let reply = json!({ "text": "ok", "state": null });
        let sanitized = sanitize("r", &target("http://h/bot"), reply, false).unwrap();
        assert_eq!(sanitized.state, None);

        let reply = json!({ "text": "ok", "state": "" });
        let sanitized = sanitize("r", &target("http://h/bot"), reply, false).unwrap();
        assert_eq!(sanitized.state, Some(json!("")));
    }

    #[test]
    fn room_override_is_opt_in() {
        let reply = json!({ "text": "ok", "room": "elsewhere" });
        let kept = sanitize("r", &target("http://h/bot"), reply.clone(), false).unwrap();
        assert_eq!(kept.room, "r");

        let moved = sanitize("r", &target("http://h/bot"), reply, true).unwrap();
        assert_eq!(moved.room, "elsewhere");
    }

    #[test]
    fn malformed_replies_are_rejected() {
        let t = target("http://h/bot");
        assert!(matches!(sanitize("r", &t, json!([1, 2]), false), Err(BotError::NotAnObject)));
        assert!(matches!(sanitize("r", &t, json!({ "txt": "x" }), false), Err(BotError::MissingText)));
        assert!(matches!(sanitize("r", &t, json!({ "text": 3 }), false), Err(BotError::MissingText)));
    }

    #[tokio::test]
    async fn invoke_posts_the_envelope_and_sanitizes() {
        let base = serve(Router::new().route(
            "/echo",
            post(|Json(body): Json<Value>| async move { Json(json!({ "text": body["text"], "secret": true })) }),
        ))
        .await;

        let client = BotClient::new(Duration::from_secs(5), false).unwrap();
        let reply = client.invoke("r", &target(&format!("{base}/echo")), &envelope()).await.unwrap();

        assert_eq!(reply.text, "hi");
        assert_eq!(reply.author, "RelBot");
        assert_eq!(reply.from_bot, Some(7));
    }

    #[tokio::test]
    async fn invoke_maps_failures() {
        let base = serve(
            Router::new()
                .route("/broken", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
                .route("/html", post(|| async { "<html>nope</html>" }))
                .route(
                    "/slow",
                    post(|| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Json(json!({ "text": "too late" }))
                    }),
                ),
        )
        .await;

        let client = BotClient::new(Duration::from_millis(300), false).unwrap();
        let call = |path: &str| {
            let client = client.clone();
            let target = target(&format!("{base}{path}"));
            async move { client.invoke("r", &target, &envelope()).await }
        };

        assert!(matches!(call("/broken").await, Err(BotError::Status { code: 500, hint: Some(_) })));
        assert!(matches!(call("/missing").await, Err(BotError::Status { code: 404, .. })));
        assert!(matches!(call("/html").await, Err(BotError::InvalidJson)));
        assert!(matches!(call("/slow").await, Err(BotError::Timeout(_))));

        let no_url = BotTarget { id: None, name: "x".into(), url: None };
        assert!(matches!(client.invoke("r", &no_url, &envelope()).await, Err(BotError::MissingUrl)));

        let refused = target("http://127.0.0.1:1/bot");
        assert!(matches!(client.invoke("r", &refused, &envelope()).await, Err(BotError::Connect(_))));
    }
}
