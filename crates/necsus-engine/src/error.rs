//! Typed errors for the engine.
//!
//! Bot and routing failures are shown to the room as system messages, so their
//! `Display` text reads as the tail of "Something went wrong. Bot 'X' ...".

use std::time::Duration;

use thiserror::Error;

/// Why a bot call produced no usable reply.
#[derive(Debug, Error)]
pub enum BotError {
    /// The bot has no URL to call
    #[error("has no URL to call")]
    MissingUrl,

    /// The URL could not be parsed or used
    #[error("has an invalid URL: {0}")]
    InvalidUrl(String),

    /// Connection refused, DNS failure, TLS failure and the like
    #[error("could not be reached ({0})")]
    Connect(String),

    /// No complete response within the configured limit
    #[error("timed out after {} second(s)", .0.as_secs_f64())]
    Timeout(Duration),

    /// Non-2xx response
    #[error("responded with a {code} error{}", .hint.map(|h| format!(" ({h})")).unwrap_or_default())]
    Status { code: u16, hint: Option<&'static str> },

    /// Body was not JSON at all
    #[error("replied with something that is not valid JSON")]
    InvalidJson,

    /// Body was JSON but not an object
    #[error("replied with JSON that is not an object")]
    NotAnObject,

    /// Object without a string `text`
    #[error("replied without a string \"text\" field")]
    MissingText,
}

impl BotError {
    /// Likely cause for well-known status codes.
    pub fn status_hint(code: u16) -> Option<&'static str> {
        match code {
            404 => Some("the URL may not match any route the bot serves"),
            405 => Some("the bot may not accept POST requests at that URL"),
            500 => Some("check the bot's own logs"),
            _ => None,
        }
    }
}

/// Why a bot's trigger could not be evaluated. Scoped to that one bot.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("has an invalid {field} regex: <pre>{pattern}</pre>")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("took longer than {}ms to match its {field} regex: <pre>{pattern}</pre>", .limit.as_millis())]
    Timeout {
        field: &'static str,
        pattern: String,
        limit: Duration,
    },

    #[error("crashed while matching its {field} regex: <pre>{pattern}</pre>")]
    Crashed { field: &'static str, pattern: String },
}

/// Failures that abort a dispatcher operation and reach the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("bot {0} not found")]
    BotNotFound(i64),

    #[error("storage error: {0:#}")]
    Store(#[from] anyhow::Error),
}
