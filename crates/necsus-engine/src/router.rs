//! Matches message text against each bot's trigger pattern.

use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use necsus_types::models::Bot;

use crate::error::RouteError;

/// Compiled programs larger than this are rejected as invalid patterns.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// What the router decided for one bot.
#[derive(Debug)]
pub enum RouteOutcome {
    /// The bot's trigger matched; `params` holds the named capture groups.
    Matched { bot: Bot, params: Map<String, Value> },

    /// The bot's trigger could not be evaluated.
    Failed { bot: Bot, error: RouteError },
}

#[derive(Debug, Clone)]
pub struct TriggerRouter {
    timeout: Duration,
}

impl TriggerRouter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Evaluate every bot's trigger against `text`, in the order given.
    ///
    /// Bots that do not match are left out. A broken pattern only affects its own bot.
    pub async fn route(&self, bots: Vec<Bot>, text: &str) -> Vec<RouteOutcome> {
        let mut outcomes = Vec::new();

        for bot in bots {
            let (field, pattern) = trigger(&bot);
            if pattern.is_empty() {
                continue;
            }

            match self.search(field, pattern, text).await {
                Ok(Some(params)) => {
                    debug!("Bot {:?} matched with {} param(s)", bot.name, params.len());
                    outcomes.push(RouteOutcome::Matched { bot, params });
                }
                Ok(None) => {}
                Err(error) => {
                    warn!("Bot {:?} trigger failed: {}", bot.name, error);
                    outcomes.push(RouteOutcome::Failed { bot, error });
                }
            }
        }

        outcomes
    }

    /// Case-insensitive search, bounded by the router's timeout.
    async fn search(&self, field: &'static str, pattern: &str, text: &str) -> Result<Option<Map<String, Value>>, RouteError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
            .map_err(|source| RouteError::InvalidPattern {
                field,
                pattern: pattern.to_string(),
                source,
            })?;

        let text = text.to_string();
        let task = tokio::task::spawn_blocking(move || named_captures(&regex, &text));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(_)) => Err(RouteError::Crashed {
                field,
                pattern: pattern.to_string(),
            }),
            Err(_) => Err(RouteError::Timeout {
                field,
                pattern: pattern.to_string(),
                limit: self.timeout,
            }),
        }
    }
}

/// The pattern a bot responds to: `responds_to` when set, its name otherwise.
pub fn trigger(bot: &Bot) -> (&'static str, &str) {
    match bot.responds_to.as_deref() {
        Some(pattern) if !pattern.is_empty() => ("responds_to", pattern),
        _ => ("name", bot.name.as_str()),
    }
}

/// Named groups of the first match. Groups that did not take part are `null`.
fn named_captures(regex: &Regex, text: &str) -> Option<Map<String, Value>> {
    let captures = regex.captures(text)?;

    Some(
        regex
            .capture_names()
            .flatten()
            .map(|name| {
                let value = captures
                    .name(name)
                    .map_or(Value::Null, |m| Value::String(m.as_str().to_string()));
                (name.to_string(), value)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bot(id: i64, name: &str, responds_to: Option<&str>) -> Bot {
        Bot {
            id,
            room: "r".into(),
            name: name.into(),
            responds_to: responds_to.map(String::from),
            url: Some("http://bots".into()),
        }
    }

    fn router() -> TriggerRouter {
        TriggerRouter::new(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn name_is_the_fallback_trigger() {
        let outcomes = router().route(vec![bot(1, "EchoBot", None)], "hello there, echobot.").await;

        assert!(matches!(
            outcomes.as_slice(),
            [RouteOutcome::Matched { bot, params }] if bot.id == 1 && params.is_empty()
        ));

        let outcomes = router().route(vec![bot(1, "EchoBot", None)], "hello there").await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn named_groups_become_params() {
        let repeat = bot(1, "Repeat", Some(r"repeat (?P<word>\w+) (?P<count>\d+) times(?P<bang>!)?"));
        let outcomes = router().route(vec![repeat], "Repeat hello 3 TIMES").await;

        let [RouteOutcome::Matched { params, .. }] = outcomes.as_slice() else {
            panic!("expected one match, got {outcomes:?}");
        };
        assert_eq!(Value::Object(params.clone()), json!({ "word": "hello", "count": "3", "bang": null }));
    }

    #[tokio::test]
    async fn bad_pattern_does_not_block_others() {
        let bots = vec![bot(1, "Broken", Some("(")), bot(2, "Echo", None)];
        let outcomes = router().route(bots, "echo (").await;

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            &outcomes[0],
            RouteOutcome::Failed { bot, error: RouteError::InvalidPattern { field: "responds_to", .. } } if bot.id == 1
        ));
        assert!(matches!(&outcomes[1], RouteOutcome::Matched { bot, .. } if bot.id == 2));
    }

    #[tokio::test]
    async fn empty_triggers_never_fire() {
        let outcomes = router().route(vec![bot(1, "", Some(""))], "anything").await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn slow_matches_time_out() {
        let text = "ab".repeat(8 * 1024 * 1024);
        let router = TriggerRouter::new(Duration::ZERO);
        let outcomes = router.route(vec![bot(1, "Scan", Some(r"\w+\d"))], &text).await;

        assert!(matches!(
            outcomes.as_slice(),
            [RouteOutcome::Failed { error: RouteError::Timeout { .. }, .. }]
        ));
    }

    #[test]
    fn responds_to_wins_over_name() {
        assert_eq!(trigger(&bot(1, "Echo", Some("^hi"))), ("responds_to", "^hi"));
        assert_eq!(trigger(&bot(1, "Echo", None)), ("name", "Echo"));
        assert_eq!(trigger(&bot(1, "Echo", Some(""))), ("name", "Echo"));
    }
}
