use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use necsus_engine::EngineConfig;

/// Runtime settings, read from `NECSUS_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite file, or `:memory:`.
    pub db_path: String,
    pub host: String,
    pub port: u16,
    pub bot_timeout: Duration,
    pub pattern_timeout: Duration,
    pub allow_room_override: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            db_path: var("NECSUS_DB", "necsus.db"),
            host: var("NECSUS_HOST", "0.0.0.0"),
            port: parse(&lookup, "NECSUS_PORT", 6277)?,
            bot_timeout: Duration::from_secs(parse(&lookup, "NECSUS_BOT_TIMEOUT_SECS", 120)?),
            pattern_timeout: Duration::from_millis(parse(&lookup, "NECSUS_PATTERN_TIMEOUT_MS", 250)?),
            allow_room_override: parse(&lookup, "NECSUS_ALLOW_ROOM_OVERRIDE", false)?,
        })
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            bot_timeout: self.bot_timeout,
            pattern_timeout: self.pattern_timeout,
            allow_room_override: self.allow_room_override,
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.db_path, "necsus.db");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 6277);
        assert_eq!(config.bot_timeout, Duration::from_secs(120));
        assert_eq!(config.pattern_timeout, Duration::from_millis(250));
        assert!(!config.allow_room_override);
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("NECSUS_DB", ":memory:"),
            ("NECSUS_PORT", "8080"),
            ("NECSUS_BOT_TIMEOUT_SECS", "5"),
            ("NECSUS_ALLOW_ROOM_OVERRIDE", "true"),
        ])
        .unwrap();

        assert_eq!(config.db_path, ":memory:");
        assert_eq!(config.port, 8080);
        assert_eq!(config.engine().bot_timeout, Duration::from_secs(5));
        assert!(config.engine().allow_room_override);
    }

    #[test]
    fn bad_numbers_fail_startup() {
        let err = config(&[("NECSUS_PORT", "lots")]).unwrap_err();
        assert!(err.to_string().contains("NECSUS_PORT"));
    }
}
