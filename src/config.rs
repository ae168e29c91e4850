//! Environment-sourced configuration.
//!
//! Only the keys the bridge itself consumes live here; model
//! credentials and prompt templates belong to the external collaborators
//! that own them.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::chunker::DEFAULT_MAX_CHUNK_SIZE;

pub const DEFAULT_POST_DELAY_SECONDS: u64 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Soft target size of one posted group, in source characters.
    pub max_chunk_size: usize,
    /// Minimum delay between successive posts in one thread.
    pub post_delay: Duration,
    /// Bot token for the HTTP client; absent when running offline.
    pub slack_bot_token: Option<String>,
}

impl Config {
    /// Reads configuration from the environment, after a best-effort
    /// `.env` load.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let max_chunk_size = parse_env("MAX_CHUNK_SIZE", DEFAULT_MAX_CHUNK_SIZE)?;
        let delay_seconds = parse_env("POST_DELAY_SECONDS", DEFAULT_POST_DELAY_SECONDS)?;
        Ok(Self {
            max_chunk_size,
            post_delay: Duration::from_secs(delay_seconds),
            slack_bot_token: env::var("SLACK_BOT_TOKEN").ok(),
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    parse_value(key, env::var(key).ok(), default)
}

fn parse_value<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse_value_uses_default_when_unset() {
        let parsed = parse_value("MAX_CHUNK_SIZE", None, DEFAULT_MAX_CHUNK_SIZE)
            .expect("default applies");
        assert_eq!(parsed, DEFAULT_MAX_CHUNK_SIZE);
    }

    #[test]
    fn test_config_parse_value_reads_override() {
        let parsed =
            parse_value("MAX_CHUNK_SIZE", Some("2048".to_string()), DEFAULT_MAX_CHUNK_SIZE)
                .expect("override parses");
        assert_eq!(parsed, 2048);
    }

    #[test]
    fn test_config_parse_value_rejects_garbage() {
        let result =
            parse_value("POST_DELAY_SECONDS", Some("soon".to_string()), DEFAULT_POST_DELAY_SECONDS);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
