//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default Gmail label applied to messages that were answered.
pub const DEFAULT_LABEL: &str = "Astro-Emails";

/// Inbox processing loop configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Sleep between cycles.
    pub poll_interval: Duration,
    /// Maximum number of unread messages fetched per cycle.
    pub batch_size: usize,
    /// Label applied after a successful reply (auto-created if absent).
    pub label_name: String,
    /// Upper bound on any single provider call.
    pub call_timeout: Duration,
    /// First backoff delay after a failed unread listing.
    pub retry_initial: Duration,
    /// Backoff ceiling.
    pub retry_max: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            label_name: DEFAULT_LABEL.to_string(),
            call_timeout: Duration::from_secs(30),
            retry_initial: Duration::from_secs(5),
            retry_max: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Read a whole-seconds duration from `raw`. Unset keeps `default`; zero or
/// garbage is rejected, since a zero interval would spin against the provider
/// and a zero timeout would fail every call.
pub(crate) fn secs_var(
    key: &str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a positive number of seconds, got '{raw}'"),
        }),
    }
}

impl ProcessorConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let poll_interval = secs_var(
            "INBOX_POLL_INTERVAL_SECS",
            std::env::var("INBOX_POLL_INTERVAL_SECS").ok(),
            defaults.poll_interval,
        )?;

        let batch_size = std::env::var("INBOX_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.batch_size);

        let label_name = std::env::var("INBOX_LABEL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.label_name);

        let call_timeout = secs_var(
            "INBOX_CALL_TIMEOUT_SECS",
            std::env::var("INBOX_CALL_TIMEOUT_SECS").ok(),
            defaults.call_timeout,
        )?;

        Ok(Self {
            poll_interval,
            batch_size,
            label_name,
            call_timeout,
            ..defaults
        })
    }
}

/// How reply text is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Constant acknowledgement.
    Static,
    /// Template chosen by the sentiment classifier.
    Sentiment,
    /// Written by an LLM primed with the business profile.
    Generator,
}

impl ReplyMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "static" => Some(Self::Static),
            "sentiment" => Some(Self::Sentiment),
            "generator" | "llm" => Some(Self::Generator),
            _ => None,
        }
    }
}

/// Sentiment classifier configuration.
#[derive(Debug, Clone)]
pub struct SentimentConfig {
    /// Where the trained model is loaded from and saved to.
    pub model_path: PathBuf,
    /// Labelled training data (`review`, `sentiment` columns).
    pub dataset_path: PathBuf,
    /// Vocabulary size cap.
    pub max_features: usize,
    /// Gradient descent iterations.
    pub max_iter: usize,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./bin/model.json"),
            dataset_path: PathBuf::from("./bin/IMDB_Dataset.csv"),
            max_features: 10_000,
            max_iter: 1000,
        }
    }
}

impl SentimentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model_path: std::env::var("SENTIMENT_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            dataset_path: std::env::var("SENTIMENT_DATASET_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.dataset_path),
            ..defaults
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub http_port: u16,
    pub reply_mode: ReplyMode,
    pub processor: ProcessorConfig,
    pub sentiment: SentimentConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_port: u16 = std::env::var("INBOX_HTTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8000);

        let reply_mode = std::env::var("INBOX_REPLY_MODE")
            .ok()
            .and_then(|s| ReplyMode::parse(&s))
            .unwrap_or(ReplyMode::Static);

        Ok(Self {
            http_port,
            reply_mode,
            processor: ProcessorConfig::from_env()?,
            sentiment: SentimentConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_defaults() {
        let config = ProcessorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.label_name, "Astro-Emails");
        assert!(config.retry_initial <= config.retry_max);
    }

    #[test]
    fn reply_mode_parse() {
        assert_eq!(ReplyMode::parse("static"), Some(ReplyMode::Static));
        assert_eq!(ReplyMode::parse(" Sentiment "), Some(ReplyMode::Sentiment));
        assert_eq!(ReplyMode::parse("llm"), Some(ReplyMode::Generator));
        assert_eq!(ReplyMode::parse("gpt"), None);
    }

    #[test]
    fn unset_duration_keeps_default() {
        let d = secs_var("X", None, Duration::from_secs(7)).unwrap();
        assert_eq!(d, Duration::from_secs(7));
        let d = secs_var("X", Some(" 12 ".into()), Duration::from_secs(7)).unwrap();
        assert_eq!(d, Duration::from_secs(12));
    }

    #[test]
    fn zero_or_garbage_duration_is_rejected() {
        for raw in ["0", "-3", "soon", ""] {
            let err = secs_var(
                "INBOX_POLL_INTERVAL_SECS",
                Some(raw.into()),
                Duration::from_secs(5),
            )
            .unwrap_err();
            let ConfigError::InvalidValue { key, .. } = err else {
                panic!("expected InvalidValue for {raw:?}");
            };
            assert_eq!(key, "INBOX_POLL_INTERVAL_SECS");
        }
    }

    #[test]
    fn sentiment_defaults() {
        let config = SentimentConfig::default();
        assert_eq!(config.max_features, 10_000);
        assert_eq!(config.max_iter, 1000);
        assert!(config.model_path.ends_with("model.json"));
    }
}
