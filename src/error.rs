//! Error types for the inbox responder.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Sentiment error: {0}")]
    Sentiment(#[from] SentimentError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised by a mailbox provider.
///
/// Every variant is treated as independently retryable or skippable by the
/// inbox loop; none of them is fatal to the service.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Provider rate limited the request")]
    RateLimited,

    #[error("Provider call '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl MailboxError {
    /// The provider no longer knows the message (deleted or expunged).
    pub fn is_not_found(&self) -> bool {
        matches!(self, MailboxError::Api { status: 404, .. })
    }
}

impl From<reqwest::Error> for MailboxError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            MailboxError::Decode(e.to_string())
        } else {
            MailboxError::Transport(e.to_string())
        }
    }
}

/// Sentiment classifier errors.
#[derive(Debug, thiserror::Error)]
pub enum SentimentError {
    #[error("Model not loaded!")]
    NotLoaded,

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Model persistence failed: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout {
        provider: String,
        timeout: Duration,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_loaded_message_matches_api_detail() {
        assert_eq!(SentimentError::NotLoaded.to_string(), "Model not loaded!");
    }

    #[test]
    fn mailbox_error_wraps_into_top_level() {
        let err: Error = MailboxError::RateLimited.into();
        assert!(matches!(err, Error::Mailbox(MailboxError::RateLimited)));
        assert!(err.to_string().starts_with("Mailbox error"));
    }

    #[test]
    fn startup_errors_wrap_into_top_level() {
        let err: Error = ConfigError::InvalidValue {
            key: "INBOX_CALL_TIMEOUT_SECS".into(),
            message: "expected a positive number of seconds, got '0'".into(),
        }
        .into();
        assert!(err.to_string().contains("INBOX_CALL_TIMEOUT_SECS"));

        let err: Error = LlmError::InvalidResponse {
            provider: "openai".into(),
            reason: "empty".into(),
        }
        .into();
        assert!(matches!(err, Error::Llm(_)));

        let err: Error = std::io::Error::other("port in use").into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn only_404_is_not_found() {
        let gone = MailboxError::Api {
            status: 404,
            body: "Not Found".into(),
        };
        assert!(gone.is_not_found());
        assert!(!MailboxError::RateLimited.is_not_found());
        assert!(
            !MailboxError::Api {
                status: 500,
                body: String::new()
            }
            .is_not_found()
        );
    }

    #[test]
    fn timeout_reports_operation() {
        let err = MailboxError::Timeout {
            operation: "send_reply",
            timeout: Duration::from_secs(3),
        };
        assert!(err.to_string().contains("send_reply"));
    }
}
