//! Error types for inbox triage.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail source error: {0}")]
    Source(#[from] SourceError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail source errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The mail service cannot be reached. Fatal to a run.
    #[error("Mail source unavailable: {0}")]
    Unavailable(String),

    #[error("Message {id} not found")]
    NotFound { id: String },

    #[error("Failed to mark message {id} as read: {reason}")]
    MarkRead { id: String, reason: String },

    #[error("Mail protocol error: {0}")]
    Protocol(String),
}

impl SourceError {
    /// Whether a stage may retry the call that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Protocol(_))
    }
}

/// Classification oracle errors. Always recoverable at the stage boundary.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed oracle response: {0}")]
    Malformed(String),

    #[error("Oracle returned a {got} verdict for a {expected} request")]
    UnexpectedVerdict {
        expected: &'static str,
        got: &'static str,
    },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl OracleError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::UnexpectedVerdict { .. })
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reminder/notification sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink {sink} failed: {reason}")]
    Failed { sink: String, reason: String },

    #[error("Invalid input for sink {sink}: {reason}")]
    InvalidInput { sink: String, reason: String },
}

/// Report artifact errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_unavailable_is_transient_not_found_is_not() {
        assert!(SourceError::Unavailable("down".into()).is_transient());
        assert!(!SourceError::NotFound { id: "42".into() }.is_transient());
        assert!(
            !SourceError::MarkRead {
                id: "42".into(),
                reason: "x".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn unexpected_verdict_is_not_retried() {
        let err = OracleError::UnexpectedVerdict {
            expected: "judgment",
            got: "extraction",
        };
        assert!(!err.is_transient());
        assert!(OracleError::Timeout(Duration::from_secs(5)).is_transient());
    }

    #[test]
    fn top_level_wraps_source_error() {
        let err: Error = SourceError::Unavailable("imap down".into()).into();
        assert!(err.to_string().contains("imap down"));
    }
}
