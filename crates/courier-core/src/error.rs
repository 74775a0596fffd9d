use std::time::Duration;

use thiserror::Error;

/// Failure of a single fetch attempt against one backend.
///
/// Every variant except [`FetchError::Cancelled`] is retryable within a
/// backend and triggers fallback to the next candidate across backends.
/// None of them ever aborts a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection, DNS or TLS failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend did not answer within its deadline.
    #[error("Request timed out after {:.1} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    /// Non-2xx response.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Technically successful response with a zero-byte body.
    #[error("Empty content for {url}")]
    EmptyContent { url: String },

    /// The caller cancelled the fetch.
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Cancelled)
    }

    /// Returns true if this error counts towards a backend's failure streak.
    pub fn should_trip_circuit(&self) -> bool {
        !matches!(self, FetchError::Cancelled)
    }

    /// Stable label used in logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Timeout(_) => "timeout",
            FetchError::HttpStatus { .. } => "http_status",
            FetchError::EmptyContent { .. } => "empty_content",
            FetchError::Cancelled => "cancelled",
        }
    }
}

/// Application-wide error types for Courier.
///
/// Only these errors escape [`ContentRouter::resolve`](crate::ContentRouter::resolve);
/// per-URL fetch failures are absorbed by the engine unless strict mode is on.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid engine or router configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A content resolver itself failed (not one of its backends).
    #[error("Resolver '{resolver}' failed: {message}")]
    Resolver { resolver: String, message: String },

    /// Strict mode: every candidate backend failed for a URL.
    #[error("All backends failed for {url}: {source}")]
    Exhausted {
        url: String,
        #[source]
        source: FetchError,
    },

    /// A fetch error surfaced directly.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Builds a [`AppError::Resolver`] from anything displayable.
    pub fn resolver(resolver: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AppError::Resolver {
            resolver: resolver.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(FetchError::Transport("reset".into()).is_retryable());
        assert!(FetchError::Timeout(Duration::from_secs(3)).is_retryable());
        assert!(
            FetchError::HttpStatus {
                status: 503,
                url: "http://a.com".into()
            }
            .is_retryable()
        );
        assert!(
            FetchError::EmptyContent {
                url: "http://a.com".into()
            }
            .is_retryable()
        );
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_circuit_tripping() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).should_trip_circuit());
        assert!(!FetchError::Cancelled.should_trip_circuit());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(FetchError::Transport("x".into()).kind(), "transport");
        assert_eq!(FetchError::Timeout(Duration::ZERO).kind(), "timeout");
        assert_eq!(FetchError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn test_exhausted_keeps_source_kind() {
        let err = AppError::Exhausted {
            url: "http://a.com".into(),
            source: FetchError::Timeout(Duration::from_secs(2)),
        };
        assert!(err.to_string().contains("timed out"));
        assert!(matches!(
            err,
            AppError::Exhausted {
                source: FetchError::Timeout(_),
                ..
            }
        ));
    }
}
