use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::FetchError;

/// Raw content produced by a backend or resolver, plus its metadata.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FetchedContent {
    /// The URL that was requested.
    pub url: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// MIME type, e.g. `text/html` or `text/markdown`.
    pub content_type: String,
    pub title: Option<String>,
    /// Extra metadata (`backend`, `status`, `source`, ...).
    pub meta: BTreeMap<String, String>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedContent {
    pub fn new(url: impl Into<String>, bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bytes,
            content_type: content_type.into(),
            title: None,
            meta: BTreeMap::new(),
            fetched_at: Utc::now(),
        }
    }

    /// Convenience constructor for textual content.
    pub fn text(url: impl Into<String>, text: impl Into<String>, content_type: &str) -> Self {
        Self::new(url, text.into().into_bytes(), content_type)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        if !title.trim().is_empty() {
            self.title = Some(title.trim().to_string());
        }
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content decoded as UTF-8, replacing invalid sequences.
    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Name of the backend that produced this content, if it came from the engine.
    pub fn backend(&self) -> Option<&str> {
        self.meta.get("backend").map(String::as_str)
    }
}

/// Result of one backend call: content or the reason it failed.
pub type AttemptResult = Result<FetchedContent, FetchError>;

/// Record of one backend's turn within a [`FetchOutcome`].
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub backend: String,
    /// Number of calls made to the backend (initial try plus retries).
    pub tries: u32,
    /// `None` when the backend succeeded.
    pub error: Option<FetchError>,
    pub duration: Duration,
}

impl FetchAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of resolving a single URL through the engine.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub url: String,
    pub result: AttemptResult,
    /// Every backend tried, in order.
    pub attempts: Vec<FetchAttempt>,
    pub duration: Duration,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Backend that produced the content, if any.
    pub fn successful_backend(&self) -> Option<&str> {
        self.attempts
            .iter()
            .find(|a| a.succeeded())
            .map(|a| a.backend.as_str())
    }

    /// Backends tried, in order.
    pub fn backends_tried(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.backend.as_str()).collect()
    }

    pub fn into_result(self) -> AttemptResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_title_is_ignored() {
        let c = FetchedContent::text("http://a.com", "x", "text/html").with_title("   ");
        assert!(c.title.is_none());

        let c = c.with_title("  Hello ");
        assert_eq!(c.title.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_as_text_is_lossy() {
        let c = FetchedContent::new("http://a.com", vec![b'h', 0xff, b'i'], "text/plain");
        assert_eq!(c.as_text(), "h\u{fffd}i");
        assert!(!c.is_empty());
    }

    #[test]
    fn test_outcome_reports_successful_backend() {
        let outcome = FetchOutcome {
            url: "http://a.com".into(),
            result: Ok(FetchedContent::text("http://a.com", "x", "text/html")),
            attempts: vec![
                FetchAttempt {
                    backend: "reader".into(),
                    tries: 3,
                    error: Some(FetchError::Transport("down".into())),
                    duration: Duration::ZERO,
                },
                FetchAttempt {
                    backend: "http".into(),
                    tries: 1,
                    error: None,
                    duration: Duration::ZERO,
                },
            ],
            duration: Duration::ZERO,
        };

        assert!(outcome.is_success());
        assert_eq!(outcome.successful_backend(), Some("http"));
        assert_eq!(outcome.backends_tried(), vec!["reader", "http"]);
    }
}
