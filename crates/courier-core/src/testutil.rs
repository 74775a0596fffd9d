//! Test utilities: hand-written mocks of the core traits.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability so clones share
//! state and tests can assert on recorded calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, FetchError};
use crate::models::FetchedContent;
use crate::traits::{BackendKind, ContentResolver, FetchBackend, HealthAware};

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

/// Scripted response for one [`MockBackend`] call.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Respond with these bytes as `text/html`.
    Body(Vec<u8>),
    /// Fail with this error.
    Error(FetchError),
    /// Sleep, then respond with the body. Used for timeout tests.
    Delayed(Duration, Vec<u8>),
}

/// Mock backend replaying a queue of responses.
///
/// Each call pops the first response; once the queue is empty the
/// `fallback` response is repeated.
#[derive(Clone)]
pub struct MockBackend {
    kind: BackendKind,
    responses: Arc<Mutex<Vec<MockResponse>>>,
    fallback: MockResponse,
    calls: Arc<Mutex<Vec<String>>>,
    available: Arc<AtomicBool>,
}

impl MockBackend {
    /// Plays `responses` in order, then keeps succeeding with `"ok"`.
    pub fn new(responses: Vec<Result<&str, FetchError>>) -> Self {
        let responses = responses
            .into_iter()
            .map(|r| match r {
                Ok(body) => MockResponse::Body(body.as_bytes().to_vec()),
                Err(e) => MockResponse::Error(e),
            })
            .collect();
        Self::scripted(responses, MockResponse::Body(b"ok".to_vec()))
    }

    pub fn scripted(responses: Vec<MockResponse>, fallback: MockResponse) -> Self {
        Self {
            kind: BackendKind::Custom,
            responses: Arc::new(Mutex::new(responses)),
            fallback,
            calls: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn always_ok(body: &str) -> Self {
        Self::scripted(Vec::new(), MockResponse::Body(body.as_bytes().to_vec()))
    }

    pub fn always_err(error: FetchError) -> Self {
        Self::scripted(Vec::new(), MockResponse::Error(error))
    }

    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    /// Flips the backend-local health flag reported by [`HealthAware`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `fetch` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// URLs passed to `fetch`, in call order.
    pub fn requested_urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchedContent, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let response = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                self.fallback.clone()
            } else {
                responses.remove(0)
            }
        };

        match response {
            MockResponse::Body(bytes) => Ok(FetchedContent::new(url, bytes, "text/html")),
            MockResponse::Error(e) => Err(e),
            MockResponse::Delayed(delay, bytes) => {
                tokio::time::sleep(delay).await;
                Ok(FetchedContent::new(url, bytes, "text/html"))
            }
        }
    }
}

impl HealthAware for MockBackend {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// MockResolver
// ---------------------------------------------------------------------------

/// Mock resolver claiming URLs that contain any of its needles.
///
/// Records every batch it receives and answers each URL with a small text
/// body, or fails the whole batch when built with [`MockResolver::failing`].
#[derive(Clone)]
pub struct MockResolver {
    name: String,
    needles: Vec<String>,
    error: Option<String>,
    pub batches: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockResolver {
    pub fn new(name: &str, needles: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            needles: needles.iter().map(|n| n.to_string()).collect(),
            error: None,
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(name: &str, needles: &[&str], message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::new(name, needles)
        }
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentResolver for MockResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.needles.iter().any(|n| url.contains(n.as_str()))
    }

    async fn resolve(
        &self,
        urls: &[String],
        _cancel: &CancellationToken,
    ) -> Result<Vec<FetchedContent>, AppError> {
        self.batches.lock().unwrap().push(urls.to_vec());
        if let Some(message) = &self.error {
            return Err(AppError::resolver(&self.name, message));
        }
        Ok(urls
            .iter()
            .map(|u| {
                FetchedContent::text(u.as_str(), format!("{} content", self.name), "text/plain")
                    .with_meta("source", self.name.as_str())
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Shorthand for a transport failure.
pub fn transport_error(message: &str) -> FetchError {
    FetchError::Transport(message.to_string())
}
