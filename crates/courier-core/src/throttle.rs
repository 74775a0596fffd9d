//! Per-domain request throttling.
//!
//! Wraps any [`FetchBackend`] with a minimum delay between requests to the
//! same origin (scheme + host + port), so a batch full of URLs from one site
//! does not hammer it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use courier_core::throttle::{ThrottleConfig, ThrottledBackend};
//! # use courier_core::{FetchBackend, FetchError, FetchedContent, BackendKind};
//! # struct MyBackend;
//! # #[async_trait::async_trait]
//! # impl FetchBackend for MyBackend {
//! #     fn kind(&self) -> BackendKind { BackendKind::Custom }
//! #     async fn fetch(&self, _: &str, _: Duration) -> Result<FetchedContent, FetchError> { todo!() }
//! # }
//!
//! let config = ThrottleConfig::new(Duration::from_secs(1))
//!     .with_jitter(Duration::from_millis(500));
//! let backend = ThrottledBackend::new(MyBackend, config);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::FetchError;
use crate::models::FetchedContent;
use crate::traits::{BackendKind, FetchBackend, HealthAware};
use crate::util::origin_key;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same origin.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    pub jitter: Duration,
}

impl ThrottleConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(jitter_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            jitter: Duration::from_millis(500),
        }
    }
}

/// A [`FetchBackend`] decorator enforcing per-origin spacing.
///
/// The throttle wait happens before the inner call and does not count
/// against the fetch `timeout`, which bounds only the inner call.
#[derive(Clone)]
pub struct ThrottledBackend<B> {
    inner: B,
    config: ThrottleConfig,
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<B: FetchBackend> ThrottledBackend<B> {
    pub fn new(inner: B, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            last_request: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Reserves the next slot for `origin` and sleeps until it arrives.
    ///
    /// The slot is claimed while holding the lock, so concurrent callers for
    /// the same origin queue up one delay apart instead of all waking at once.
    async fn wait_for_origin(&self, origin: &str) {
        let wait = {
            let mut map = self.last_request.lock().await;
            let now = Instant::now();
            let slot = match map.get(origin) {
                Some(&last) => (last + self.config.effective_delay()).max(now),
                None => now,
            };
            map.insert(origin.to_string(), slot);
            slot - now
        };

        if !wait.is_zero() {
            tracing::debug!(
                origin = %origin,
                sleep_ms = %wait.as_millis(),
                "Throttling request"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl<B: FetchBackend> FetchBackend for ThrottledBackend<B> {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn enforces_timeout(&self) -> bool {
        true
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedContent, FetchError> {
        if let Some(origin) = origin_key(url) {
            self.wait_for_origin(&origin).await;
        }
        tokio::time::timeout(timeout, self.inner.fetch(url, timeout))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?
    }
}

impl<B: HealthAware> HealthAware for ThrottledBackend<B> {
    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

// ---------------------------------------------------------------------------
// Jitter from a time-seeded xorshift; not for anything security related.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockBackend;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn effective_delay_without_jitter() {
        let config = ThrottleConfig::new(Duration::from_secs(1));
        assert_eq!(config.effective_delay(), Duration::from_secs(1));
    }

    #[test]
    fn effective_delay_with_jitter_is_bounded() {
        let config =
            ThrottleConfig::new(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = config.effective_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn throttle_spaces_requests_to_same_origin() {
        let backend = ThrottledBackend::new(
            MockBackend::always_ok("<html>ok</html>"),
            ThrottleConfig::new(Duration::from_millis(100)),
        );

        let start = Instant::now();
        backend.fetch("http://example.com/page1", TIMEOUT).await.unwrap();
        backend.fetch("http://example.com/page2", TIMEOUT).await.unwrap();
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(100),
            "Second request should have been delayed by at least 100ms, elapsed: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn throttle_does_not_delay_different_origins() {
        let backend = ThrottledBackend::new(
            MockBackend::always_ok("<html>ok</html>"),
            ThrottleConfig::new(Duration::from_millis(200)),
        );

        let start = Instant::now();
        backend.fetch("http://example.com/page1", TIMEOUT).await.unwrap();
        backend.fetch("http://other.com/page1", TIMEOUT).await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn concurrent_requests_queue_one_delay_apart() {
        let backend = Arc::new(ThrottledBackend::new(
            MockBackend::always_ok("ok"),
            ThrottleConfig::new(Duration::from_millis(50)),
        ));

        let start = Instant::now();
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let b = backend.clone();
                tokio::spawn(async move {
                    b.fetch(&format!("http://example.com/{i}"), TIMEOUT).await
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(backend.inner().calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_only_the_inner_call() {
        let backend = ThrottledBackend::new(
            MockBackend::always_ok("ok"),
            ThrottleConfig::new(Duration::from_secs(10)),
        );

        backend.fetch("http://example.com/1", TIMEOUT).await.unwrap();
        // Waits 10s for its slot, longer than the 5s timeout.
        backend.fetch("http://example.com/2", TIMEOUT).await.unwrap();
        assert!(backend.enforces_timeout());

        let slow = ThrottledBackend::new(
            MockBackend::scripted(
                Vec::new(),
                crate::testutil::MockResponse::Delayed(Duration::from_secs(6), b"late".to_vec()),
            ),
            ThrottleConfig::new(Duration::ZERO),
        );
        let err = slow.fetch("http://example.com", TIMEOUT).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout(TIMEOUT));
    }

    #[tokio::test]
    async fn throttle_passes_through_errors_and_kind() {
        let backend = ThrottledBackend::new(
            MockBackend::new(vec![Err(FetchError::Transport("fail".into()))]),
            ThrottleConfig::new(Duration::ZERO),
        );

        let err = backend.fetch("http://example.com", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
        assert_eq!(backend.kind(), BackendKind::Custom);
        assert!(backend.is_available());
    }
}
