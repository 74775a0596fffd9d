//! The fetch resolution engine.
//!
//! For one URL the engine asks the [`RouteSelector`] for an ordered candidate
//! list, then runs each candidate backend under its [`RetryExecutor`] until
//! one produces non-empty content. Every backend's result is recorded in the
//! shared [`AvailabilityTracker`], which feeds back into the next selection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::{FutureExt, StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;

use crate::availability::{Availability, AvailabilityTracker};
use crate::config::{BackendSettings, EngineConfig};
use crate::error::{AppError, FetchError};
use crate::models::{FetchAttempt, FetchOutcome, FetchedContent};
use crate::retry::RetryExecutor;
use crate::route::RouteSelector;
use crate::traits::{BackendKind, FetchBackend, HealthAware};

struct RegisteredBackend {
    backend: Arc<dyn FetchBackend>,
    /// Set for backends that take part in circuit breaking.
    health: Option<Arc<dyn HealthAware>>,
}

/// Health report for one registered backend.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub kind: BackendKind,
    /// Whether the circuit breaker may skip this backend.
    pub tracked: bool,
    /// Whether the backend would currently be offered as a candidate.
    pub available: bool,
    pub state: Availability,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// Collects backends and configuration for a [`FetchResolutionEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    backends: HashMap<String, RegisteredBackend>,
    tracker: Option<AvailabilityTracker>,
}

impl EngineBuilder {
    /// Registers a backend the circuit breaker never filters out.
    ///
    /// Failures are still counted so they show up in stats.
    pub fn backend<B>(mut self, name: impl Into<String>, backend: B) -> Self
    where
        B: FetchBackend + 'static,
    {
        self.backends.insert(
            name.into(),
            RegisteredBackend {
                backend: Arc::new(backend),
                health: None,
            },
        );
        self
    }

    /// Registers a backend that is skipped while the tracker marks it
    /// unavailable or its own [`HealthAware::is_available`] returns false.
    pub fn tracked_backend<B>(mut self, name: impl Into<String>, backend: B) -> Self
    where
        B: HealthAware + 'static,
    {
        let backend = Arc::new(backend);
        self.backends.insert(
            name.into(),
            RegisteredBackend {
                backend: backend.clone(),
                health: Some(backend),
            },
        );
        self
    }

    /// Shares an existing tracker instead of creating one from the config.
    pub fn with_tracker(mut self, tracker: AvailabilityTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn build(self) -> Result<FetchResolutionEngine, AppError> {
        self.config.validate()?;
        let selector = RouteSelector::new(self.config.routes.clone())?;

        for rule in selector.rules() {
            if !self.backends.contains_key(&rule.name) {
                return Err(AppError::ConfigError(format!(
                    "Route '{}' refers to unregistered backend",
                    rule.name
                )));
            }
        }
        for name in self.backends.keys() {
            if !selector.rules().any(|r| &r.name == name) {
                tracing::warn!(backend = %name, "Backend has no route rule and will never be used");
            }
        }

        let tracker = self
            .tracker
            .unwrap_or_else(|| AvailabilityTracker::new(self.config.failure_threshold));

        Ok(FetchResolutionEngine {
            selector,
            backends: self.backends,
            tracker,
            config: self.config,
        })
    }
}

/// Resolves single URLs across an ordered set of fallback backends.
///
/// Safe to share between tasks: the route table is immutable and the tracker
/// is internally synchronized.
pub struct FetchResolutionEngine {
    selector: RouteSelector,
    backends: HashMap<String, RegisteredBackend>,
    tracker: AvailabilityTracker,
    config: EngineConfig,
}

impl FetchResolutionEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            backends: HashMap::new(),
            tracker: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &AvailabilityTracker {
        &self.tracker
    }

    pub fn is_strict(&self) -> bool {
        self.config.strict_mode
    }

    /// Whether `backend` may currently be offered as a candidate.
    pub fn is_available(&self, backend: &str) -> bool {
        match self.backends.get(backend) {
            Some(RegisteredBackend {
                health: Some(health),
                ..
            }) => health.is_available() && self.tracker.is_available(backend),
            Some(_) => true,
            None => false,
        }
    }

    /// Candidate backends for `url`, in the order they would be tried.
    pub fn candidates(&self, url: &str) -> Vec<String> {
        self.selector.select(url, |name| self.is_available(name))
    }

    /// Clears breaker state for one backend. Returns false for unknown names.
    pub fn reset(&self, backend: &str) -> bool {
        if !self.backends.contains_key(backend) {
            return false;
        }
        self.tracker.reset(backend);
        true
    }

    pub fn reset_all(&self) {
        self.tracker.reset_all();
    }

    /// Status of every registered backend, sorted by name.
    pub fn backend_statuses(&self) -> Vec<BackendStatus> {
        let stats = self.tracker.stats();
        let mut statuses: Vec<BackendStatus> = self
            .backends
            .iter()
            .map(|(name, registered)| {
                let seen = stats.iter().find(|s| &s.name == name);
                BackendStatus {
                    name: name.clone(),
                    kind: registered.backend.kind(),
                    tracked: registered.health.is_some(),
                    available: self.is_available(name),
                    state: seen.map(|s| s.state).unwrap_or(Availability::Unknown),
                    consecutive_failures: seen.map(|s| s.consecutive_failures).unwrap_or(0),
                    last_error: seen.and_then(|s| s.last_error.clone()),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        self.fetch_with_cancel(url, &CancellationToken::new()).await
    }

    /// Tries each candidate in order and stops at the first success.
    ///
    /// Cancellation stops further calls and retries for this URL. Tracker
    /// updates already made are kept.
    pub async fn fetch_with_cancel(&self, url: &str, cancel: &CancellationToken) -> FetchOutcome {
        let started = Instant::now();
        let candidates = self.candidates(url);
        let mut attempts = Vec::with_capacity(candidates.len());
        let mut last_error = None;

        tracing::debug!(url = %url, candidates = ?candidates, "Resolving URL");

        for name in &candidates {
            if cancel.is_cancelled() {
                last_error = Some(FetchError::Cancelled);
                break;
            }
            let Some(registered) = self.backends.get(name) else {
                continue;
            };

            let backend = registered.backend.as_ref();
            let settings = *self.config.settings_for(name);
            let backend_started = Instant::now();
            let outcome = RetryExecutor::new(settings.retry)
                .run(cancel, move |attempt| {
                    call_backend(backend, name, url, settings, attempt)
                })
                .await;

            match outcome.result {
                Ok(content) => {
                    self.tracker.record_success(name);
                    attempts.push(FetchAttempt {
                        backend: name.clone(),
                        tries: outcome.tries,
                        error: None,
                        duration: backend_started.elapsed(),
                    });
                    tracing::debug!(
                        url = %url,
                        backend = %name,
                        tries = outcome.tries,
                        bytes = content.bytes.len(),
                        "Fetched content"
                    );
                    return FetchOutcome {
                        url: url.to_string(),
                        result: Ok(stamp(content, name, url)),
                        attempts,
                        duration: started.elapsed(),
                    };
                }
                Err(e) => {
                    // Failures seen before a cancellation still count.
                    let recorded = outcome.last_failure.as_ref().unwrap_or(&e);
                    self.tracker.record_failure(name, recorded);
                    attempts.push(FetchAttempt {
                        backend: name.clone(),
                        tries: outcome.tries,
                        error: Some(e.clone()),
                        duration: backend_started.elapsed(),
                    });
                    if matches!(e, FetchError::Cancelled) {
                        last_error = Some(e);
                        break;
                    }
                    tracing::warn!(
                        url = %url,
                        backend = %name,
                        tries = outcome.tries,
                        error = %e,
                        "Backend failed, trying next candidate"
                    );
                    last_error = Some(e);
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| FetchError::Transport(format!("No backend available for {url}")));

        if matches!(error, FetchError::Cancelled) {
            tracing::debug!(url = %url, "Fetch cancelled");
        } else {
            tracing::error!(
                url = %url,
                backends = attempts.len(),
                error = %error,
                "All backends failed"
            );
        }

        FetchOutcome {
            url: url.to_string(),
            result: Err(error),
            attempts,
            duration: started.elapsed(),
        }
    }

    /// Fetches `url` and applies the strict/soft policy.
    ///
    /// Soft mode returns `Ok(None)` for a URL every backend failed on;
    /// strict mode returns [`AppError::Exhausted`]. Cancelled URLs are
    /// always `Ok(None)`.
    pub async fn resolve_url(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<FetchedContent>, AppError> {
        let outcome = self.fetch_with_cancel(url, cancel).await;
        match outcome.result {
            Ok(content) => Ok(Some(content)),
            Err(FetchError::Cancelled) => Ok(None),
            Err(source) if self.config.strict_mode => Err(AppError::Exhausted {
                url: url.to_string(),
                source,
            }),
            Err(e) => {
                tracing::warn!(
                    url = %url,
                    error = %e,
                    tried = ?outcome.attempts.iter().map(|a| a.backend.as_str()).collect::<Vec<_>>(),
                    "Dropping URL from results"
                );
                Ok(None)
            }
        }
    }

    /// Resolves a batch, up to `concurrency` URLs at a time.
    ///
    /// With the default concurrency of 1 URLs run one after another, so a
    /// URL in backoff holds up the rest of the batch. Results keep input order. The result may be shorter than `urls`; match
    /// on [`FetchedContent::url`], not position.
    pub async fn resolve_all(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedContent>, AppError> {
        let resolved: Vec<Option<FetchedContent>> = stream::iter(urls.iter().cloned())
            .map(move |url| async move { self.resolve_url(&url, cancel).await }.boxed())
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await?;
        Ok(resolved.into_iter().flatten().collect())
    }
}

/// One backend call with empty bodies turned into failures. The deadline is
/// enforced from outside unless the backend bounds its own calls.
async fn call_backend(
    backend: &dyn FetchBackend,
    name: &str,
    url: &str,
    settings: BackendSettings,
    attempt: u32,
) -> Result<FetchedContent, FetchError> {
    tracing::debug!(url = %url, backend = %name, attempt, "Calling backend");

    let content = if backend.enforces_timeout() {
        backend.fetch(url, settings.timeout).await?
    } else {
        tokio::time::timeout(settings.timeout, backend.fetch(url, settings.timeout))
            .await
            .map_err(|_| FetchError::Timeout(settings.timeout))??
    };

    if content.is_empty() {
        return Err(FetchError::EmptyContent {
            url: url.to_string(),
        });
    }
    Ok(content)
}

fn stamp(mut content: FetchedContent, backend: &str, url: &str) -> FetchedContent {
    content.meta.insert("backend".into(), backend.to_string());
    content
        .meta
        .entry("url".into())
        .or_insert_with(|| url.to_string());
    content
}

impl std::fmt::Debug for FetchResolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.backends.keys().collect();
        names.sort();
        f.debug_struct("FetchResolutionEngine")
            .field("backends", &names)
            .field("default_backend", &self.selector.default_backend())
            .field("strict_mode", &self.config.strict_mode)
            .finish()
    }
}
