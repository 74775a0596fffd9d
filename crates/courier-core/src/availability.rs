//! Per-backend availability tracking.
//!
//! A deliberately simple circuit breaker: a backend goes unavailable after
//! `threshold` consecutive failures and stays there until a success or an
//! explicit reset. There is no timer and no half-open state.
//!
//! # States
//!
//! ```text
//! UNKNOWN --[success]--> AVAILABLE --[N failures]--> UNAVAILABLE
//!    |                       ^                            |
//!    +----[N failures]-------|----------------------------+
//!                            +--[success / reset]---------+
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::FetchError;

/// Default number of consecutive failures before a backend is skipped.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Availability of a single backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Never attempted; treated as available.
    Unknown,
    Available,
    Unavailable,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::Unknown => write!(f, "unknown"),
            Availability::Available => write!(f, "available"),
            Availability::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[derive(Debug)]
struct BackendState {
    availability: Availability,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl BackendState {
    fn new() -> Self {
        Self {
            availability: Availability::Unknown,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Snapshot of one backend's state for monitoring.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BackendStats {
    pub name: String,
    pub state: Availability,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// Thread-safe availability store shared by everything that clones it.
#[derive(Clone)]
pub struct AvailabilityTracker {
    threshold: u32,
    inner: Arc<Mutex<HashMap<String, BackendState>>>,
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl AvailabilityTracker {
    /// A `threshold` of zero is clamped to one.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, HashMap<String, BackendState>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned availability tracker mutex");
            poisoned.into_inner()
        })
    }

    pub fn record_success(&self, backend: &str) {
        let mut inner = self.lock_inner();
        let state = inner
            .entry(backend.to_string())
            .or_insert_with(BackendState::new);

        if state.availability == Availability::Unavailable {
            tracing::info!(
                backend = %backend,
                "Backend recovered after {} consecutive failures",
                state.consecutive_failures
            );
        }
        state.availability = Availability::Available;
        state.consecutive_failures = 0;
        state.last_error = None;
    }

    pub fn record_failure(&self, backend: &str, error: &FetchError) {
        if !error.should_trip_circuit() {
            return;
        }

        let mut inner = self.lock_inner();
        let state = inner
            .entry(backend.to_string())
            .or_insert_with(BackendState::new);

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_error = Some(error.to_string());

        if state.consecutive_failures >= self.threshold
            && state.availability != Availability::Unavailable
        {
            tracing::warn!(
                backend = %backend,
                failures = state.consecutive_failures,
                error = %error,
                "Marking backend unavailable after {} consecutive failures",
                state.consecutive_failures
            );
            state.availability = Availability::Unavailable;
        }
    }

    /// Unknown backends are available.
    pub fn is_available(&self, backend: &str) -> bool {
        self.state(backend) != Availability::Unavailable
    }

    pub fn state(&self, backend: &str) -> Availability {
        self.lock_inner()
            .get(backend)
            .map(|s| s.availability)
            .unwrap_or(Availability::Unknown)
    }

    pub fn consecutive_failures(&self, backend: &str) -> u32 {
        self.lock_inner()
            .get(backend)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    /// External reset: forget everything recorded for `backend`.
    pub fn reset(&self, backend: &str) {
        if self.lock_inner().remove(backend).is_some() {
            tracing::info!(backend = %backend, "Availability manually reset");
        }
    }

    pub fn reset_all(&self) {
        self.lock_inner().clear();
        tracing::info!("Availability reset for all backends");
    }

    /// Stats for every backend seen so far, sorted by name.
    pub fn stats(&self) -> Vec<BackendStats> {
        let inner = self.lock_inner();
        let mut stats: Vec<BackendStats> = inner
            .iter()
            .map(|(name, s)| BackendStats {
                name: name.clone(),
                state: s.availability,
                consecutive_failures: s.consecutive_failures,
                last_error: s.last_error.clone(),
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
