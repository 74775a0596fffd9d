use std::sync::Arc;
use std::time::Duration;

use courier_core::engine::FetchResolutionEngine;
use courier_core::error::AppError;
use courier_core::router::ContentRouter;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_BATCH: usize = 50;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub router: ContentRouter,
    /// Engine behind the generic resolver, for backend health and resets.
    pub engine: Arc<FetchResolutionEngine>,
    pub api_key: String,
    pub limits: RequestLimits,
}

/// Bounds applied to every `/v1/resolve` call.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    /// Wall-clock budget for one batch; outstanding fetches are cancelled
    /// when it runs out.
    pub timeout: Duration,
    pub max_batch: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

impl RequestLimits {
    /// Reads `COURIER_REQUEST_TIMEOUT_SECS` and `COURIER_MAX_BATCH`.
    pub fn from_env() -> Result<Self, AppError> {
        let mut limits = Self::default();
        if let Ok(v) = std::env::var("COURIER_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = v.trim().parse().map_err(|_| {
                AppError::ConfigError(format!("Invalid COURIER_REQUEST_TIMEOUT_SECS: '{v}'"))
            })?;
            limits.timeout = Duration::from_secs(secs);
        }
        if let Ok(v) = std::env::var("COURIER_MAX_BATCH") {
            limits.max_batch = v
                .trim()
                .parse()
                .map_err(|_| AppError::ConfigError(format!("Invalid COURIER_MAX_BATCH: '{v}'")))?;
        }
        Ok(limits)
    }
}
