pub mod availability;
pub mod config;
pub mod engine;
pub mod error;
pub mod glob;
pub mod models;
pub mod resolver;
pub mod retry;
pub mod route;
pub mod router;
pub mod throttle;
pub mod traits;
pub mod util;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use availability::{Availability, AvailabilityTracker, BackendStats};
pub use config::{BackendSettings, EngineConfig, EngineConfigFile};
pub use engine::{BackendStatus, EngineBuilder, FetchResolutionEngine};
pub use error::{AppError, FetchError};
pub use models::{AttemptResult, FetchAttempt, FetchOutcome, FetchedContent};
pub use resolver::GenericResolver;
pub use retry::{RetryExecutor, RetryPolicy};
pub use route::{RouteRule, RouteSelector};
pub use router::ContentRouter;
pub use traits::{BackendKind, ContentResolver, FetchBackend, HealthAware};
