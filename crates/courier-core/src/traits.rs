use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, FetchError};
use crate::models::FetchedContent;

/// The transport family a backend belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Plain HTTP GET.
    DirectHttp,
    /// Remote text-extraction service that renders the page for us.
    ReaderService,
    /// Local headless browser for JS-heavy pages.
    HeadlessRender,
    Custom,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::DirectHttp => "direct_http",
            BackendKind::ReaderService => "reader_service",
            BackendKind::HeadlessRender => "headless_render",
            BackendKind::Custom => "custom",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete fetch strategy: turns a URL into raw bytes plus metadata.
///
/// Implementations should honour `timeout`; the engine additionally enforces
/// it from the outside so a hung transport cannot stall a batch.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// True when `fetch` applies `timeout` to its transport call itself. The
    /// engine then skips its outer deadline, so work done before the call
    /// (such as waiting for a throttle slot) is not counted.
    fn enforces_timeout(&self) -> bool {
        false
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedContent, FetchError>;
}

/// Backends that take part in circuit breaking.
///
/// Registering a backend through
/// [`EngineBuilder::tracked_backend`](crate::engine::EngineBuilder::tracked_backend)
/// requires this trait, so the engine knows at build time which backends can
/// be skipped as unavailable.
pub trait HealthAware: FetchBackend {
    /// Backend-local availability (e.g. the browser process is alive).
    fn is_available(&self) -> bool;
}

/// A higher-level dispatcher owning a `can_handle` predicate.
///
/// Resolvers receive their whole group of URLs at once. They may drop URLs
/// they cannot resolve, so the output can be shorter than the input.
/// Returning `Err` fails the entire batch.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &str;

    fn can_handle(&self, url: &str) -> bool;

    async fn resolve(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedContent>, AppError>;
}
