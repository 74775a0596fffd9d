use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::engine::BackendStatus;
use courier_core::models::FetchedContent;

// ---------------------------------------------------------------------------
// Resolve
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ResolveRequest {
    /// URLs to resolve in one batch
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ResolveResponse {
    pub requested: usize,
    pub resolved: usize,
    /// One entry per resolved URL. Order across resolvers is unspecified;
    /// match entries on `url`.
    pub contents: Vec<ResolvedContent>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ResolvedContent {
    pub url: String,
    pub title: Option<String>,
    pub content_type: String,
    /// Backend that produced the content, for URLs served by the generic engine
    pub backend: Option<String>,
    pub meta: BTreeMap<String, String>,
    pub fetched_at: DateTime<Utc>,
    /// Body decoded as UTF-8 (lossy)
    pub text: String,
}

impl From<FetchedContent> for ResolvedContent {
    fn from(content: FetchedContent) -> Self {
        let text = content.as_text().into_owned();
        let backend = content.backend().map(str::to_string);
        Self {
            url: content.url,
            title: content.title,
            content_type: content.content_type,
            backend,
            meta: content.meta,
            fetched_at: content.fetched_at,
            text,
        }
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BackendResponse {
    pub name: String,
    /// direct_http, reader_service, headless_render or custom
    pub kind: String,
    /// Whether the circuit breaker may skip this backend
    pub tracked: bool,
    pub available: bool,
    /// unknown, available or unavailable
    pub state: String,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl From<BackendStatus> for BackendResponse {
    fn from(status: BackendStatus) -> Self {
        Self {
            name: status.name,
            kind: status.kind.to_string(),
            tracked: status.tracked,
            available: status.available,
            state: status.state.to_string(),
            consecutive_failures: status.consecutive_failures,
            last_error: status.last_error,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BackendListResponse {
    pub failure_threshold: u32,
    pub backends: Vec<BackendResponse>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// `healthy` when every backend is available, `degraded` otherwise
    pub status: &'static str,
    pub backends_available: usize,
    pub backends_total: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
