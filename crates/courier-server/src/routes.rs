use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use courier_core::error::{AppError, FetchError};

use crate::auth::require_api_key;
use crate::dto::{
    BackendListResponse, BackendResponse, HealthResponse, ResolveRequest, ResolveResponse,
    ResolvedContent,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/resolve", post(resolve))
        .route("/v1/backends", get(list_backends))
        .route("/v1/backends/{name}/reset", post(reset_backend))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Resolve
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/resolve",
    request_body = ResolveRequest,
    responses(
        (status = 200, description = "Resolved contents; failed URLs are omitted", body = ResolveResponse),
        (status = 400, description = "Empty or oversized batch", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "A resolver failed, or strict mode exhausted a URL", body = crate::dto::ErrorResponse),
        (status = 504, description = "Batch exceeded the request timeout", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "resolve"
)]
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ResolveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let urls: Vec<String> = body
        .urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();

    if urls.is_empty() {
        return Err(ApiError::BadRequest("urls must not be empty".into()));
    }
    if urls.len() > state.limits.max_batch {
        return Err(ApiError::BadRequest(format!(
            "Batch of {} URLs exceeds the limit of {}",
            urls.len(),
            state.limits.max_batch
        )));
    }

    let cancel = CancellationToken::new();
    // Cancels outstanding fetches if the client goes away mid-batch.
    let _guard = cancel.clone().drop_guard();

    let timeout = state.limits.timeout;
    let contents = tokio::time::timeout(timeout, state.router.resolve_with_cancel(&urls, &cancel))
        .await
        .map_err(|_| {
            tracing::warn!(urls = urls.len(), timeout_secs = timeout.as_secs(), "Batch timed out");
            AppError::Fetch(FetchError::Timeout(timeout))
        })??;

    let response = ResolveResponse {
        requested: urls.len(),
        resolved: contents.len(),
        contents: contents.into_iter().map(ResolvedContent::from).collect(),
    };

    tracing::info!(
        requested = response.requested,
        resolved = response.resolved,
        "Batch resolved"
    );

    Ok(axum::Json(response))
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/backends",
    responses(
        (status = 200, description = "Circuit-breaker state per backend", body = BackendListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "backends"
)]
pub async fn list_backends(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = BackendListResponse {
        failure_threshold: state.engine.tracker().threshold(),
        backends: state
            .engine
            .backend_statuses()
            .into_iter()
            .map(BackendResponse::from)
            .collect(),
    };

    axum::Json(response)
}

#[utoipa::path(
    post,
    path = "/v1/backends/{name}/reset",
    params(
        ("name" = String, Path, description = "Backend name")
    ),
    responses(
        (status = 200, description = "Backend reset to available", body = BackendResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown backend", body = crate::dto::ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "backends"
)]
pub async fn reset_backend(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.engine.reset(&name) {
        return Err(ApiError::NotFound(format!("Backend '{name}' not found")));
    }
    tracing::info!(backend = %name, "Backend reset via API");

    let status = state
        .engine
        .backend_statuses()
        .into_iter()
        .find(|s| s.name == name)
        .map(BackendResponse::from)
        .ok_or_else(|| ApiError::NotFound(format!("Backend '{name}' not found")))?;

    Ok(axum::Json(status))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let statuses = state.engine.backend_statuses();
    let available = statuses.iter().filter(|s| s.available).count();

    let response = HealthResponse {
        status: if available == statuses.len() {
            "healthy"
        } else {
            "degraded"
        },
        backends_available: available,
        backends_total: statuses.len(),
    };

    (StatusCode::OK, axum::Json(response))
}
