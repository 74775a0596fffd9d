use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use courier_core::error::{AppError, FetchError};
use courier_core::models::FetchedContent;
use courier_core::traits::{BackendKind, FetchBackend, HealthAware};
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;

use crate::http_backend::{USER_AGENT, map_reqwest_error};

pub const DEFAULT_READER_URL: &str = "https://r.jina.ai";

/// How long the backend reports itself unavailable after the service says
/// the quota is exhausted.
const DEFAULT_QUOTA_COOLDOWN: Duration = Duration::from_secs(60);

/// Reader-service backend: delegates rendering and text extraction to a
/// remote service reached at `{base_url}/{url}`.
///
/// The service answers JSON with `content`, `title` and `content_type`,
/// either at the top level or inside a `data` object.
#[derive(Clone)]
pub struct ReaderBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    quota_cooldown: Duration,
    quota_exhausted_at: Arc<Mutex<Option<Instant>>>,
}

#[derive(Debug, Default, Deserialize)]
struct ReaderPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    data: Option<Box<ReaderPayload>>,
}

impl ReaderPayload {
    /// Prefers the nested `data` object when it carries content.
    fn flatten(self) -> (String, Option<String>, Option<String>) {
        if let Some(data) = self.data
            && data.content.is_some()
        {
            return (
                data.content.unwrap_or_default(),
                data.title,
                data.content_type,
            );
        }
        (
            self.content.unwrap_or_default(),
            self.title,
            self.content_type,
        )
    }
}

impl ReaderBackend {
    pub fn new(api_key: Option<String>) -> Result<Self, AppError> {
        Self::with_base_url(DEFAULT_READER_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            quota_cooldown: DEFAULT_QUOTA_COOLDOWN,
            quota_exhausted_at: Arc::new(Mutex::new(None)),
        })
    }

    pub fn with_quota_cooldown(mut self, cooldown: Duration) -> Self {
        self.quota_cooldown = cooldown;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn lock_quota(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.quota_exhausted_at.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned reader quota mutex");
            poisoned.into_inner()
        })
    }

    fn mark_quota_exhausted(&self, status: u16) {
        tracing::warn!(
            status,
            cooldown_secs = self.quota_cooldown.as_secs(),
            "Reader service quota exhausted"
        );
        *self.lock_quota() = Some(Instant::now());
    }
}

#[async_trait]
impl FetchBackend for ReaderBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ReaderService
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedContent, FetchError> {
        let endpoint = format!("{}/{}", self.base_url, url);
        let mut request = self
            .client
            .get(&endpoint)
            .timeout(timeout)
            .header(ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 402 || status.as_u16() == 429 {
                self.mark_quota_exhausted(status.as_u16());
            }
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let payload: ReaderPayload = response
            .json()
            .await
            .map_err(|e| FetchError::Transport(format!("Invalid reader response: {e}")))?;
        let (text, title, content_type) = payload.flatten();

        let mut content = FetchedContent::text(
            url,
            text,
            content_type.as_deref().unwrap_or("text/markdown"),
        )
        .with_meta("source", "reader");
        if let Some(title) = title {
            content = content.with_title(title);
        }
        Ok(content)
    }
}

impl HealthAware for ReaderBackend {
    fn is_available(&self) -> bool {
        let mut exhausted = self.lock_quota();
        match *exhausted {
            Some(at) if at.elapsed() < self.quota_cooldown => false,
            Some(_) => {
                *exhausted = None;
                true
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::response::{IntoResponse, Response};
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn reader(uri: Uri, headers: HeaderMap) -> Response {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        match uri.path() {
            t if t.ends_with("nested") => Json(json!({
                "code": 200,
                "data": {"title": "Nested", "content": "# Nested body"}
            }))
            .into_response(),
            t if t.ends_with("quota") => StatusCode::TOO_MANY_REQUESTS.into_response(),
            t if t.ends_with("empty") => Json(json!({"content": ""})).into_response(),
            _ => Json(json!({
                "title": "Flat",
                "content": format!("auth={auth}"),
                "content_type": "text/plain"
            }))
            .into_response(),
        }
    }

    async fn serve() -> SocketAddr {
        let app = Router::new().fallback(reader);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_reads_top_level_payload_and_sends_key() {
        let addr = serve().await;
        let backend =
            ReaderBackend::with_base_url(&format!("http://{addr}/"), Some("secret".into())).unwrap();

        let content = backend
            .fetch("https://example.com/flat", TIMEOUT)
            .await
            .unwrap();

        assert_eq!(content.url, "https://example.com/flat");
        assert_eq!(content.as_text(), "auth=Bearer secret");
        assert_eq!(content.content_type, "text/plain");
        assert_eq!(content.title.as_deref(), Some("Flat"));
        assert_eq!(backend.kind(), BackendKind::ReaderService);
    }

    #[tokio::test]
    async fn test_reads_nested_data_and_defaults_to_markdown() {
        let addr = serve().await;
        let backend = ReaderBackend::with_base_url(&format!("http://{addr}"), None).unwrap();

        let content = backend
            .fetch("https://example.com/nested", TIMEOUT)
            .await
            .unwrap();

        assert_eq!(content.as_text(), "# Nested body");
        assert_eq!(content.content_type, "text/markdown");
        assert_eq!(content.title.as_deref(), Some("Nested"));
    }

    #[tokio::test]
    async fn test_empty_content_is_returned_as_empty() {
        let addr = serve().await;
        let backend = ReaderBackend::with_base_url(&format!("http://{addr}"), None).unwrap();

        let content = backend
            .fetch("https://example.com/empty", TIMEOUT)
            .await
            .unwrap();
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn test_quota_marks_backend_unavailable_until_cooldown() {
        let addr = serve().await;
        let backend = ReaderBackend::with_base_url(&format!("http://{addr}"), None)
            .unwrap()
            .with_quota_cooldown(Duration::from_millis(100));
        assert!(backend.is_available());

        let err = backend
            .fetch("https://example.com/quota", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 429, .. }));
        assert!(!backend.is_available());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(backend.is_available());
    }

    #[test]
    fn test_blank_key_is_ignored() {
        let backend = ReaderBackend::new(Some("  ".into())).unwrap();
        assert!(backend.api_key.is_none());
        assert_eq!(backend.base_url(), DEFAULT_READER_URL);
    }
}
