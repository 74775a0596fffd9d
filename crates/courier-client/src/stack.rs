//! Assembly of the standard resolver stack used by the CLI and the server:
//! Stack Overflow and GitHub issue resolvers in front of a generic engine
//! backed by direct HTTP and, optionally, the reader service.

use std::sync::Arc;

use courier_core::config::EngineConfig;
use courier_core::engine::FetchResolutionEngine;
use courier_core::error::AppError;
use courier_core::resolver::GenericResolver;
use courier_core::route::RouteRule;
use courier_core::router::ContentRouter;
use courier_core::throttle::{ThrottleConfig, ThrottledBackend};
use courier_core::traits::ContentResolver;

use crate::github::GithubIssueResolver;
use crate::http_backend::HttpBackend;
use crate::reader_backend::{DEFAULT_READER_URL, ReaderBackend};
use crate::stackoverflow::StackOverflowResolver;

pub const HTTP_BACKEND: &str = "http";
pub const READER_BACKEND: &str = "reader";
#[cfg(feature = "browser")]
pub const BROWSER_BACKEND: &str = "browser";

/// Priority of the reader rule added when the config has none.
const READER_PRIORITY: i64 = 10;

/// Builder for the standard [`ContentRouter`].
#[derive(Debug, Clone)]
pub struct StandardStack {
    config: EngineConfig,
    reader_url: Option<String>,
    reader_api_key: Option<String>,
    github_token: Option<String>,
    stackoverflow_api_key: Option<String>,
    allow_private_urls: bool,
    throttle: Option<ThrottleConfig>,
    #[cfg(feature = "browser")]
    browser: bool,
}

/// The assembled router plus a handle on its engine for health queries.
pub struct Stack {
    pub router: ContentRouter,
    pub engine: Arc<FetchResolutionEngine>,
}

impl StandardStack {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            reader_url: Some(DEFAULT_READER_URL.to_string()),
            reader_api_key: None,
            github_token: None,
            stackoverflow_api_key: None,
            allow_private_urls: false,
            throttle: None,
            #[cfg(feature = "browser")]
            browser: false,
        }
    }

    pub fn with_reader(mut self, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        self.reader_url = Some(base_url.into());
        self.reader_api_key = api_key;
        self
    }

    pub fn without_reader(mut self) -> Self {
        self.reader_url = None;
        self
    }

    pub fn with_github_token(mut self, token: Option<String>) -> Self {
        self.github_token = token;
        self
    }

    pub fn with_stackoverflow_key(mut self, key: Option<String>) -> Self {
        self.stackoverflow_api_key = key;
        self
    }

    /// Disables SSRF protection on the direct HTTP backend.
    pub fn allow_private_urls(mut self, allow: bool) -> Self {
        self.allow_private_urls = allow;
        self
    }

    /// Spaces out direct HTTP requests to the same origin.
    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = Some(throttle);
        self
    }

    #[cfg(feature = "browser")]
    pub fn with_browser(mut self, enabled: bool) -> Self {
        self.browser = enabled;
        self
    }

    /// Route rules the engine will run with. A reader rule for JS-heavy
    /// publishing sites is added when the reader is enabled and the config
    /// has no rule for it.
    pub fn routes(&self) -> Vec<RouteRule> {
        let mut routes = self.config.routes.clone();
        if self.reader_url.is_some() && !routes.iter().any(|r| r.name == READER_BACKEND) {
            routes.push(
                RouteRule::new(READER_BACKEND, READER_PRIORITY)
                    .with_domain_pattern("medium.com")
                    .with_domain_pattern("*.medium.com")
                    .with_domain_pattern("*.substack.com"),
            );
        }
        routes
    }

    pub async fn build(self) -> Result<Stack, AppError> {
        let config = self.config.clone().with_routes(self.routes());

        let mut http = HttpBackend::new()?;
        if self.allow_private_urls {
            http = http.allow_private_urls();
        }

        let mut builder = FetchResolutionEngine::builder(config);
        builder = match self.throttle {
            Some(throttle) => builder.backend(HTTP_BACKEND, ThrottledBackend::new(http, throttle)),
            None => builder.backend(HTTP_BACKEND, http),
        };
        if let Some(url) = &self.reader_url {
            let reader = ReaderBackend::with_base_url(url, self.reader_api_key.clone())?;
            builder = builder.tracked_backend(READER_BACKEND, reader);
        }
        #[cfg(feature = "browser")]
        if self.browser {
            let browser = crate::browser_backend::BrowserBackend::launch().await?;
            builder = builder.tracked_backend(BROWSER_BACKEND, browser);
        }

        let engine = Arc::new(builder.build()?);

        let domain: Vec<Arc<dyn ContentResolver>> = vec![
            Arc::new(StackOverflowResolver::new(self.stackoverflow_api_key)?),
            Arc::new(GithubIssueResolver::new(self.github_token)?),
        ];
        let router = ContentRouter::new(domain, GenericResolver::new(engine.clone()));

        tracing::info!(
            resolvers = ?router.resolvers().map(|r| r.name()).collect::<Vec<_>>(),
            backends = engine.backend_statuses().len(),
            "Resolver stack ready"
        );

        Ok(Stack { router, engine })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_rule_added_once() {
        let stack = StandardStack::new(EngineConfig::default());
        let names: Vec<String> = stack.routes().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["http", "reader"]);

        let custom = EngineConfig::default().with_route(RouteRule::new(READER_BACKEND, 1));
        let stack = StandardStack::new(custom);
        assert_eq!(stack.routes().len(), 2);

        let stack = StandardStack::new(EngineConfig::default()).without_reader();
        assert_eq!(stack.routes().len(), 1);
    }

    #[tokio::test]
    async fn test_builds_router_with_domain_resolvers_first() {
        let stack = StandardStack::new(EngineConfig::default())
            .with_reader("http://127.0.0.1:9", None)
            .build()
            .await
            .unwrap();

        let names: Vec<&str> = stack.router.resolvers().map(|r| r.name()).collect();
        assert_eq!(names, vec!["stackoverflow", "github_issue", "generic"]);

        assert_eq!(
            stack
                .router
                .resolver_for("https://stackoverflow.com/questions/1/x")
                .unwrap(),
            "stackoverflow"
        );
        assert_eq!(
            stack
                .router
                .resolver_for("https://github.com/a/b/issues/2")
                .unwrap(),
            "github_issue"
        );
        assert_eq!(stack.router.resolver_for("https://example.com").unwrap(), "generic");

        assert_eq!(
            stack.engine.candidates("https://blog.medium.com/post"),
            vec!["reader", "http"]
        );
        assert_eq!(stack.engine.candidates("https://example.com"), vec!["http", "reader"]);
    }

    #[tokio::test]
    async fn test_route_to_unregistered_backend_fails() {
        let config = EngineConfig::default().with_route(RouteRule::new("browser", 5));
        let err = StandardStack::new(config).build().await.err().unwrap();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
