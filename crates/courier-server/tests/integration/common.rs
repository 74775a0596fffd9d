use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use tower::ServiceExt;

use courier_core::config::{BackendSettings, EngineConfig};
use courier_core::engine::FetchResolutionEngine;
use courier_core::resolver::GenericResolver;
use courier_core::retry::RetryPolicy;
use courier_core::route::RouteRule;
use courier_core::router::ContentRouter;
use courier_core::testutil::{MockBackend, MockResolver};
use courier_core::traits::ContentResolver;
use courier_server::routes;
use courier_server::state::{AppState, RequestLimits};

pub const TEST_API_KEY: &str = "test-secret-key";

pub struct TestApp {
    pub router: Router,
    pub http: MockBackend,
    pub reader: MockBackend,
    pub so: MockResolver,
}

pub struct TestOptions {
    pub http: MockBackend,
    pub reader: MockBackend,
    pub strict: bool,
    pub limits: RequestLimits,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            http: MockBackend::always_ok("<html>direct</html>"),
            reader: MockBackend::always_ok("# from reader"),
            strict: false,
            limits: RequestLimits::default(),
        }
    }
}

/// App with mock backends `http` (catch-all) and `reader` (medium.com), a
/// mock Stack Overflow resolver and a resolver that always fails for
/// `broken.example`. Retries are disabled so failures are immediate.
pub fn setup_test_app() -> TestApp {
    setup_test_app_with(TestOptions::default())
}

pub fn setup_test_app_with(options: TestOptions) -> TestApp {
    let config = EngineConfig::default()
        .with_route(RouteRule::new("reader", 10).with_domain_pattern("*.medium.com"))
        .with_default_settings(BackendSettings::default().with_retry(RetryPolicy::no_retry()))
        .with_strict_mode(options.strict);

    let engine = FetchResolutionEngine::builder(config)
        .backend("http", options.http.clone())
        .tracked_backend("reader", options.reader.clone())
        .build()
        .expect("valid test engine");
    let engine = Arc::new(engine);

    let so = MockResolver::new("so", &["stackoverflow.com"]);
    let domain: Vec<Arc<dyn ContentResolver>> = vec![
        Arc::new(so.clone()),
        Arc::new(MockResolver::failing("broken", &["broken.example"], "upstream API down")),
    ];
    let router = ContentRouter::new(domain, GenericResolver::new(engine.clone()));

    let state = Arc::new(AppState {
        router,
        engine,
        api_key: TEST_API_KEY.to_string(),
        limits: options.limits,
    });

    TestApp {
        router: routes::router(state),
        http: options.http,
        reader: options.reader,
        so,
    }
}

pub fn authed(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder.header("authorization", format!("Bearer {TEST_API_KEY}"))
}

pub fn resolve_request(urls: &[&str]) -> Request<Body> {
    authed(Request::post("/v1/resolve"))
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "urls": urls }).to_string(),
        ))
        .unwrap()
}

/// Sends `request` to a clone of `router` and returns status plus JSON body.
pub async fn send(router: &Router, request: Request<Body>) -> (axum::http::StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}
