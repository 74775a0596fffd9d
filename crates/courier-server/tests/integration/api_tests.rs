use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};

use courier_core::error::FetchError;
use courier_core::testutil::{MockBackend, MockResponse, transport_error};
use courier_server::state::RequestLimits;

use crate::integration::common::{
    TestOptions, authed, resolve_request, send, setup_test_app, setup_test_app_with,
};

fn find<'a>(contents: &'a serde_json::Value, url: &str) -> &'a serde_json::Value {
    contents
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["url"] == url)
        .unwrap_or_else(|| panic!("no content for {url}"))
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app();

    let (status, json) = send(
        &app.router,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["backends_total"], 2);
    assert_eq!(json["backends_available"], 2);
}

#[tokio::test]
async fn health_reports_degraded_backend() {
    let app = setup_test_app();
    app.reader.set_available(false);

    let (status, json) = send(
        &app.router,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["backends_available"], 1);
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app();

    let (status, json) = send(
        &app.router,
        Request::get("/v1/backends").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app();

    let (status, _) = send(
        &app.router,
        Request::get("/v1/backends")
            .header("authorization", "Bearer wrong-key")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn openapi_document_is_public() {
    let app = setup_test_app();

    let (status, json) = send(
        &app.router,
        Request::get("/api-docs/openapi.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/v1/resolve"].is_object());
    assert!(json["paths"]["/v1/backends/{name}/reset"].is_object());
}

#[tokio::test]
async fn resolve_dispatches_mixed_batch() {
    let app = setup_test_app();
    let so_url = "https://stackoverflow.com/questions/1/x";
    let page_url = "https://example.com/page";

    let (status, json) = send(&app.router, resolve_request(&[so_url, page_url])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["requested"], 2);
    assert_eq!(json["resolved"], 2);

    let so = find(&json["contents"], so_url);
    assert_eq!(so["text"], "so content");
    assert_eq!(so["meta"]["source"], "so");

    let page = find(&json["contents"], page_url);
    assert_eq!(page["backend"], "http");
    assert_eq!(page["text"], "<html>direct</html>");

    assert_eq!(app.so.batches(), vec![vec![so_url.to_string()]]);
    assert_eq!(app.http.requested_urls(), vec![page_url]);
}

#[tokio::test]
async fn resolve_falls_back_to_next_backend() {
    let app = setup_test_app_with(TestOptions {
        http: MockBackend::always_err(transport_error("connection reset")),
        ..TestOptions::default()
    });

    let (status, json) = send(&app.router, resolve_request(&["https://example.com/a"])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["resolved"], 1);
    assert_eq!(json["contents"][0]["backend"], "reader");
    assert_eq!(json["contents"][0]["text"], "# from reader");
}

#[tokio::test]
async fn soft_mode_omits_failed_urls() {
    let app = setup_test_app_with(TestOptions {
        http: MockBackend::always_err(transport_error("down")),
        reader: MockBackend::always_err(FetchError::HttpStatus {
            status: 503,
            url: "https://example.com/a".into(),
        }),
        ..TestOptions::default()
    });

    let (status, json) = send(
        &app.router,
        resolve_request(&["https://example.com/a", "https://stackoverflow.com/questions/2"]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["requested"], 2);
    assert_eq!(json["resolved"], 1);
    assert_eq!(
        json["contents"][0]["url"],
        "https://stackoverflow.com/questions/2"
    );
}

#[tokio::test]
async fn strict_mode_exhaustion_returns_502() {
    let app = setup_test_app_with(TestOptions {
        http: MockBackend::always_err(transport_error("down")),
        reader: MockBackend::always_err(transport_error("down too")),
        strict: true,
        ..TestOptions::default()
    });

    let (status, json) = send(&app.router, resolve_request(&["https://example.com/a"])).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "fetch_exhausted");
    assert!(
        json["message"]
            .as_str()
            .unwrap()
            .contains("https://example.com/a")
    );
}

#[tokio::test]
async fn resolver_failure_fails_whole_batch() {
    let app = setup_test_app();

    let (status, json) = send(
        &app.router,
        resolve_request(&["https://example.com/ok", "https://broken.example/thing"]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "resolver_error");
    assert!(json["message"].as_str().unwrap().contains("upstream API down"));
}

#[tokio::test]
async fn empty_batch_returns_400() {
    let app = setup_test_app();

    let (status, json) = send(&app.router, resolve_request(&["  "])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "bad_request");
}

#[tokio::test]
async fn oversized_batch_returns_400() {
    let app = setup_test_app_with(TestOptions {
        limits: RequestLimits {
            max_batch: 1,
            ..RequestLimits::default()
        },
        ..TestOptions::default()
    });

    let (status, json) = send(
        &app.router,
        resolve_request(&["https://a.com", "https://b.com"]),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["message"].as_str().unwrap().contains("limit of 1"));
}

#[tokio::test]
async fn slow_batch_returns_504() {
    let app = setup_test_app_with(TestOptions {
        http: MockBackend::scripted(
            Vec::new(),
            MockResponse::Delayed(Duration::from_secs(5), b"late".to_vec()),
        ),
        limits: RequestLimits {
            timeout: Duration::from_millis(100),
            ..RequestLimits::default()
        },
        ..TestOptions::default()
    });

    let (status, json) = send(&app.router, resolve_request(&["https://example.com/slow"])).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["error"], "timeout");
}

#[tokio::test]
async fn backends_report_breaker_state_and_reset() {
    let app = setup_test_app_with(TestOptions {
        reader: MockBackend::always_err(transport_error("quota")),
        ..TestOptions::default()
    });
    let url = "https://blog.medium.com/post";

    // Reader is primary for medium.com; each failure falls back to http.
    for _ in 0..3 {
        let (status, json) = send(&app.router, resolve_request(&[url])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["contents"][0]["backend"], "http");
    }

    let (status, json) = send(
        &app.router,
        authed(Request::get("/v1/backends"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["failure_threshold"], 3);

    let backends = json["backends"].as_array().unwrap();
    let names: Vec<&str> = backends.iter().map(|b| b["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["http", "reader"]);

    let reader = &backends[1];
    assert_eq!(reader["tracked"], true);
    assert_eq!(reader["available"], false);
    assert_eq!(reader["state"], "unavailable");
    assert_eq!(reader["consecutive_failures"], 3);
    assert!(reader["last_error"].as_str().unwrap().contains("quota"));

    // Breaker open: the reader is no longer tried.
    send(&app.router, resolve_request(&[url])).await;
    assert_eq!(app.reader.calls(), 3);

    let (status, json) = send(
        &app.router,
        authed(Request::post("/v1/backends/reader/reset"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "reader");
    assert_eq!(json["available"], true);
    assert_eq!(json["state"], "unknown");
    assert_eq!(json["consecutive_failures"], 0);

    send(&app.router, resolve_request(&[url])).await;
    assert_eq!(app.reader.calls(), 4);
}

#[tokio::test]
async fn reset_unknown_backend_returns_404() {
    let app = setup_test_app();

    let (status, json) = send(
        &app.router,
        authed(Request::post("/v1/backends/nope/reset"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}
