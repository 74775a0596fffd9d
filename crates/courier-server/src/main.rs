use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use courier_client::StandardStack;
use courier_client::reader_backend::DEFAULT_READER_URL;
use courier_core::config::EngineConfig;
use courier_server::routes;
use courier_server::state::{AppState, RequestLimits};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("courier=info".parse()?))
        .with_target(false)
        .init();

    let api_key =
        std::env::var("COURIER_SERVER_API_KEY").context("COURIER_SERVER_API_KEY must be set")?;
    let port = std::env::var("COURIER_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let config = EngineConfig::from_env()?;
    let limits = RequestLimits::from_env()?;

    let mut stack = StandardStack::new(config)
        .with_github_token(env_opt("GITHUB_TOKEN"))
        .with_stackoverflow_key(env_opt("STACKOVERFLOW_API_KEY"));
    stack = if env_flag("COURIER_DISABLE_READER") {
        stack.without_reader()
    } else {
        stack.with_reader(
            env_opt("COURIER_READER_URL").unwrap_or_else(|| DEFAULT_READER_URL.to_string()),
            env_opt("COURIER_READER_API_KEY"),
        )
    };
    #[cfg(feature = "browser")]
    {
        stack = stack.with_browser(env_flag("COURIER_BROWSER"));
    }
    let stack = stack.build().await?;

    let state = Arc::new(AppState {
        router: stack.router,
        engine: stack.engine,
        api_key,
        limits,
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str) -> bool {
    env_opt(key).is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
