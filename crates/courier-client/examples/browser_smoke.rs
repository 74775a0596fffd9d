/// Smoke-test for `BrowserBackend`.
///
/// Launches headless Chromium, renders <https://example.com> and checks the
/// result carries the expected heading and title.
///
/// Run with:
///   cargo run -p courier-client --example browser_smoke --features browser
use std::time::Duration;

use courier_client::BrowserBackend;
use courier_core::traits::{FetchBackend, HealthAware};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("Launching headless browser...");
    let backend = BrowserBackend::launch().await?;
    anyhow::ensure!(backend.is_available(), "browser reported unavailable");

    let url = "https://example.com";
    println!("Rendering {url}...");
    let content = backend.fetch(url, Duration::from_secs(30)).await?;
    let html = content.as_text();

    anyhow::ensure!(
        html.contains("<h1>Example Domain</h1>"),
        "expected <h1> not found in rendered HTML"
    );
    anyhow::ensure!(
        content.title.as_deref() == Some("Example Domain"),
        "unexpected title {:?}",
        content.title
    );

    println!("OK: {} bytes of rendered HTML", content.bytes.len());
    Ok(())
}
