use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use courier_core::error::{AppError, FetchError};
use courier_core::models::FetchedContent;
use courier_core::traits::{BackendKind, FetchBackend, HealthAware};
use futures::StreamExt;

/// Headless-render backend using Chromium via the Chrome DevTools Protocol.
///
/// Renders JavaScript before returning the DOM, for SPAs and pages with
/// lazy-loaded content. One Chromium process is shared across clones; each
/// fetch opens a tab, reads the rendered HTML and closes the tab.
///
/// The backend reports itself unavailable once the CDP connection drops.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use courier_client::BrowserBackend;
/// use courier_core::traits::FetchBackend;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = BrowserBackend::launch().await?;
/// let content = backend.fetch("https://example.com", Duration::from_secs(30)).await?;
/// println!("{}", content.title.unwrap_or_default());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserBackend {
    browser: Arc<Browser>,
    connected: Arc<AtomicBool>,
}

impl BrowserBackend {
    /// Launches headless Chromium.
    ///
    /// Requires a Chromium / Chrome binary; `CHROME_BIN` overrides the lookup.
    pub async fn launch() -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        // The snap wrapper at /snap/bin/chromium drops headless flags, so
        // prefer the real binary when one can be found.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Generic(format!("Failed to launch browser: {e}")))?;

        let connected = Arc::new(AtomicBool::new(true));
        let flag = connected.clone();
        // The CDP handler must be polled for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
            tracing::warn!("Browser connection closed");
        });

        Ok(Self {
            browser: Arc::new(browser),
            connected,
        })
    }
}

/// Upper bound for closing a tab once rendering is over.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Renders `url` in a fresh tab and closes the tab whatever the outcome.
///
/// Navigation runs under its own deadline once the tab exists, so the tab
/// is closed after a timeout too.
async fn render(
    browser: &Browser,
    url: &str,
    timeout: Duration,
) -> Result<(String, Option<String>), FetchError> {
    let page = tokio::time::timeout(timeout, browser.new_page("about:blank"))
        .await
        .map_err(|_| FetchError::Timeout(timeout))?
        .map_err(|e| FetchError::Transport(format!("Failed to open tab: {e}")))?;

    let rendered = match tokio::time::timeout(timeout, read_page(&page, url)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    };

    match tokio::time::timeout(CLOSE_TIMEOUT, page.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(url, error = %e, "Failed to close tab"),
        Err(_) => tracing::warn!(url, "Timed out closing tab"),
    }
    rendered
}

async fn read_page(page: &Page, url: &str) -> Result<(String, Option<String>), FetchError> {
    page.goto(url)
        .await
        .map_err(|e| FetchError::Transport(format!("Failed to navigate to {url}: {e}")))?;

    page.find_element("body")
        .await
        .map_err(|e| FetchError::Transport(format!("Page did not render body: {e}")))?;

    let html = page
        .content()
        .await
        .map_err(|e| FetchError::Transport(format!("Failed to read page content: {e}")))?;
    let title = page.get_title().await.ok().flatten();
    Ok((html, title))
}

#[async_trait]
impl FetchBackend for BrowserBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::HeadlessRender
    }

    fn enforces_timeout(&self) -> bool {
        true
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedContent, FetchError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("Browser is not connected".into()));
        }

        // Detached so the tab still gets closed if this future is dropped.
        let browser = self.browser.clone();
        let target = url.to_string();
        let (html, title) =
            tokio::spawn(async move { render(&browser, &target, timeout).await })
                .await
                .map_err(|e| FetchError::Transport(format!("Render task failed: {e}")))??;

        let mut content = FetchedContent::text(url, html, "text/html").with_meta("rendered", "true");
        if let Some(title) = title {
            content = content.with_title(title);
        }
        Ok(content)
    }
}

impl HealthAware for BrowserBackend {
    fn is_available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Locates a real Chrome/Chromium binary, or `None` to let chromiumoxide
/// do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists())
}
