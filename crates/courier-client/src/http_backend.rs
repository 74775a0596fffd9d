use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::error::{AppError, FetchError};
use courier_core::models::FetchedContent;
use courier_core::traits::{BackendKind, FetchBackend};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use url::{Host, Url};

pub const USER_AGENT: &str = "Courier/0.1 (content fetcher)";

/// Direct HTTP backend using reqwest.
///
/// Downloads the raw body with a configurable User-Agent and per-call
/// timeout. By default, SSRF protection is **enabled**: requests to
/// private/reserved IP ranges are blocked. Use
/// [`allow_private_urls`](Self::allow_private_urls) to disable this (e.g. for
/// CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    ssrf_protection: bool,
}

impl HttpBackend {
    pub fn new() -> Result<Self, AppError> {
        Self::with_user_agent(USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

#[async_trait]
impl FetchBackend for HttpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DirectHttp
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedContent, FetchError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?
            .to_vec();

        let title = if content_type.contains("html") {
            extract_title(&String::from_utf8_lossy(&bytes))
        } else {
            None
        };

        let mut content = FetchedContent::new(url, bytes, content_type)
            .with_meta("status", status.as_u16().to_string());
        if let Some(title) = title {
            content = content.with_title(title);
        }
        Ok(content)
    }
}

pub(crate) fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else if e.is_connect() {
        FetchError::Transport(format!("Connection failed: {e}"))
    } else if let Some(status) = e.status() {
        FetchError::HttpStatus {
            status: status.as_u16(),
            url: e.url().map(|u| u.to_string()).unwrap_or_default(),
        }
    } else {
        FetchError::Transport(e.to_string())
    }
}

/// Text of the document's first `<title>`, whitespace-collapsed.
fn extract_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);
    let title = document
        .select(&selector)
        .next()?
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
async fn validate_url(url: &str) -> Result<(), FetchError> {
    let parsed =
        Url::parse(url).map_err(|e| FetchError::Transport(format!("Invalid URL {url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FetchError::Transport(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = match parsed.host() {
        Some(Host::Ipv4(v4)) => return check_ip(IpAddr::V4(v4), url),
        Some(Host::Ipv6(v6)) => return check_ip(IpAddr::V6(v6), url),
        Some(Host::Domain(d)) => d,
        None => return Err(FetchError::Transport(format!("URL has no host: {url}"))),
    };

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| FetchError::Transport(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(FetchError::Transport(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    for socket_addr in &addrs {
        check_ip(socket_addr.ip(), url)?;
    }
    Ok(())
}

fn check_ip(ip: IpAddr, url: &str) -> Result<(), FetchError> {
    if is_private_ip(ip) {
        return Err(FetchError::Transport(format!(
            "SSRF blocked: {url} resolves to private/reserved IP {ip}"
        )));
    }
    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()    // 169.254.0.0/16 (cloud metadata)
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // fe80::/10
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // fc00::/7
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}
