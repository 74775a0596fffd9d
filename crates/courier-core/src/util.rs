use url::Url;

/// Lowercased host component of `url`, or `None` if it does not parse or has
/// no host.
///
/// Example: `"https://Blog.Example.com:8443/a"` → `"blog.example.com"`
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase())
}

/// Domain key used for per-host bookkeeping: `scheme://host:port`.
pub fn origin_key(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let host = url.host_str()?;
    let port = url
        .port_or_known_default()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    Some(format!("{}://{}{}", url.scheme(), host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(
            host_of("https://Blog.Example.com:8443/a?b=1").as_deref(),
            Some("blog.example.com")
        );
        assert_eq!(host_of("http://[::1]:80/").as_deref(), Some("::1"));
    }

    #[test]
    fn test_host_of_invalid() {
        assert_eq!(host_of("not-a-url"), None);
        assert_eq!(host_of("mailto:someone@example.com"), None);
    }

    #[test]
    fn test_origin_key() {
        assert_eq!(
            origin_key("https://example.com/path?q=1").as_deref(),
            Some("https://example.com:443")
        );
        assert_eq!(
            origin_key("http://example.com:8080/page").as_deref(),
            Some("http://example.com:8080")
        );
        assert_eq!(origin_key("not-a-url"), None);
    }
}
