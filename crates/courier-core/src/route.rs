//! Route rules and candidate ordering.

use crate::error::AppError;
use crate::glob::GlobPattern;
use crate::util::host_of;

/// Priority of the default catch-all rule.
pub const CATCH_ALL_PRIORITY: i64 = 999;

/// Maps URL and domain patterns to a backend. Lower `priority` wins.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RouteRule {
    /// Backend this rule routes to.
    pub name: String,
    #[serde(default, alias = "patterns")]
    pub url_patterns: Vec<String>,
    #[serde(default, alias = "domains")]
    pub domain_patterns: Vec<String>,
    pub priority: i64,
}

impl RouteRule {
    pub fn new(name: impl Into<String>, priority: i64) -> Self {
        Self {
            name: name.into(),
            url_patterns: Vec::new(),
            domain_patterns: Vec::new(),
            priority,
        }
    }

    /// The rule that matches every URL.
    pub fn catch_all(name: impl Into<String>) -> Self {
        Self::new(name, CATCH_ALL_PRIORITY)
            .with_url_pattern("*")
            .with_domain_pattern("*")
    }

    pub fn with_url_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.url_patterns.push(pattern.into());
        self
    }

    pub fn with_domain_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.domain_patterns.push(pattern.into());
        self
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: RouteRule,
    url_patterns: Vec<GlobPattern>,
    domain_patterns: Vec<GlobPattern>,
}

impl CompiledRule {
    fn compile(rule: RouteRule) -> Result<Self, AppError> {
        let url_patterns = rule
            .url_patterns
            .iter()
            .map(|p| GlobPattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let domain_patterns = rule
            .domain_patterns
            .iter()
            .map(|p| GlobPattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rule,
            url_patterns,
            domain_patterns,
        })
    }

    fn is_catch_all(&self) -> bool {
        self.url_patterns.iter().any(GlobPattern::is_catch_all)
    }

    fn matches(&self, url: &str, host: Option<&str>) -> bool {
        self.url_patterns.iter().any(|p| p.matches(url))
            || host.is_some_and(|h| self.domain_patterns.iter().any(|p| p.matches(h)))
    }
}

/// Orders candidate backends for a URL.
///
/// Rules are immutable after construction, so a selector can be shared
/// freely between concurrent fetches.
#[derive(Debug, Clone)]
pub struct RouteSelector {
    rules: Vec<CompiledRule>,
    default_backend: String,
}

impl RouteSelector {
    /// Compiles `rules`. Exactly one rule must carry the catch-all `*` URL
    /// pattern; it names the default backend.
    pub fn new(rules: Vec<RouteRule>) -> Result<Self, AppError> {
        let rules = rules
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let catch_all: Vec<&CompiledRule> = rules.iter().filter(|r| r.is_catch_all()).collect();
        let default_backend = match catch_all.as_slice() {
            [only] => only.rule.name.clone(),
            [] => {
                return Err(AppError::ConfigError(
                    "Route table needs a catch-all rule with URL pattern '*'".into(),
                ));
            }
            many => {
                let names: Vec<&str> = many.iter().map(|r| r.rule.name.as_str()).collect();
                return Err(AppError::ConfigError(format!(
                    "Route table has more than one catch-all rule: {}",
                    names.join(", ")
                )));
            }
        };

        Ok(Self {
            rules,
            default_backend,
        })
    }

    /// A table with just the catch-all rule for `backend`.
    pub fn single(backend: impl Into<String>) -> Result<Self, AppError> {
        Self::new(vec![RouteRule::catch_all(backend)])
    }

    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    pub fn rules(&self) -> impl Iterator<Item = &RouteRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    /// Ordered candidates for `url`: best match first, then every other
    /// backend by ascending priority.
    ///
    /// Backends for which `is_available` returns false are dropped. The
    /// result is never empty: if everything was filtered out, the default
    /// backend is returned on its own.
    pub fn select(&self, url: &str, is_available: impl Fn(&str) -> bool) -> Vec<String> {
        let host = host_of(url);

        let mut primary: Option<&CompiledRule> = None;
        for rule in &self.rules {
            if !is_available(&rule.rule.name) || !rule.matches(url, host.as_deref()) {
                continue;
            }
            // Strictly lower wins, so ties go to declaration order.
            if primary.is_none_or(|p| rule.rule.priority < p.rule.priority) {
                primary = Some(rule);
            }
        }

        let mut candidates: Vec<String> = Vec::with_capacity(self.rules.len());
        if let Some(p) = primary {
            candidates.push(p.rule.name.clone());
        } else if is_available(&self.default_backend) {
            candidates.push(self.default_backend.clone());
        }

        let mut others: Vec<&CompiledRule> = self.rules.iter().collect();
        others.sort_by_key(|r| r.rule.priority);
        for rule in others {
            let name = &rule.rule.name;
            if candidates.contains(name) || !is_available(name) {
                continue;
            }
            candidates.push(name.clone());
        }

        if candidates.is_empty() {
            tracing::debug!(
                url = %url,
                backend = %self.default_backend,
                "No available backend, falling back to default"
            );
            candidates.push(self.default_backend.clone());
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_available(_: &str) -> bool {
        true
    }

    fn table() -> RouteSelector {
        RouteSelector::new(vec![
            RouteRule::catch_all("http"),
            RouteRule::new("reader", 10)
                .with_domain_pattern("medium.com")
                .with_domain_pattern("*.medium.com"),
            RouteRule::new("browser", 5).with_url_pattern("*://app.*/dashboard*"),
        ])
        .unwrap()
    }

    #[test]
    fn test_requires_exactly_one_catch_all() {
        let err = RouteSelector::new(vec![RouteRule::new("reader", 1)]).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));

        let err = RouteSelector::new(vec![RouteRule::catch_all("a"), RouteRule::catch_all("b")])
            .unwrap_err();
        assert!(err.to_string().contains("more than one"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let rule = RouteRule::catch_all("http");
        let bad = RouteRule::new("reader", 1).with_domain_pattern("[z-a].com");
        let err = RouteSelector::new(vec![rule, bad]).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_every_url_gets_a_candidate() {
        let selector = table();
        for url in [
            "http://example.com",
            "https://x.y.z/a?b=c",
            "ftp://files.example.org/pub",
            "not even a url",
            "",
        ] {
            assert!(!selector.select(url, all_available).is_empty(), "{url}");
        }
    }

    #[test]
    fn test_domain_match_becomes_primary() {
        let selector = table();
        let candidates = selector.select("https://blog.medium.com/post/1", all_available);
        assert_eq!(candidates, vec!["reader", "browser", "http"]);
    }

    #[test]
    fn test_url_match_becomes_primary() {
        let selector = table();
        let candidates = selector.select("https://app.acme.io/dashboard/7", all_available);
        assert_eq!(candidates, vec!["browser", "reader", "http"]);
    }

    #[test]
    fn test_host_matching_is_case_insensitive() {
        let selector = table();
        let candidates = selector.select("https://MEDIUM.COM/@someone", all_available);
        assert_eq!(candidates[0], "reader");
    }

    #[test]
    fn test_unmatched_url_uses_catch_all_then_others() {
        let selector = table();
        let candidates = selector.select("https://example.com", all_available);
        assert_eq!(candidates, vec!["http", "browser", "reader"]);
    }

    #[test]
    fn test_lowest_priority_wins_among_matches() {
        let selector = RouteSelector::new(vec![
            RouteRule::catch_all("http"),
            RouteRule::new("reader", 20).with_domain_pattern("*.example.com"),
            RouteRule::new("browser", 3).with_url_pattern("*example.com*"),
        ])
        .unwrap();

        let candidates = selector.select("https://a.example.com", all_available);
        assert_eq!(candidates[0], "browser");
    }

    #[test]
    fn test_tie_goes_to_declaration_order() {
        let selector = RouteSelector::new(vec![
            RouteRule::new("first", 1).with_domain_pattern("*.example.com"),
            RouteRule::new("second", 1).with_domain_pattern("*.example.com"),
            RouteRule::catch_all("http"),
        ])
        .unwrap();

        let candidates = selector.select("https://a.example.com", all_available);
        assert_eq!(candidates, vec!["first", "second", "http"]);
    }

    #[test]
    fn test_unavailable_backends_are_skipped() {
        let selector = table();
        let candidates = selector.select("https://blog.medium.com/post/1", |b| b != "reader");
        assert_eq!(candidates, vec!["http", "browser"]);
    }

    #[test]
    fn test_unavailable_primary_falls_to_next_match() {
        let selector = RouteSelector::new(vec![
            RouteRule::catch_all("http"),
            RouteRule::new("reader", 1).with_domain_pattern("*.example.com"),
            RouteRule::new("browser", 2).with_domain_pattern("*.example.com"),
        ])
        .unwrap();

        let candidates = selector.select("https://a.example.com", |b| b != "reader");
        assert_eq!(candidates, vec!["browser", "http"]);
    }

    #[test]
    fn test_default_is_returned_when_everything_is_unavailable() {
        let selector = table();
        let candidates = selector.select("https://blog.medium.com", |_| false);
        assert_eq!(candidates, vec!["http"]);
    }

    #[test]
    fn test_duplicate_backend_names_are_deduplicated() {
        let selector = RouteSelector::new(vec![
            RouteRule::catch_all("http"),
            RouteRule::new("reader", 5).with_domain_pattern("a.com"),
            RouteRule::new("reader", 6).with_domain_pattern("b.com"),
        ])
        .unwrap();

        let candidates = selector.select("https://a.com", all_available);
        assert_eq!(candidates, vec!["reader", "http"]);
    }

    #[test]
    fn test_single_table() {
        let selector = RouteSelector::single("http").unwrap();
        assert_eq!(selector.default_backend(), "http");
        assert_eq!(selector.select("https://anything", all_available), vec!["http"]);
    }

    #[test]
    fn test_rule_deserializes_with_short_field_names() {
        let rule: RouteRule = serde_json::from_str(
            r#"{"name":"default","patterns":["*"],"domains":["*"],"priority":999}"#,
        )
        .unwrap();
        assert_eq!(rule, RouteRule::catch_all("default"));
    }
}
