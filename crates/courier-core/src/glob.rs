//! Case-insensitive shell-style wildcard matching.
//!
//! Supports `*`, `?`, `[abc]`, `[a-z]` and `[!abc]`. Patterns are compiled
//! once into anchored regexes.

use regex::Regex;

use crate::error::AppError;

/// A compiled wildcard pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, AppError> {
        let translated = translate(pattern);
        let regex = Regex::new(&format!("(?is)^{translated}$")).map_err(|e| {
            AppError::ConfigError(format!("Invalid glob pattern '{pattern}': {e}"))
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True for the bare `*` pattern.
    pub fn is_catch_all(&self) -> bool {
        self.source == "*"
    }
}

fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.push('[');
                    let mut j = i + 1;
                    if chars[j] == '!' {
                        out.push('^');
                        j += 1;
                    }
                    for &c in &chars[j..end] {
                        if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push(']');
                    i = end;
                }
                None => out.push_str(r"\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out
}

/// Index of the `]` closing the class opened at `start`, if any.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if j < chars.len() && chars[j] == '!' {
        j += 1;
    }
    // A leading `]` is a literal member.
    if j < chars.len() && chars[j] == ']' {
        j += 1;
    }
    while j < chars.len() {
        if chars[j] == ']' {
            return Some(j);
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pattern: &str, text: &str) -> bool {
        GlobPattern::new(pattern).unwrap().matches(text)
    }

    #[test]
    fn star_matches_everything() {
        assert!(m("*", ""));
        assert!(m("*", "http://anything.example/path?q=1"));
    }

    #[test]
    fn domain_wildcards() {
        assert!(m("*.example.com", "a.example.com"));
        assert!(m("*.example.com", "deep.sub.example.com"));
        assert!(!m("*.example.com", "example.com"));
        assert!(!m("*.example.com", "a.example.com.evil.net"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(m("*.PDF", "http://x.com/Report.pdf"));
        assert!(m("medium.com", "MEDIUM.COM"));
    }

    #[test]
    fn question_mark_and_classes() {
        assert!(m("v?.api.io", "v2.api.io"));
        assert!(!m("v?.api.io", "v10.api.io"));
        assert!(m("[ab]*", "beta"));
        assert!(!m("[!ab]*", "beta"));
        assert!(m("[a-c]x", "bx"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert!(m("*://x.com/a+b", "http://x.com/a+b"));
        assert!(!m("*://x.com/a+b", "http://x.com/aab"));
        assert!(m("(x)", "(x)"));
    }

    #[test]
    fn unterminated_class_is_literal() {
        assert!(m("[abc", "[abc"));
    }

    #[test]
    fn catch_all_detection() {
        assert!(GlobPattern::new("*").unwrap().is_catch_all());
        assert!(!GlobPattern::new("*.com").unwrap().is_catch_all());
    }
}
