use std::sync::Arc;

use courier_core::error::AppError;
use htmd::HtmlToMarkdown;

/// HTML-to-Markdown converter using htmd.
///
/// Strips non-content elements (script, style, nav, ...) so resolvers can
/// hand back readable Markdown instead of raw markup.
#[derive(Clone)]
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    pub fn to_markdown(&self, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map_err(|e| AppError::Generic(format!("HTML to Markdown conversion failed: {e}")))
    }

    /// Like [`to_markdown`](Self::to_markdown), but falls back to the input
    /// when conversion fails.
    pub fn to_markdown_lossy(&self, html: &str) -> String {
        self.to_markdown(html).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Keeping raw HTML");
            html.to_string()
        })
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}
