use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::FetchResolutionEngine;
use crate::error::AppError;
use crate::models::FetchedContent;
use crate::traits::ContentResolver;

/// The catch-all resolver: hands every URL to the resolution engine.
#[derive(Clone)]
pub struct GenericResolver {
    engine: Arc<FetchResolutionEngine>,
}

impl GenericResolver {
    pub const NAME: &'static str = "generic";

    pub fn new(engine: Arc<FetchResolutionEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<FetchResolutionEngine> {
        &self.engine
    }
}

#[async_trait]
impl ContentResolver for GenericResolver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_handle(&self, _url: &str) -> bool {
        true
    }

    async fn resolve(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedContent>, AppError> {
        self.engine.resolve_all(urls, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::testutil::MockBackend;

    #[tokio::test]
    async fn test_handles_everything_and_delegates() {
        let http = MockBackend::always_ok("<html>hi</html>");
        let engine = FetchResolutionEngine::builder(EngineConfig::default())
            .backend("http", http.clone())
            .build()
            .unwrap();
        let resolver = GenericResolver::new(Arc::new(engine));

        assert!(resolver.can_handle("http://anything.com"));
        assert!(resolver.can_handle("garbage"));

        let contents = resolver
            .resolve(&["http://a.com".to_string()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].as_text(), "<html>hi</html>");
        assert_eq!(http.requested_urls(), vec!["http://a.com"]);
    }
}
