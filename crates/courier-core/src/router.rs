//! Batch dispatch across content resolvers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::FetchedContent;
use crate::resolver::GenericResolver;
use crate::traits::ContentResolver;

/// Dispatches a batch of URLs to the first resolver that claims each one.
///
/// The generic resolver is always consulted last, so every URL has a home.
/// Resolvers are fixed at construction.
pub struct ContentRouter {
    resolvers: Vec<Arc<dyn ContentResolver>>,
}

impl ContentRouter {
    /// `domain_resolvers` are consulted in order, then `generic`.
    pub fn new(domain_resolvers: Vec<Arc<dyn ContentResolver>>, generic: GenericResolver) -> Self {
        let mut resolvers = domain_resolvers;
        resolvers.push(Arc::new(generic));
        Self { resolvers }
    }

    pub fn resolvers(&self) -> impl Iterator<Item = &dyn ContentResolver> {
        self.resolvers.iter().map(|r| r.as_ref())
    }

    /// Index of the first resolver whose `can_handle` accepts `url`.
    fn select(&self, url: &str) -> Result<usize, AppError> {
        self.resolvers
            .iter()
            .position(|r| r.can_handle(url))
            .ok_or_else(|| AppError::ConfigError(format!("No resolver can handle {url}")))
    }

    /// Name of the resolver that would handle `url`.
    pub fn resolver_for(&self, url: &str) -> Result<&str, AppError> {
        Ok(self.resolvers[self.select(url)?].name())
    }

    /// Groups `urls` by resolver, preserving input order inside each group.
    /// Groups are ordered by first appearance in `urls`.
    pub fn group<'a>(&self, urls: &'a [String]) -> Result<Vec<(usize, Vec<&'a String>)>, AppError> {
        let mut groups: Vec<(usize, Vec<&'a String>)> = Vec::new();
        for url in urls {
            let idx = self.select(url)?;
            match groups.iter_mut().find(|(i, _)| *i == idx) {
                Some((_, group)) => group.push(url),
                None => groups.push((idx, vec![url])),
            }
        }
        Ok(groups)
    }

    pub async fn resolve(&self, urls: &[String]) -> Result<Vec<FetchedContent>, AppError> {
        self.resolve_with_cancel(urls, &CancellationToken::new()).await
    }

    /// Resolves the batch. Each resolver is called once with its whole group.
    ///
    /// The result may be shorter than `urls` and ordering across groups is
    /// unspecified: match results on their URL. A resolver error fails the
    /// whole batch.
    pub async fn resolve_with_cancel(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedContent>, AppError> {
        let groups = self.group(urls)?;
        let mut results = Vec::with_capacity(urls.len());

        for (idx, group) in groups {
            let resolver = &self.resolvers[idx];
            let batch: Vec<String> = group.into_iter().cloned().collect();

            tracing::debug!(
                resolver = %resolver.name(),
                urls = batch.len(),
                "Dispatching URLs to resolver"
            );

            let contents = resolver.resolve(&batch, cancel).await.inspect_err(|e| {
                tracing::error!(resolver = %resolver.name(), error = %e, "Resolver failed");
            })?;

            if contents.len() < batch.len() {
                tracing::warn!(
                    resolver = %resolver.name(),
                    requested = batch.len(),
                    resolved = contents.len(),
                    "Resolver returned partial results"
                );
            }
            results.extend(contents);
        }

        Ok(results)
    }
}

impl std::fmt::Debug for ContentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.resolvers.iter().map(|r| r.name()).collect();
        f.debug_struct("ContentRouter").field("resolvers", &names).finish()
    }
}
