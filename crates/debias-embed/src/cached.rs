//! Provider wrapper that memoizes embeddings in the SQLite cache.

use crate::cache::SqliteEmbeddingCache;
use crate::error::Result;
use crate::provider::EmbeddingProvider;
use std::sync::Arc;

/// Looks embeddings up in a cache before asking the inner provider
#[derive(Debug, Clone)]
pub struct CachedProvider<P> {
    inner: P,
    cache: Arc<SqliteEmbeddingCache>,
}

impl<P: EmbeddingProvider> CachedProvider<P> {
    /// Wrap `inner` with `cache`
    pub const fn new(inner: P, cache: Arc<SqliteEmbeddingCache>) -> Self {
        Self { inner, cache }
    }

    /// The backing cache
    pub const fn cache(&self) -> &Arc<SqliteEmbeddingCache> {
        &self.cache
    }
}

#[async_trait::async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedProvider<P> {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f64>> {
        if let Some(vector) = self.cache.get(model, text)? {
            tracing::debug!(model, "embedding cache hit");
            return Ok(vector);
        }

        tracing::debug!(model, "embedding cache miss");
        let vector = self.inner.embed(text, model).await?;
        self.cache.put(model, text, &vector)?;
        Ok(vector)
    }
}
