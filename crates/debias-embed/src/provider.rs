//! Embedding provider trait and bounded retry wrapper.

use crate::error::{EmbeddingError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Maps question text to a fixed-length embedding vector.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text` with the embedding model `model`.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f64>>;
}

#[async_trait::async_trait]
impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<P> {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f64>> {
        (**self).embed(text, model).await
    }
}

/// Retry policy for transient embedding failures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3)
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds, doubled on each retry (default: 500)
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero-based): base · 2^min(attempt, 5)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u64.pow(attempt.min(5));
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier))
    }
}

/// Retries retryable failures of an inner provider with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryingProvider<P> {
    inner: P,
    config: RetryConfig,
}

impl<P: EmbeddingProvider> RetryingProvider<P> {
    /// Wrap `inner` with the default retry policy
    pub fn new(inner: P) -> Self {
        Self::with_config(inner, RetryConfig::default())
    }

    /// Wrap `inner` with a custom retry policy
    pub const fn with_config(inner: P, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Get the retry policy
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Get the wrapped provider
    pub const fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for RetryingProvider<P> {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f64>> {
        let mut attempt = 0;
        loop {
            match self.inner.embed(text, model).await {
                Ok(vector) => return Ok(vector),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying embedding request"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!(attempts = attempt + 1, error = %err, "embedding retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Returns a fixed vector per known text; unknown texts are malformed.
///
/// Handy for offline runs where embeddings were computed ahead of time.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    vectors: std::collections::HashMap<String, Vec<f64>>,
}

impl StaticProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the vector for `text`
    pub fn with(mut self, text: impl Into<String>, vector: Vec<f64>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }

    /// Number of registered texts
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether no texts are registered
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<f64>)> for StaticProvider {
    fn from_iter<I: IntoIterator<Item = (S, Vec<f64>)>>(iter: I) -> Self {
        Self {
            vectors: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for StaticProvider {
    async fn embed(&self, text: &str, _model: &str) -> Result<Vec<f64>> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::Malformed(format!("no embedding registered for '{text}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `failures` times with `status`, then succeeds
    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
        status: u16,
    }

    impl Flaky {
        fn new(failures: usize, status: u16) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
                status,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for Flaky {
        async fn embed(&self, _text: &str, _model: &str) -> Result<Vec<f64>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(EmbeddingError::Status {
                    status: self.status,
                    message: "flaky".to_string(),
                })
            } else {
                Ok(vec![1.0, 2.0])
            }
        }
    }

    fn no_delay(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 0,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(config.backoff_delay(5), Duration::from_millis(16_000));
        assert_eq!(config.backoff_delay(9), Duration::from_millis(16_000));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let provider = RetryingProvider::with_config(Flaky::new(2, 503), no_delay(3));
        let vector = provider.embed("q", "m").await.unwrap();
        assert_eq!(vector, vec![1.0, 2.0]);
        assert_eq!(provider.inner().calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let provider = RetryingProvider::with_config(Flaky::new(10, 429), no_delay(3));
        let err = provider.embed("q", "m").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Status { status: 429, .. }));
        assert_eq!(provider.inner().calls(), 4);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let provider = RetryingProvider::with_config(Flaky::new(10, 400), no_delay(3));
        assert!(provider.embed("q", "m").await.is_err());
        assert_eq!(provider.inner().calls(), 1);
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider: StaticProvider = [("a", vec![0.5, 0.25])].into_iter().collect();
        assert_eq!(provider.embed("a", "any").await.unwrap(), vec![0.5, 0.25]);
        assert!(matches!(
            provider.embed("b", "any").await.unwrap_err(),
            EmbeddingError::Malformed(_)
        ));
    }
}
