//! Long-lived debiasing service.
//!
//! Holds the current fitted model as a shared, read-only `Arc<BiasModel>`.
//! The model is replaced only when a fit succeeds, so a failed refit keeps
//! serving the previous model. A single atomic flag keeps two fits from
//! running at once.

use crate::error::{Result, ServiceError};
use crate::pipeline::{FactorPipelineFit, PipelineConfig, fit_factor_model, fit_transfer_model};
use debias_embed::EmbeddingProvider;
use debias_model::{BiasModel, CalibrationSet, DebiasTransform, DebiasedResult, NewQuestionItem};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// One question to debias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebiasRequest {
    /// Question text
    #[serde(rename = "Question")]
    pub question_text: String,

    /// Raw simulated responses
    #[serde(rename = "llm_resp")]
    pub raw_llm_responses: Vec<f64>,

    /// Precomputed embedding; fetched from the provider when absent
    #[serde(rename = "Embedding", default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
}

impl DebiasRequest {
    /// Request without a precomputed embedding.
    pub fn new(question_text: impl Into<String>, raw_llm_responses: Vec<f64>) -> Self {
        Self {
            question_text: question_text.into(),
            raw_llm_responses,
            embedding: None,
        }
    }

    /// Attach a precomputed embedding.
    pub fn with_embedding(mut self, embedding: Vec<f64>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Releases the fit flag when dropped
#[derive(Debug)]
pub struct FitGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FitGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Fits, caches and applies bias models
#[derive(Debug)]
pub struct DebiasService<P> {
    provider: P,
    config: PipelineConfig,
    model: RwLock<Option<Arc<BiasModel>>>,
    fitting: AtomicBool,
}

impl<P: EmbeddingProvider> DebiasService<P> {
    /// Create a service with no model yet.
    pub const fn new(provider: P, config: PipelineConfig) -> Self {
        Self {
            provider,
            config,
            model: RwLock::new(None),
            fitting: AtomicBool::new(false),
        }
    }

    /// Create a service serving an already fitted model.
    pub fn with_model(provider: P, config: PipelineConfig, model: BiasModel) -> Result<Self> {
        let service = Self::new(provider, config);
        service.install(model)?;
        Ok(service)
    }

    /// Get the configuration
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Get the embedding provider
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// The current model.
    ///
    /// # Errors
    /// [`ServiceError::NoModel`] before the first successful fit or install.
    pub fn model(&self) -> Result<Arc<BiasModel>> {
        let guard = self
            .model
            .read()
            .map_err(|e| ServiceError::State(e.to_string()))?;
        guard.clone().ok_or(ServiceError::NoModel)
    }

    /// Whether a model is available.
    pub fn has_model(&self) -> bool {
        self.model().is_ok()
    }

    /// Whether a fit is currently running.
    pub fn is_fitting(&self) -> bool {
        self.fitting.load(Ordering::Acquire)
    }

    /// Claim the fit flag.
    ///
    /// # Errors
    /// [`ServiceError::FitInProgress`] if another fit holds it.
    pub fn begin_fit(&self) -> Result<FitGuard<'_>> {
        self.fitting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ServiceError::FitInProgress)?;
        Ok(FitGuard { flag: &self.fitting })
    }

    /// Replace the served model after validating it.
    pub fn install(&self, model: BiasModel) -> Result<Arc<BiasModel>> {
        model.validate()?;
        let model = Arc::new(model);
        let mut slot = self
            .model
            .write()
            .map_err(|e| ServiceError::State(e.to_string()))?;
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Fit the factor-path model and serve it on success.
    pub fn fit_factor(&self, set: &CalibrationSet) -> Result<FactorPipelineFit> {
        let _guard = self.begin_fit()?;
        let fit = fit_factor_model(set, &self.config).inspect_err(|e| {
            tracing::warn!(error = %e, "factor fit failed; keeping previous model");
        })?;
        self.install(fit.model.clone())?;
        Ok(fit)
    }

    /// Fit the transfer-path model and serve it on success.
    pub fn fit_transfer(&self, historical: &CalibrationSet, new_domain: &CalibrationSet) -> Result<Arc<BiasModel>> {
        let _guard = self.begin_fit()?;
        let model = fit_transfer_model(historical, new_domain, &self.config).inspect_err(|e| {
            tracing::warn!(error = %e, "transfer fit failed; keeping previous model");
        })?;
        self.install(model)
    }

    /// Debias items whose embeddings are already known.
    pub fn debias_items(&self, items: &[NewQuestionItem]) -> Result<Vec<DebiasedResult>> {
        let model = self.model()?;
        Ok(DebiasTransform::new(&model).debias_batch(items)?)
    }

    /// Debias requests, embedding each distinct question text once.
    ///
    /// Embeddings are fetched concurrently, at most
    /// `embedding_concurrency` at a time. Results keep request order.
    pub async fn debias(&self, requests: &[DebiasRequest]) -> Result<Vec<DebiasedResult>> {
        let model = self.model()?;

        let mut seen = HashSet::new();
        let missing: Vec<&str> = requests
            .iter()
            .filter(|r| r.embedding.is_none())
            .map(|r| r.question_text.as_str())
            .filter(|text| seen.insert(*text))
            .collect();

        let embedding_model = self.config.embedding_model.as_str();
        let fetched: HashMap<&str, Vec<f64>> = stream::iter(missing)
            .map(|text| async move {
                self.provider
                    .embed(text, embedding_model)
                    .await
                    .map(|vector| (text, vector))
            })
            .buffered(self.config.embedding_concurrency.max(1))
            .try_collect()
            .await?;

        tracing::debug!(
            requests = requests.len(),
            fetched = fetched.len(),
            "resolved question embeddings"
        );

        let transform = DebiasTransform::new(&model);
        requests
            .iter()
            .map(|request| {
                let embedding = match &request.embedding {
                    Some(embedding) => embedding.clone(),
                    None => fetched
                        .get(request.question_text.as_str())
                        .cloned()
                        .ok_or_else(|| {
                            ServiceError::State(format!("no embedding for '{}'", request.question_text))
                        })?,
                };
                let item = NewQuestionItem::new(
                    request.question_text.clone(),
                    embedding,
                    request.raw_llm_responses.clone(),
                );
                Ok(transform.debias(&item)?)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use debias_embed::{EmbeddingError, StaticProvider};
    use debias_model::CalibrationItem;
    use ndarray::array;

    fn service() -> DebiasService<StaticProvider> {
        let provider = StaticProvider::new()
            .with("a", vec![1.0, 0.0])
            .with("b", vec![0.0, 1.0]);
        DebiasService::new(provider, PipelineConfig::default())
    }

    fn sets() -> (CalibrationSet, CalibrationSet) {
        let items = |offset: f64| {
            (0..6)
                .map(|i| {
                    let t = i as f64 + offset;
                    CalibrationItem::new(format!("q{t}"), vec![t.sin(), t.cos()], 3.0, 3.0 + 0.2 * t.sin())
                })
                .collect()
        };
        (
            CalibrationSet::new(items(0.0)).unwrap(),
            CalibrationSet::new(items(0.5)).unwrap(),
        )
    }

    #[test]
    fn test_no_model_before_fit() {
        let service = service();
        assert!(matches!(service.model(), Err(ServiceError::NoModel)));
        assert!(matches!(service.debias_items(&[]), Err(ServiceError::NoModel)));
    }

    #[test]
    fn test_fit_installs_model() {
        let service = service();
        let (hist, new) = sets();
        let model = service.fit_transfer(&hist, &new).unwrap();
        assert!(Arc::ptr_eq(&model, &service.model().unwrap()));
        assert!(!service.is_fitting());
    }

    #[test]
    fn test_failed_refit_keeps_previous_model() {
        let service = service();
        let (hist, new) = sets();
        let first = service.fit_transfer(&hist, &new).unwrap();

        let wide = CalibrationSet::new(vec![CalibrationItem::new("x", vec![1.0, 2.0, 3.0], 1.0, 2.0)]).unwrap();
        let err = service.fit_transfer(&hist, &wide).unwrap_err();
        assert!(err.is_configuration());
        assert!(Arc::ptr_eq(&first, &service.model().unwrap()));
        assert!(!service.is_fitting());
    }

    #[test]
    fn test_concurrent_fit_is_rejected() {
        let service = service();
        let (hist, new) = sets();

        let guard = service.begin_fit().unwrap();
        assert!(service.is_fitting());
        assert!(matches!(service.fit_transfer(&hist, &new), Err(ServiceError::FitInProgress)));
        assert!(matches!(service.begin_fit(), Err(ServiceError::FitInProgress)));
        drop(guard);

        service.fit_transfer(&hist, &new).unwrap();
    }

    #[test]
    fn test_install_validates() {
        let service = service();
        assert!(service.install(BiasModel::Transfer { beta: array![f64::NAN] }).is_err());
        assert!(!service.has_model());
    }

    #[tokio::test]
    async fn test_debias_uses_provider_and_precomputed_embeddings() {
        let service = service();
        service.install(BiasModel::transfer(array![0.5, -1.0]).unwrap()).unwrap();

        let requests = vec![
            DebiasRequest::new("a", vec![5.0, 6.0, 4.5]),
            DebiasRequest::new("b", vec![2.0]),
            DebiasRequest::new("unknown", vec![1.0]).with_embedding(vec![0.0, 0.5]),
        ];
        let results = service.debias(&requests).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].debiased_responses, vec![4.5, 5.5, 4.0]);
        assert_eq!(results[1].debiased_responses, vec![3.0]);
        assert_eq!(results[2].debiased_responses, vec![1.5]);
    }

    #[tokio::test]
    async fn test_debias_surfaces_retrieval_errors() {
        let service = service();
        service.install(BiasModel::transfer(array![0.5, -1.0]).unwrap()).unwrap();

        let err = service
            .debias(&[DebiasRequest::new("missing", vec![1.0])])
            .await
            .unwrap_err();
        assert!(err.is_retrieval());
        assert!(matches!(err, ServiceError::Retrieval(EmbeddingError::Malformed(_))));
    }

    #[test]
    fn test_request_wire_names() {
        let request: DebiasRequest =
            serde_json::from_str(r#"{"Question": "q", "llm_resp": [1.0, 2.0], "num_llms": 2}"#).unwrap();
        assert_eq!(request.question_text, "q");
        assert_eq!(request.raw_llm_responses, vec![1.0, 2.0]);
        assert!(request.embedding.is_none());
    }
}
