//! Fitting pipelines.
//!
//! Factor path: calibration embeddings → component selection → factor
//! analysis → penalized bias estimation. Transfer path: weighted ridge on
//! embeddings from two calibration sources.

use debias_embed::RetryConfig;
use debias_model::{
    BiasEstimator, BiasModel, CalibrationSet, ComponentSelection, ComponentSelector, EpochLoss,
    EstimatorConfig, FactorConfig, FactorExtractor, Result, SelectorConfig, TransferBiasEstimator,
    TransferConfig,
};
use debias_output::{FitReport, FitReportBuilder, ReportError};
use serde::{Deserialize, Serialize};

/// Default embedding model identifier
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Complete configuration for fitting and serving
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Component selection
    #[serde(default)]
    pub selector: SelectorConfig,

    /// Factor analysis
    #[serde(default)]
    pub factor: FactorConfig,

    /// Bias estimation over factor scores
    #[serde(default)]
    pub estimator: EstimatorConfig,

    /// Transfer ridge path
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Embedding retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Embedding model identifier (default: text-embedding-3-small)
    pub embedding_model: String,

    /// Concurrent embedding requests per debias call (default: 8)
    pub embedding_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            selector: SelectorConfig::default(),
            factor: FactorConfig::default(),
            estimator: EstimatorConfig::default(),
            transfer: TransferConfig::default(),
            retry: RetryConfig::default(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_concurrency: 8,
        }
    }
}

impl PipelineConfig {
    /// Validate every stage's hyperparameters.
    pub fn validate(&self) -> Result<()> {
        self.selector.validate()?;
        self.estimator.validate()?;
        self.transfer.validate()?;
        if self.embedding_model.trim().is_empty() {
            return Err(debias_model::ModelError::Configuration(
                "embedding model must be set".to_string(),
            ));
        }
        if self.embedding_concurrency == 0 {
            return Err(debias_model::ModelError::Configuration(
                "embedding concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of the factor pipeline
#[derive(Debug, Clone)]
pub struct FactorPipelineFit {
    /// The frozen model
    pub model: BiasModel,
    /// Component selection outcome
    pub selection: ComponentSelection,
    /// Whether the factor analysis converged
    pub factor_converged: bool,
    /// Per-epoch loss of the bias estimator
    pub history: Vec<EpochLoss>,
}

impl FactorPipelineFit {
    /// Summarize the fit.
    pub fn report(&self, set: &CalibrationSet, config: &PipelineConfig) -> std::result::Result<FitReport, ReportError> {
        let mut builder = FitReportBuilder::new()
            .model_kind(self.model.kind())
            .data(set.len(), set.dimension())
            .factors(self.selection.k, self.selection.cumulative_variance.to_vec())
            .factor_converged(self.factor_converged)
            .beta(&self.model.beta().to_vec())
            .config(serde_json::json!({
                "selector": config.selector,
                "factor": config.factor,
                "estimator": config.estimator,
            }));
        if let Some(last) = self.history.last() {
            builder = builder.final_loss(last.loss);
        }
        builder.build()
    }
}

/// Fit the factor-path model on a calibration set.
///
/// # Errors
/// Any stage's configuration or numerical error; no partial model is returned.
pub fn fit_factor_model(set: &CalibrationSet, config: &PipelineConfig) -> Result<FactorPipelineFit> {
    let x = set.embedding_matrix()?;
    let deltas = set.deltas();

    let selection = ComponentSelector::new(config.selector).select(&x.view())?;
    tracing::info!(
        n = set.len(),
        d = set.dimension(),
        k = selection.k,
        "fitting factor model"
    );

    let factor_fit = FactorExtractor::new(config.factor.clone()).fit(&x.view(), selection.k)?;
    let factor_converged = factor_fit.model.converged();

    let bias_fit =
        BiasEstimator::new(config.estimator.clone()).fit(&factor_fit.scores.view(), &deltas.view())?;
    let model = BiasModel::factor(factor_fit.model, bias_fit.beta)?;

    if let Some(last) = bias_fit.history.last() {
        tracing::info!(k = selection.k, mse = last.mse, loss = last.loss, "factor model fitted");
    }

    Ok(FactorPipelineFit {
        model,
        selection,
        factor_converged,
        history: bias_fit.history,
    })
}

/// Fit the transfer-path model on a historical and a new-domain set.
pub fn fit_transfer_model(
    historical: &CalibrationSet,
    new_domain: &CalibrationSet,
    config: &PipelineConfig,
) -> Result<BiasModel> {
    tracing::info!(
        historical = historical.len(),
        new_domain = new_domain.len(),
        d = historical.dimension(),
        w = config.transfer.source_weight,
        "fitting transfer model"
    );
    let beta = TransferBiasEstimator::new(config.transfer).fit_sets(historical, new_domain)?;
    BiasModel::transfer(beta)
}

/// Summarize a transfer fit.
pub fn transfer_report(
    model: &BiasModel,
    historical: &CalibrationSet,
    new_domain: &CalibrationSet,
    config: &PipelineConfig,
) -> std::result::Result<FitReport, ReportError> {
    FitReportBuilder::new()
        .model_kind(model.kind())
        .data(historical.len() + new_domain.len(), model.dimension())
        .beta(&model.beta().to_vec())
        .config(serde_json::json!({ "transfer": config.transfer }))
        .build()
}
