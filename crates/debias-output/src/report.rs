//! Fit reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A required field was not set on the builder.
    #[error("Missing report field: {0}")]
    MissingField(&'static str),
}

/// Summary of one model fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    /// Report generation timestamp.
    pub timestamp: DateTime<Utc>,

    /// Fitting path, `factor` or `transfer`.
    pub model_kind: String,

    /// Number of calibration items used.
    pub n_items: usize,

    /// Embedding dimension.
    pub dimension: usize,

    /// Number of latent factors (factor path only).
    pub n_factors: Option<usize>,

    /// Cumulative explained-variance ratios (factor path only).
    pub cumulative_variance: Option<Vec<f64>>,

    /// Whether the factor analysis converged (factor path only).
    pub factor_converged: Option<bool>,

    /// Loss after the last epoch (factor path only).
    pub final_loss: Option<f64>,

    /// Euclidean norm of the coefficient vector.
    pub beta_norm: f64,

    /// Hyperparameters used for the fit.
    pub config: serde_json::Value,
}

impl FitReport {
    /// Convert report to JSON string.
    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Plain-text summary for terminals.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Fit report ({})", self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "  model:       {}", self.model_kind);
        let _ = writeln!(out, "  items:       {}", self.n_items);
        let _ = writeln!(out, "  dimension:   {}", self.dimension);
        if let Some(k) = self.n_factors {
            let _ = writeln!(out, "  factors:     {k}");
        }
        if let Some(cumulative) = self.n_factors.zip(self.cumulative_variance.as_ref())
            .and_then(|(k, cum)| cum.get(k.saturating_sub(1)))
        {
            let _ = writeln!(out, "  variance:    {:.1}%", cumulative * 100.0);
        }
        if let Some(converged) = self.factor_converged {
            let _ = writeln!(out, "  converged:   {converged}");
        }
        if let Some(loss) = self.final_loss {
            let _ = writeln!(out, "  final loss:  {loss:.6}");
        }
        let _ = writeln!(out, "  |beta|:      {:.6}", self.beta_norm);
        out
    }
}

/// Builder for creating fit reports.
#[derive(Debug, Default)]
pub struct FitReportBuilder {
    model_kind: Option<String>,
    n_items: Option<usize>,
    dimension: Option<usize>,
    n_factors: Option<usize>,
    cumulative_variance: Option<Vec<f64>>,
    factor_converged: Option<bool>,
    final_loss: Option<f64>,
    beta: Option<Vec<f64>>,
    config: Option<serde_json::Value>,
}

impl FitReportBuilder {
    /// Create a new report builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fitting path.
    pub fn model_kind(mut self, kind: impl Into<String>) -> Self {
        self.model_kind = Some(kind.into());
        self
    }

    /// Set the calibration size and embedding dimension.
    pub const fn data(mut self, n_items: usize, dimension: usize) -> Self {
        self.n_items = Some(n_items);
        self.dimension = Some(dimension);
        self
    }

    /// Set the factor count and explained-variance curve.
    pub fn factors(mut self, n_factors: usize, cumulative_variance: Vec<f64>) -> Self {
        self.n_factors = Some(n_factors);
        self.cumulative_variance = Some(cumulative_variance);
        self
    }

    /// Set whether the factor analysis converged.
    pub const fn factor_converged(mut self, converged: bool) -> Self {
        self.factor_converged = Some(converged);
        self
    }

    /// Set the last-epoch loss.
    pub const fn final_loss(mut self, loss: f64) -> Self {
        self.final_loss = Some(loss);
        self
    }

    /// Set the fitted coefficients.
    pub fn beta(mut self, beta: &[f64]) -> Self {
        self.beta = Some(beta.to_vec());
        self
    }

    /// Set the hyperparameters.
    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the report.
    pub fn build(self) -> Result<FitReport, ReportError> {
        let beta = self.beta.ok_or(ReportError::MissingField("beta"))?;
        Ok(FitReport {
            timestamp: Utc::now(),
            model_kind: self.model_kind.ok_or(ReportError::MissingField("model_kind"))?,
            n_items: self.n_items.unwrap_or_default(),
            dimension: self.dimension.unwrap_or_default(),
            n_factors: self.n_factors,
            cumulative_variance: self.cumulative_variance,
            factor_converged: self.factor_converged,
            final_loss: self.final_loss,
            beta_norm: beta.iter().map(|b| b * b).sum::<f64>().sqrt(),
            config: self.config.unwrap_or(serde_json::Value::Null),
        })
    }
}
