//! Penalized bias estimation over factor scores
//!
//! Fits β (length k) so that F·β predicts the per-question bias
//! δ = avg_llm − avg_human. The loss adds a directional penalty to the mean
//! squared error:
//!
//! r = δ − Fβ
//! mse = (1/n) Σ r_i²
//! penalty = (1/n) Σ m_i |r_i|,   m_i = 1 if δ_i · (Fβ)_i < 0 else 0
//! loss = mse + λ · penalty
//!
//! Gradients are closed-form: ∂mse/∂β = −2 Fᵀr / n and
//! ∂penalty/∂β = −Fᵀ(m ⊙ sign(r)) / n, with the mask held fixed and
//! sign(0) = 0. β starts at zero and takes one Adam step per epoch for a
//! fixed number of epochs; the last-epoch β is returned.

pub mod adam;

pub use adam::{AdamConfig, AdamState};

use crate::error::{ModelError, Result};
use crate::linalg::all_finite;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Bias estimator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EstimatorConfig {
    /// Weight λ of the directional penalty (default: 15.0)
    pub penalty_weight: f64,

    /// Adam learning rate (default: 1e-3)
    pub learning_rate: f64,

    /// Number of epochs, each one full-batch step (default: 500)
    pub epoch_count: usize,

    /// Adam moment decay settings
    #[serde(default)]
    pub adam: AdamConfig,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            penalty_weight: 15.0,
            learning_rate: 1e-3,
            epoch_count: 500,
            adam: AdamConfig::default(),
        }
    }
}

impl EstimatorConfig {
    /// Check the hyperparameters.
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ModelError::Configuration(format!(
                "learning rate {} must be positive",
                self.learning_rate
            )));
        }
        if self.epoch_count == 0 {
            return Err(ModelError::Configuration(
                "epoch count must be positive".to_string(),
            ));
        }
        if !(self.penalty_weight.is_finite() && self.penalty_weight >= 0.0) {
            return Err(ModelError::Configuration(format!(
                "penalty weight {} must be non-negative",
                self.penalty_weight
            )));
        }
        Ok(())
    }
}

/// Loss components for one β
#[derive(Debug, Clone, PartialEq)]
pub struct LossEvaluation {
    /// Mean squared error
    pub mse: f64,
    /// Mean directional penalty
    pub penalty: f64,
    /// mse + λ · penalty
    pub loss: f64,
    /// Gradient of the mse term
    pub mse_gradient: Array1<f64>,
    /// Subgradient of the penalty term (before λ)
    pub penalty_gradient: Array1<f64>,
    /// Number of rows whose prediction points the wrong way
    pub mismatched: usize,
}

impl LossEvaluation {
    /// Total gradient mse_gradient + λ · penalty_gradient
    pub fn gradient(&self, penalty_weight: f64) -> Array1<f64> {
        &self.mse_gradient + &(&self.penalty_gradient * penalty_weight)
    }
}

/// Penalized least-squares objective over fixed scores and targets
#[derive(Debug, Clone, Copy)]
pub struct BiasObjective<'a> {
    scores: ArrayView2<'a, f64>,
    targets: ArrayView1<'a, f64>,
    penalty_weight: f64,
}

impl<'a> BiasObjective<'a> {
    /// Bind scores F (n x k), targets δ (n) and penalty weight λ.
    pub fn new(
        scores: ArrayView2<'a, f64>,
        targets: ArrayView1<'a, f64>,
        penalty_weight: f64,
    ) -> Result<Self> {
        let (n, k) = scores.dim();
        if n == 0 || k == 0 {
            return Err(ModelError::Configuration(
                "factor scores must be non-empty".to_string(),
            ));
        }
        if targets.len() != n {
            return Err(ModelError::DimensionMismatch {
                expected: n,
                actual: targets.len(),
            });
        }
        if !all_finite(scores.iter()) {
            return Err(ModelError::non_finite("factor scores"));
        }
        if !all_finite(targets.iter()) {
            return Err(ModelError::non_finite("bias targets"));
        }
        Ok(Self {
            scores,
            targets,
            penalty_weight,
        })
    }

    /// Evaluate loss and gradients at `beta`.
    pub fn evaluate(&self, beta: &Array1<f64>) -> LossEvaluation {
        let n = self.scores.nrows() as f64;
        let prediction = self.scores.dot(beta);
        let residual = &self.targets - &prediction;

        let mse = residual.mapv(|r| r * r).sum() / n;

        let mut penalty = 0.0;
        let mut mismatched = 0;
        let mut masked_sign = Array1::<f64>::zeros(residual.len());
        for (i, (&target, &pred)) in self.targets.iter().zip(prediction.iter()).enumerate() {
            if target * pred < 0.0 {
                mismatched += 1;
                penalty += residual[i].abs();
                masked_sign[i] = sign(residual[i]);
            }
        }
        penalty /= n;

        let mse_gradient = self.scores.t().dot(&residual) * (-2.0 / n);
        let penalty_gradient = self.scores.t().dot(&masked_sign) * (-1.0 / n);

        LossEvaluation {
            mse,
            penalty,
            loss: mse + self.penalty_weight * penalty,
            mse_gradient,
            penalty_gradient,
            mismatched,
        }
    }
}

/// sign with sign(0) = 0
fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Loss recorded at one epoch (evaluated before that epoch's update)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLoss {
    /// Mean squared error
    pub mse: f64,
    /// Directional penalty
    pub penalty: f64,
    /// Total loss
    pub loss: f64,
}

/// Result of a bias fit
#[derive(Debug, Clone)]
pub struct BiasFit {
    /// Coefficients after the final epoch
    pub beta: Array1<f64>,
    /// Per-epoch loss trajectory
    pub history: Vec<EpochLoss>,
}

impl BiasFit {
    /// Loss at the last recorded epoch
    pub fn final_loss(&self) -> Option<&EpochLoss> {
        self.history.last()
    }
}

/// Fits the bias coefficient vector with a fixed epoch budget
#[derive(Debug, Clone, Default)]
pub struct BiasEstimator {
    config: EstimatorConfig,
}

impl BiasEstimator {
    /// Create a new estimator with the given configuration
    pub const fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub const fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Fit β on factor scores `scores` (n x k) and targets `targets` (n).
    ///
    /// # Errors
    /// * Configuration error for a non-positive learning rate or epoch count,
    ///   a negative penalty weight, or mismatched shapes
    /// * Numerical error if scores or targets are non-finite, or β diverges
    pub fn fit<'a>(
        &self,
        scores: &ArrayView2<'a, f64>,
        targets: &ArrayView1<'a, f64>,
    ) -> Result<BiasFit> {
        self.config.validate()?;
        let objective = BiasObjective::new(scores.view(), targets.view(), self.config.penalty_weight)?;

        let k = scores.ncols();
        let mut beta = Array1::<f64>::zeros(k);
        let mut state = AdamState::new(k, self.config.adam);
        let mut history = Vec::with_capacity(self.config.epoch_count);

        for _ in 0..self.config.epoch_count {
            let evaluation = objective.evaluate(&beta);
            history.push(EpochLoss {
                mse: evaluation.mse,
                penalty: evaluation.penalty,
                loss: evaluation.loss,
            });
            let gradient = evaluation.gradient(self.config.penalty_weight);
            state.step(&mut beta, &gradient, self.config.learning_rate);
        }

        if !all_finite(beta.iter()) {
            return Err(ModelError::non_finite("fitted coefficients"));
        }

        if let Some(last) = history.last() {
            tracing::debug!(
                k,
                epochs = self.config.epoch_count,
                mse = last.mse,
                penalty = last.penalty,
                "fitted bias coefficients"
            );
        }

        Ok(BiasFit { beta, history })
    }
}
