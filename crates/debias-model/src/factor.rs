//! Maximum-likelihood factor analysis
//!
//! Fits the linear Gaussian latent model
//!
//! x = μ + Wᵀ z + ε,   z ~ N(0, I_k),   ε ~ N(0, diag(ψ))
//!
//! by iterated SVD: each iteration rescales the centered data by
//! 1/(√ψ·√n), takes the top-k singular spectrum, sets
//! W = √max(s² − 1, 0)·Vᵀ·√ψ and updates ψ = max(var − Σ W², ε), stopping
//! when the log-likelihood gain falls under the tolerance.
//!
//! Factor scores are the posterior means
//!
//! E[z | x] = (x − μ)·(W/ψ)ᵀ·(I + (W/ψ)·Wᵀ)⁻¹
//!
//! The fit depends on the initial noise variances. With `seed: None` they
//! start at 1 and the fit is deterministic; a seed perturbs them, which can
//! move the fit to a different local optimum.

use crate::error::{ModelError, Result};
use crate::linalg::{all_finite, center_columns, inverse, right_spectrum};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Floor for noise variances and the √ψ offset
const SMALL: f64 = 1e-12;

/// Singular values below this fraction of the largest count as zero
const RANK_TOLERANCE: f64 = 1e-10;

/// Half-width of the seeded perturbation applied to the initial ψ
const INIT_JITTER: f64 = 0.5;

/// Factor analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactorConfig {
    /// Maximum number of iterations (default: 1000)
    pub max_iterations: usize,

    /// Stop when the log-likelihood improves by less than this (default: 1e-2)
    pub tolerance: f64,

    /// Seed for perturbing the initial noise variances; `None` starts at ψ = 1
    pub seed: Option<u64>,
}

impl Default for FactorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-2,
            seed: None,
        }
    }
}

/// Frozen factor model mapping D-dim embeddings to k-dim factor scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorModel {
    /// Per-feature mean of the calibration embeddings (D)
    mean: Array1<f64>,
    /// Factor loadings W (k x D)
    components: Array2<f64>,
    /// Per-feature noise variances ψ (D)
    noise_variance: Array1<f64>,
    /// Score estimator (W/ψ)ᵀ (I + (W/ψ)Wᵀ)⁻¹, precomputed (D x k)
    score_projection: Array2<f64>,
    /// Log-likelihood at the last iteration
    log_likelihood: f64,
    /// Iterations run
    n_iterations: usize,
    /// Whether the tolerance was met before the iteration budget ran out
    converged: bool,
}

impl FactorModel {
    /// Number of latent factors (k)
    pub fn n_factors(&self) -> usize {
        self.components.nrows()
    }

    /// Embedding dimension (D)
    pub fn dimension(&self) -> usize {
        self.components.ncols()
    }

    /// Factor loadings (k x D)
    pub const fn components(&self) -> &Array2<f64> {
        &self.components
    }

    /// Noise variances (D)
    pub const fn noise_variance(&self) -> &Array1<f64> {
        &self.noise_variance
    }

    /// Calibration mean (D)
    pub const fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Final log-likelihood
    pub const fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// Iterations run during the fit
    pub const fn n_iterations(&self) -> usize {
        self.n_iterations
    }

    /// Whether the fit met its tolerance
    pub const fn converged(&self) -> bool {
        self.converged
    }

    /// Factor scores for each row of `x` (m x D) -> (m x k)
    pub fn transform(&self, x: &ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.dimension() {
            return Err(ModelError::DimensionMismatch {
                expected: self.dimension(),
                actual: x.ncols(),
            });
        }
        if !all_finite(x.iter()) {
            return Err(ModelError::non_finite("embedding"));
        }
        let centered = x - &self.mean.view().insert_axis(Axis(0));
        Ok(centered.dot(&self.score_projection))
    }

    /// Factor score of a single embedding (D) -> (k)
    pub fn transform_one(&self, embedding: &ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        let row = embedding.view().insert_axis(Axis(0));
        let scores = self.transform(&row)?;
        Ok(scores.row(0).to_owned())
    }
}

/// A fitted factor model with the calibration scores it produced
#[derive(Debug, Clone)]
pub struct FactorFit {
    /// The frozen model
    pub model: FactorModel,
    /// Factor scores of the calibration rows (n x k)
    pub scores: Array2<f64>,
}

/// Fits k-factor models on calibration embeddings
#[derive(Debug, Clone, Default)]
pub struct FactorExtractor {
    config: FactorConfig,
}

impl FactorExtractor {
    /// Create a new extractor with the given configuration
    pub const fn new(config: FactorConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub const fn config(&self) -> &FactorConfig {
        &self.config
    }

    /// Fit a k-factor model on `x` (n x D).
    ///
    /// # Errors
    /// * Configuration error if k = 0 or the iteration settings are invalid
    /// * Numerical error if k is too large for the data (k > D or n < k + 1),
    ///   on non-finite input, a rank-deficient spectrum for the requested k,
    ///   or a singular score covariance
    pub fn fit(&self, x: &ArrayView2<'_, f64>, k: usize) -> Result<FactorFit> {
        let (n, d) = x.dim();
        self.validate(n, d, k)?;
        if !all_finite(x.iter()) {
            return Err(ModelError::non_finite("embedding matrix"));
        }

        let (centered, mean) = center_columns(x)?;
        let variance = centered.mapv(|v| v * v).mean_axis(Axis(0)).ok_or_else(|| {
            ModelError::Configuration("cannot fit factors on an empty matrix".to_string())
        })?;

        let n_f = n as f64;
        let nsqrt = n_f.sqrt();
        let llconst = d as f64 * (2.0 * std::f64::consts::PI).ln() + k as f64;

        let mut psi = self.initial_noise_variance(d);
        let mut components = Array2::<f64>::zeros((k, d));
        let mut old_ll = f64::NEG_INFINITY;
        let mut log_likelihood = f64::NEG_INFINITY;
        let mut converged = false;
        let mut n_iterations = 0;

        for _ in 0..self.config.max_iterations {
            n_iterations += 1;
            let sqrt_psi = psi.mapv(|p| p.sqrt() + SMALL);
            let scale = sqrt_psi.mapv(|v| v * nsqrt);
            let scaled = &centered / &scale.view().insert_axis(Axis(0));

            let spectrum = right_spectrum(&scaled.view())?;
            let top = spectrum.eigenvalues.slice(s![..k]).to_owned();
            let floor = spectrum.eigenvalues[0] * RANK_TOLERANCE;
            if top.iter().any(|&v| v <= floor) {
                return Err(ModelError::Numerical(format!(
                    "calibration embeddings have rank below k = {k}"
                )));
            }
            let unexplained: f64 = spectrum.eigenvalues.slice(s![k..]).sum();

            let vt = spectrum.right_vectors.slice(s![.., ..k]).t().to_owned();
            let loading_scale = top.mapv(|v| (v - 1.0).max(0.0).sqrt());
            components = &vt * &loading_scale.view().insert_axis(Axis(1));
            components *= &sqrt_psi.view().insert_axis(Axis(0));

            let mut ll = llconst + top.mapv(f64::ln).sum();
            ll += unexplained + psi.mapv(f64::ln).sum();
            ll *= -n_f / 2.0;
            log_likelihood = ll;

            if !ll.is_finite() {
                return Err(ModelError::Numerical(
                    "factor log-likelihood is not finite".to_string(),
                ));
            }
            if ll - old_ll < self.config.tolerance {
                converged = true;
                break;
            }
            old_ll = ll;

            let explained = components.mapv(|w| w * w).sum_axis(Axis(0));
            psi = (&variance - &explained).mapv(|v| v.max(SMALL));
        }

        if !converged {
            tracing::warn!(
                iterations = n_iterations,
                "factor analysis did not converge; consider raising max_iterations"
            );
        }

        let score_projection = score_projection(&components, &psi)?;
        let model = FactorModel {
            mean,
            components,
            noise_variance: psi,
            score_projection,
            log_likelihood,
            n_iterations,
            converged,
        };
        let scores = model.transform(x)?;
        if !all_finite(scores.iter()) {
            return Err(ModelError::non_finite("factor scores"));
        }

        tracing::debug!(n, d, k, n_iterations, converged, "fitted factor model");

        Ok(FactorFit { model, scores })
    }

    fn validate(&self, n: usize, d: usize, k: usize) -> Result<()> {
        if k == 0 {
            return Err(ModelError::Configuration(
                "number of factors must be at least 1".to_string(),
            ));
        }
        if k > d {
            return Err(ModelError::Numerical(format!(
                "degenerate factor covariance: k = {k} exceeds the embedding dimension {d}"
            )));
        }
        if n < k + 1 {
            return Err(ModelError::Numerical(format!(
                "degenerate factor covariance: k = {k} needs at least {} items, got {n}",
                k + 1
            )));
        }
        if self.config.max_iterations == 0 {
            return Err(ModelError::Configuration(
                "max_iterations must be positive".to_string(),
            ));
        }
        if !self.config.tolerance.is_finite() || self.config.tolerance < 0.0 {
            return Err(ModelError::Configuration(format!(
                "tolerance {} must be a non-negative number",
                self.config.tolerance
            )));
        }
        Ok(())
    }

    fn initial_noise_variance(&self, d: usize) -> Array1<f64> {
        match self.config.seed {
            None => Array1::ones(d),
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                (0..d)
                    .map(|_| 1.0 + rng.gen_range(-INIT_JITTER..INIT_JITTER))
                    .collect()
            }
        }
    }
}

/// (W/ψ)ᵀ (I + (W/ψ) Wᵀ)⁻¹
fn score_projection(components: &Array2<f64>, psi: &Array1<f64>) -> Result<Array2<f64>> {
    let k = components.nrows();
    let w_psi = components / &psi.view().insert_axis(Axis(0));
    let precision = Array2::<f64>::eye(k) + w_psi.dot(&components.t());
    let cov_z = inverse(&precision).map_err(|err| match err {
        ModelError::Numerical(msg) => {
            ModelError::Numerical(format!("degenerate factor covariance: {msg}"))
        }
        other => other,
    })?;
    let projection = w_psi.t().dot(&cov_z);
    if !all_finite(projection.iter()) {
        return Err(ModelError::non_finite("factor score estimator"));
    }
    Ok(projection)
}
