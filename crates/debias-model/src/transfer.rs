//! Transfer ridge regression across two calibration sources
//!
//! Skips the factor model and regresses bias directly on embeddings. Rows
//! from a historical source and a new-domain source are stacked; the source
//! weight w enters the sample weights (w for historical rows, 1 − w for new
//! rows) and, under [`SourceWeighting::TargetAndSample`], the targets as well.
//!
//! The no-intercept weighted ridge solution is
//!
//! β = (XᵀSX + λI)⁻¹ XᵀSy
//!
//! computed in the primal when D ≤ rows and through the dual
//! β = X̃ᵀ(X̃X̃ᵀ + λI)⁻¹ỹ with X̃ = √S·X, ỹ = √S·y otherwise.

use crate::error::{ModelError, Result};
use crate::linalg::{all_finite, solve};
use crate::types::CalibrationSet;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, concatenate};
use serde::{Deserialize, Serialize};

/// How the source weight w is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceWeighting {
    /// Scale targets by w / (1 − w) and also use w / (1 − w) as sample weights
    #[default]
    TargetAndSample,
    /// Leave targets unscaled; w / (1 − w) only as sample weights
    SampleOnly,
}

/// Transfer estimator configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TransferConfig {
    /// Weight w ∈ [0, 1] of the historical source (default: 0.5)
    pub source_weight: f64,

    /// Ridge strength λ ≥ 0 (default: 1.0)
    pub ridge_strength: f64,

    /// Where w is applied (default: targets and sample weights)
    #[serde(default)]
    pub weighting: SourceWeighting,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            source_weight: 0.5,
            ridge_strength: 1.0,
            weighting: SourceWeighting::default(),
        }
    }
}

impl TransferConfig {
    /// Check w ∈ [0, 1] and λ ≥ 0.
    pub fn validate(&self) -> Result<()> {
        let w = self.source_weight;
        if !(0.0..=1.0).contains(&w) {
            return Err(ModelError::Configuration(format!(
                "source weight {w} must be in [0, 1]"
            )));
        }
        if !(self.ridge_strength.is_finite() && self.ridge_strength >= 0.0) {
            return Err(ModelError::Configuration(format!(
                "ridge strength {} must be non-negative",
                self.ridge_strength
            )));
        }
        Ok(())
    }
}

/// One calibration source: embeddings (n x D) and bias targets (n)
#[derive(Debug, Clone, Copy)]
pub struct SourceData<'a> {
    /// Embedding rows
    pub embeddings: ArrayView2<'a, f64>,
    /// Bias targets, one per row
    pub deltas: ArrayView1<'a, f64>,
}

impl<'a> SourceData<'a> {
    /// Pair embeddings with their targets.
    pub const fn new(embeddings: ArrayView2<'a, f64>, deltas: ArrayView1<'a, f64>) -> Self {
        Self { embeddings, deltas }
    }

    fn check(&self, name: &str) -> Result<()> {
        if self.deltas.len() != self.embeddings.nrows() {
            return Err(ModelError::DimensionMismatch {
                expected: self.embeddings.nrows(),
                actual: self.deltas.len(),
            });
        }
        if !all_finite(self.embeddings.iter()) || !all_finite(self.deltas.iter()) {
            return Err(ModelError::non_finite(name));
        }
        Ok(())
    }
}

/// Fits an embedding-space bias coefficient vector from two sources
#[derive(Debug, Clone, Default)]
pub struct TransferBiasEstimator {
    config: TransferConfig,
}

impl TransferBiasEstimator {
    /// Create a new estimator with the given configuration
    pub const fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub const fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Fit β (length D) on a historical and a new-domain source.
    ///
    /// Either source may be empty as long as the combined rows are not.
    ///
    /// # Errors
    /// * Configuration error for w outside [0, 1], negative λ, no rows, or
    ///   sources with different embedding widths
    /// * Numerical error for non-finite inputs or a singular system
    pub fn fit<'a>(&self, historical: SourceData<'a>, new_domain: SourceData<'a>) -> Result<Array1<f64>> {
        self.config.validate()?;
        historical.check("historical source")?;
        new_domain.check("new-domain source")?;

        let d = historical.embeddings.ncols();
        if new_domain.embeddings.ncols() != d {
            return Err(ModelError::DimensionMismatch {
                expected: d,
                actual: new_domain.embeddings.ncols(),
            });
        }
        let rows = historical.embeddings.nrows() + new_domain.embeddings.nrows();
        if rows == 0 || d == 0 {
            return Err(ModelError::Configuration(
                "transfer fit needs at least one calibration row".to_string(),
            ));
        }

        let w = self.config.source_weight;
        let (target_hist, target_new) = match self.config.weighting {
            SourceWeighting::TargetAndSample => (w, 1.0 - w),
            SourceWeighting::SampleOnly => (1.0, 1.0),
        };

        let x = concatenate(Axis(0), &[historical.embeddings.view(), new_domain.embeddings.view()])
            .map_err(|e| ModelError::Configuration(format!("cannot stack sources: {e}")))?;
        let y = concatenate(
            Axis(0),
            &[
                (&historical.deltas * target_hist).view(),
                (&new_domain.deltas * target_new).view(),
            ],
        )
        .map_err(|e| ModelError::Configuration(format!("cannot stack targets: {e}")))?;
        let weights: Array1<f64> = std::iter::repeat_n(w, historical.deltas.len())
            .chain(std::iter::repeat_n(1.0 - w, new_domain.deltas.len()))
            .collect();

        let beta = weighted_ridge(&x.view(), &y.view(), &weights.view(), self.config.ridge_strength)?;

        tracing::debug!(
            historical = historical.deltas.len(),
            new_domain = new_domain.deltas.len(),
            d,
            w,
            weighting = ?self.config.weighting,
            "fitted transfer coefficients"
        );
        Ok(beta)
    }

    /// Fit on two calibration sets.
    pub fn fit_sets(&self, historical: &CalibrationSet, new_domain: &CalibrationSet) -> Result<Array1<f64>> {
        let (hist_x, hist_y) = (historical.embedding_matrix()?, historical.deltas());
        let (new_x, new_y) = (new_domain.embedding_matrix()?, new_domain.deltas());
        self.fit(
            SourceData::new(hist_x.view(), hist_y.view()),
            SourceData::new(new_x.view(), new_y.view()),
        )
    }
}

/// No-intercept ridge regression with per-row sample weights.
///
/// Minimizes Σ s_i (y_i − x_i·β)² + λ‖β‖². Weights must be non-negative.
pub fn weighted_ridge(
    x: &ArrayView2<'_, f64>,
    y: &ArrayView1<'_, f64>,
    weights: &ArrayView1<'_, f64>,
    lambda: f64,
) -> Result<Array1<f64>> {
    let (rows, d) = x.dim();
    if y.len() != rows {
        return Err(ModelError::DimensionMismatch {
            expected: rows,
            actual: y.len(),
        });
    }
    if weights.len() != rows {
        return Err(ModelError::DimensionMismatch {
            expected: rows,
            actual: weights.len(),
        });
    }
    if weights.iter().any(|&s| s < 0.0) {
        return Err(ModelError::Configuration(
            "sample weights must be non-negative".to_string(),
        ));
    }

    let root = weights.mapv(f64::sqrt);
    let scaled_x = x * &root.view().insert_axis(Axis(1));
    let scaled_y = y * &root;

    if d <= rows {
        let mut gram = scaled_x.t().dot(&scaled_x);
        gram.diag_mut().mapv_inplace(|v| v + lambda);
        let rhs = scaled_x.t().dot(&scaled_y);
        solve(&gram, &rhs)
    } else {
        let mut kernel: Array2<f64> = scaled_x.dot(&scaled_x.t());
        kernel.diag_mut().mapv_inplace(|v| v + lambda);
        let dual = solve(&kernel, &scaled_y)?;
        Ok(scaled_x.t().dot(&dual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rstest::rstest;

    fn historical() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 0.2, -0.3],
            [0.4, 1.1, 0.0],
            [-0.5, 0.3, 0.9],
            [0.8, -0.6, 0.2],
            [0.1, 0.7, -1.0],
            [-0.9, -0.2, 0.4]
        ];
        let y = array![0.6, 0.3, -0.2, 0.5, 0.1, -0.4];
        (x, y)
    }

    fn new_domain() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.3, -0.8, 0.5],
            [1.2, 0.1, 0.1],
            [-0.4, 0.9, -0.6],
            [0.0, 0.5, 0.8],
            [0.7, 0.7, 0.7]
        ];
        let y = array![-0.3, 0.9, 0.2, -0.1, 0.4];
        (x, y)
    }

    fn estimator(source_weight: f64, weighting: SourceWeighting) -> TransferBiasEstimator {
        TransferBiasEstimator::new(TransferConfig {
            source_weight,
            ridge_strength: 1.0,
            weighting,
        })
    }

    #[test]
    fn test_full_weight_is_historical_ridge() {
        let (hx, hy) = historical();
        let (nx, ny) = new_domain();
        let beta = estimator(1.0, SourceWeighting::TargetAndSample)
            .fit(SourceData::new(hx.view(), hy.view()), SourceData::new(nx.view(), ny.view()))
            .unwrap();

        let ones = Array1::ones(hy.len());
        let expected = weighted_ridge(&hx.view(), &hy.view(), &ones.view(), 1.0).unwrap();
        for (a, b) in beta.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[rstest]
    #[case(0.0)]
    #[case(0.2)]
    #[case(0.5)]
    #[case(0.9)]
    fn test_identical_sources_sample_only_ignores_weight(#[case] w: f64) {
        let (x, y) = historical();
        let source = SourceData::new(x.view(), y.view());
        let reference = estimator(0.5, SourceWeighting::SampleOnly)
            .fit(source, source)
            .unwrap();
        let beta = estimator(w, SourceWeighting::SampleOnly)
            .fit(source, source)
            .unwrap();
        for (a, b) in beta.iter().zip(reference.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[rstest]
    #[case(0.0)]
    #[case(0.3)]
    #[case(0.5)]
    #[case(1.0)]
    fn test_identical_sources_double_weighting_scales(#[case] w: f64) {
        let (x, y) = historical();
        let source = SourceData::new(x.view(), y.view());
        let beta = estimator(w, SourceWeighting::TargetAndSample)
            .fit(source, source)
            .unwrap();

        let ones = Array1::ones(y.len());
        let single = weighted_ridge(&x.view(), &y.view(), &ones.view(), 1.0).unwrap();
        let scale = w * w + (1.0 - w) * (1.0 - w);
        for (a, b) in beta.iter().zip(single.iter()) {
            assert_abs_diff_eq!(*a, scale * b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_dual_path_solves_normal_equations() {
        // D = 6 > 4 rows forces the dual solve
        let x = array![
            [1.0, 0.0, 0.5, -0.2, 0.3, 0.1],
            [0.2, 1.0, -0.4, 0.0, 0.6, -0.5],
            [-0.3, 0.4, 1.0, 0.8, 0.0, 0.2],
            [0.5, -0.7, 0.1, 1.0, -0.3, 0.9]
        ];
        let y = array![0.4, -0.2, 0.7, 0.1];
        let s = array![0.5, 0.25, 1.0, 0.75];
        let lambda = 0.3;
        let beta = weighted_ridge(&x.view(), &y.view(), &s.view(), lambda).unwrap();

        let sx = &x * &s.view().insert_axis(Axis(1));
        let lhs = x.t().dot(&sx).dot(&beta) + &beta * lambda;
        let rhs = sx.t().dot(&y);
        for (a, b) in lhs.iter().zip(rhs.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_fit_sets_matches_fit() {
        use crate::types::{CalibrationItem, CalibrationSet};

        let (hx, hy) = historical();
        let (nx, ny) = new_domain();
        let to_set = |x: &Array2<f64>, y: &Array1<f64>| {
            let items = x
                .rows()
                .into_iter()
                .zip(y.iter())
                .enumerate()
                .map(|(i, (row, d))| CalibrationItem::new(format!("q{i}"), row.to_vec(), 3.0, 3.0 + d))
                .collect();
            CalibrationSet::new(items).unwrap()
        };

        let est = TransferBiasEstimator::default();
        let from_sets = est.fit_sets(&to_set(&hx, &hy), &to_set(&nx, &ny)).unwrap();
        let direct = est
            .fit(SourceData::new(hx.view(), hy.view()), SourceData::new(nx.view(), ny.view()))
            .unwrap();
        for (a, b) in from_sets.iter().zip(direct.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[rstest]
    #[case(-0.1, 1.0)]
    #[case(1.1, 1.0)]
    #[case(f64::NAN, 1.0)]
    #[case(0.5, -1.0)]
    fn test_rejects_bad_config(#[case] source_weight: f64, #[case] ridge_strength: f64) {
        let (x, y) = historical();
        let source = SourceData::new(x.view(), y.view());
        let err = TransferBiasEstimator::new(TransferConfig {
            source_weight,
            ridge_strength,
            weighting: SourceWeighting::TargetAndSample,
        })
        .fit(source, source)
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rejects_width_mismatch() {
        let (hx, hy) = historical();
        let nx = Array2::<f64>::zeros((2, 4));
        let ny = Array1::<f64>::zeros(2);
        let err = TransferBiasEstimator::default()
            .fit(SourceData::new(hx.view(), hy.view()), SourceData::new(nx.view(), ny.view()))
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
    }

    #[test]
    fn test_rejects_empty_sources() {
        let x = Array2::<f64>::zeros((0, 3));
        let y = Array1::<f64>::zeros(0);
        let empty = SourceData::new(x.view(), y.view());
        let err = TransferBiasEstimator::default().fit(empty, empty).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rejects_non_finite() {
        let (mut hx, hy) = historical();
        hx[[2, 1]] = f64::NAN;
        let (nx, ny) = new_domain();
        let err = TransferBiasEstimator::default()
            .fit(SourceData::new(hx.view(), hy.view()), SourceData::new(nx.view(), ny.view()))
            .unwrap_err();
        assert!(err.is_numerical());
    }

    #[test]
    fn test_unregularized_collinear_is_singular() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let y = array![1.0, 2.0, 3.0];
        let source = SourceData::new(x.view(), y.view());
        let err = TransferBiasEstimator::new(TransferConfig {
            ridge_strength: 0.0,
            ..TransferConfig::default()
        })
        .fit(source, source)
        .unwrap_err();
        assert!(err.is_numerical());
    }
}
