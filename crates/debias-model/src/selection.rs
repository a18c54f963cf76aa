//! Latent dimensionality selection
//!
//! Picks the number of factors k as the smallest number of principal
//! components whose cumulative explained-variance ratio reaches a target α:
//!
//! k = (first zero-based index i with Σ_{j≤i} r_j ≥ α) + 1
//!
//! where r_j is the explained-variance ratio of component j, sorted
//! descending.

use crate::error::{ModelError, Result};
use crate::linalg::{all_finite, center_columns, right_spectrum};
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Slack for rounding in the cumulative sum, so α = 1.0 is reachable
const RATIO_TOLERANCE: f64 = 1e-12;

/// Component selector configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SelectorConfig {
    /// Cumulative explained-variance target α in (0, 1] (default: 0.90)
    pub variance_threshold: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            variance_threshold: 0.90,
        }
    }
}

impl SelectorConfig {
    /// Check that the threshold lies in (0, 1].
    pub fn validate(&self) -> Result<()> {
        let alpha = self.variance_threshold;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ModelError::Configuration(format!(
                "variance threshold {alpha} must be in (0, 1]"
            )));
        }
        Ok(())
    }
}

/// Outcome of component selection
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSelection {
    /// Selected number of latent factors
    pub k: usize,
    /// Explained-variance ratio per component, descending
    pub explained_variance_ratio: Array1<f64>,
    /// Running sum of `explained_variance_ratio`
    pub cumulative_variance: Array1<f64>,
}

/// Chooses latent dimensionality from calibration embeddings
#[derive(Debug, Clone, Default)]
pub struct ComponentSelector {
    config: SelectorConfig,
}

impl ComponentSelector {
    /// Create a new selector with the given configuration
    pub const fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Create a selector for a variance threshold
    pub const fn with_threshold(variance_threshold: f64) -> Self {
        Self::new(SelectorConfig { variance_threshold })
    }

    /// Get the configuration
    pub const fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Select k for the embedding matrix `x` (n x D).
    ///
    /// # Errors
    /// * Configuration error if D < 1, n < 2, or the threshold is outside (0, 1]
    /// * Numerical error if `x` has non-finite entries or zero total variance
    pub fn select(&self, x: &ArrayView2<'_, f64>) -> Result<ComponentSelection> {
        self.config.validate()?;

        let (n, d) = x.dim();
        if d < 1 {
            return Err(ModelError::Configuration(
                "embeddings must have at least one dimension".to_string(),
            ));
        }
        if n < 2 {
            return Err(ModelError::InsufficientData {
                required: 2,
                actual: n,
            });
        }
        if !all_finite(x.iter()) {
            return Err(ModelError::non_finite("embedding matrix"));
        }

        let (centered, _) = center_columns(x)?;
        let spectrum = right_spectrum(&centered.view())?;

        let total: f64 = spectrum.eigenvalues.sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(ModelError::Numerical(
                "embeddings have zero total variance".to_string(),
            ));
        }

        let n_components = n.min(d);
        let explained_variance_ratio = spectrum
            .eigenvalues
            .iter()
            .take(n_components)
            .map(|v| v / total)
            .collect::<Array1<f64>>();

        let mut running = 0.0;
        let cumulative_variance = explained_variance_ratio
            .iter()
            .map(|r| {
                running += r;
                running
            })
            .collect::<Array1<f64>>();

        let alpha = self.config.variance_threshold;
        let k = cumulative_variance
            .iter()
            .position(|&c| c + RATIO_TOLERANCE >= alpha)
            .map_or(n_components, |index| index + 1);

        tracing::debug!(n, d, k, alpha, "selected latent dimensionality");

        Ok(ComponentSelection {
            k,
            explained_variance_ratio,
            cumulative_variance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};
    use rstest::rstest;

    /// Three orthogonal latent directions with variances 9 : 4 : 8/3 in 4 dims
    fn structured() -> Array2<f64> {
        let c1 = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0];
        let c2 = [1.0, 1.0, 1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0];
        let c3 = [1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, -1.0, 0.0];
        Array2::from_shape_fn((12, 4), |(i, j)| match j {
            0 => 3.0 * c1[i],
            1 => 2.0 * c2[i],
            2 => 2.0 * c3[i],
            _ => 0.0,
        })
    }

    #[rstest]
    #[case(0.10, 1)]
    #[case(0.57, 1)]
    #[case(0.60, 2)]
    #[case(0.82, 2)]
    #[case(0.90, 3)]
    #[case(1.00, 3)]
    fn test_selects_minimal_k(#[case] alpha: f64, #[case] expected: usize) {
        let selection = ComponentSelector::with_threshold(alpha)
            .select(&structured().view())
            .unwrap();
        assert_eq!(selection.k, expected);
    }

    #[rstest]
    #[case(0.05)]
    #[case(0.5)]
    #[case(0.75)]
    #[case(0.95)]
    #[case(1.0)]
    fn test_k_is_first_crossing(#[case] alpha: f64) {
        let x = array![
            [2.0, 0.1, 0.3],
            [-1.0, 0.4, 0.0],
            [0.5, -0.7, 0.2],
            [-1.5, 0.2, -0.5],
            [0.0, 0.0, 0.1]
        ];
        let selection = ComponentSelector::with_threshold(alpha)
            .select(&x.view())
            .unwrap();
        let k = selection.k;
        let cum = &selection.cumulative_variance;
        assert!(k >= 1 && k <= 3);
        assert!(cum[k - 1] + RATIO_TOLERANCE >= alpha);
        assert!(k == 1 || cum[k - 2] < alpha);
    }

    #[test]
    fn test_ratios_sum_to_one() {
        let selection = ComponentSelector::default().select(&structured().view()).unwrap();
        let last = selection.cumulative_variance[selection.cumulative_variance.len() - 1];
        approx::assert_abs_diff_eq!(last, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_single_row() {
        let x = array![[1.0, 2.0]];
        let err = ComponentSelector::default().select(&x.view()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rejects_zero_width() {
        let x = Array2::<f64>::zeros((3, 0));
        let err = ComponentSelector::default().select(&x.view()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[rstest]
    #[case(0.0)]
    #[case(-0.2)]
    #[case(1.5)]
    #[case(f64::NAN)]
    fn test_rejects_bad_threshold(#[case] alpha: f64) {
        let err = ComponentSelector::with_threshold(alpha)
            .select(&structured().view())
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rejects_constant_embeddings() {
        let x = Array2::<f64>::ones((4, 3));
        let err = ComponentSelector::default().select(&x.view()).unwrap_err();
        assert!(err.is_numerical());
    }
}
