//! Dense linear algebra helpers
//!
//! Symmetric eigen-decomposition (cyclic Jacobi), the right singular
//! spectrum of a data matrix, and a partial-pivot linear solver. These are
//! the only matrix kernels the estimators need, so the crate carries no
//! LAPACK binding.

use crate::error::{ModelError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Default number of Jacobi sweeps before giving up on convergence
pub const DEFAULT_MAX_SWEEPS: usize = 100;

/// Default relative tolerance on the off-diagonal Frobenius norm
pub const DEFAULT_TOLERANCE: f64 = 1e-12;

/// Pivots below this (relative to the largest entry) are treated as singular
const SINGULAR_PIVOT: f64 = 1e-12;

/// Result of eigenvalue decomposition
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    /// Eigenvalues (sorted in descending order)
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors (columns are eigenvectors)
    pub eigenvectors: Array2<f64>,
}

/// Right singular spectrum of a data matrix `X` (n x D)
///
/// `eigenvalues` are the non-negative eigenvalues of `XᵀX` (squared singular
/// values) in descending order, and `right_vectors` holds the matching right
/// singular vectors as columns (D x r, r = min(n, D)).
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Squared singular values, descending
    pub eigenvalues: Array1<f64>,
    /// Right singular vectors (columns)
    pub right_vectors: Array2<f64>,
}

/// Whether every element of the array is finite.
pub fn all_finite<'a, I>(values: I) -> bool
where
    I: IntoIterator<Item = &'a f64>,
{
    values.into_iter().all(|v| v.is_finite())
}

/// Subtract the column means from `x`, returning the centered matrix and the means.
pub fn center_columns(x: &ArrayView2<'_, f64>) -> Result<(Array2<f64>, Array1<f64>)> {
    let means = x
        .mean_axis(Axis(0))
        .ok_or_else(|| ModelError::Configuration("cannot center an empty matrix".to_string()))?;
    let centered = x - &means.view().insert_axis(Axis(0));
    Ok((centered, means))
}

/// Jacobi eigenvalue decomposition for symmetric matrices
///
/// Cyclic sweeps over all off-diagonal pairs until the off-diagonal
/// Frobenius norm drops below `tolerance` times the matrix norm. Stable and
/// simple; the matrices handed to it here are at most min(n, D) square.
///
/// # Arguments
/// * `matrix` - Symmetric matrix to decompose
/// * `max_sweeps` - Maximum number of full sweeps
/// * `tolerance` - Relative convergence tolerance for off-diagonal mass
///
/// # Returns
/// * Eigenvalues and eigenvectors, sorted by descending eigenvalue
pub fn jacobi_eigendecomp(
    matrix: &Array2<f64>,
    max_sweeps: usize,
    tolerance: f64,
) -> Result<EigenDecomposition> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(ModelError::DimensionMismatch {
            expected: n,
            actual: matrix.ncols(),
        });
    }
    if !all_finite(matrix.iter()) {
        return Err(ModelError::non_finite("eigen-decomposition input"));
    }

    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);
    let scale = a.iter().map(|x| x * x).sum::<f64>().sqrt();

    if scale > 0.0 {
        for _sweep in 0..max_sweeps {
            if off_diagonal_norm(&a) <= tolerance * scale {
                break;
            }
            for p in 0..n {
                for q in (p + 1)..n {
                    if a[[p, q]].abs() <= f64::MIN_POSITIVE {
                        continue;
                    }
                    let (cos_theta, sin_theta) = compute_rotation(a[[p, p]], a[[q, q]], a[[p, q]]);
                    apply_jacobi_rotation(&mut a, &mut v, p, q, cos_theta, sin_theta);
                }
            }
        }
    }

    let eigenvalues: Vec<f64> = (0..n).map(|i| a[[i, i]]).collect();

    // Sort eigenvalues and eigenvectors in descending order
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&i, &j| {
        eigenvalues[j]
            .partial_cmp(&eigenvalues[i])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let sorted_eigenvalues = indices.iter().map(|&i| eigenvalues[i]).collect();
    let mut sorted_eigenvectors = Array2::<f64>::zeros((n, n));
    for (new_idx, &old_idx) in indices.iter().enumerate() {
        sorted_eigenvectors
            .column_mut(new_idx)
            .assign(&v.column(old_idx));
    }

    Ok(EigenDecomposition {
        eigenvalues: sorted_eigenvalues,
        eigenvectors: sorted_eigenvectors,
    })
}

fn off_diagonal_norm(matrix: &Array2<f64>) -> f64 {
    let n = matrix.nrows();
    let mut sum = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            sum += 2.0 * matrix[[i, j]] * matrix[[i, j]];
        }
    }
    sum.sqrt()
}

/// Compute the rotation (cos, sin) for Jacobi rotation
fn compute_rotation(app: f64, aqq: f64, apq: f64) -> (f64, f64) {
    let tau = (aqq - app) / (2.0 * apq);
    let t = if tau >= 0.0 {
        1.0 / (tau + (1.0 + tau * tau).sqrt())
    } else {
        -1.0 / (-tau + (1.0 + tau * tau).sqrt())
    };

    let cos_theta = 1.0 / (1.0 + t * t).sqrt();
    let sin_theta = t * cos_theta;

    (cos_theta, sin_theta)
}

/// Apply a Jacobi rotation to matrix A and eigenvector matrix V
fn apply_jacobi_rotation(
    a: &mut Array2<f64>,
    v: &mut Array2<f64>,
    p: usize,
    q: usize,
    cos_theta: f64,
    sin_theta: f64,
) {
    let n = a.nrows();

    let app = a[[p, p]];
    let aqq = a[[q, q]];
    let apq = a[[p, q]];

    a[[p, p]] = cos_theta * cos_theta * app - 2.0 * cos_theta * sin_theta * apq
        + sin_theta * sin_theta * aqq;
    a[[q, q]] = sin_theta * sin_theta * app
        + 2.0 * cos_theta * sin_theta * apq
        + cos_theta * cos_theta * aqq;
    a[[p, q]] = 0.0;
    a[[q, p]] = 0.0;

    for i in 0..n {
        if i != p && i != q {
            let aip = a[[i, p]];
            let aiq = a[[i, q]];

            a[[i, p]] = cos_theta * aip - sin_theta * aiq;
            a[[p, i]] = a[[i, p]];

            a[[i, q]] = sin_theta * aip + cos_theta * aiq;
            a[[q, i]] = a[[i, q]];
        }
    }

    for i in 0..n {
        let vip = v[[i, p]];
        let viq = v[[i, q]];

        v[[i, p]] = cos_theta * vip - sin_theta * viq;
        v[[i, q]] = sin_theta * vip + cos_theta * viq;
    }
}

/// Right singular spectrum of `x` (n x D).
///
/// Decomposes whichever of `XᵀX` (D x D) or `XXᵀ` (n x n) is smaller. In the
/// Gram case the right vectors are recovered as `Xᵀu / σ`; directions with a
/// vanishing singular value get a zero column.
pub fn right_spectrum(x: &ArrayView2<'_, f64>) -> Result<Spectrum> {
    let (n, d) = x.dim();
    if n == 0 || d == 0 {
        return Err(ModelError::Configuration(
            "cannot decompose an empty matrix".to_string(),
        ));
    }

    if d <= n {
        let gram = x.t().dot(x);
        let decomp = jacobi_eigendecomp(&gram, DEFAULT_MAX_SWEEPS, DEFAULT_TOLERANCE)?;
        return Ok(Spectrum {
            eigenvalues: decomp.eigenvalues.mapv(|v| v.max(0.0)),
            right_vectors: decomp.eigenvectors,
        });
    }

    let gram = x.dot(&x.t());
    let decomp = jacobi_eigendecomp(&gram, DEFAULT_MAX_SWEEPS, DEFAULT_TOLERANCE)?;
    let eigenvalues = decomp.eigenvalues.mapv(|v| v.max(0.0));
    let largest = eigenvalues.first().copied().unwrap_or(0.0);

    let mut right_vectors = Array2::<f64>::zeros((d, n));
    for j in 0..n {
        let sigma = eigenvalues[j].sqrt();
        if eigenvalues[j] <= largest * 1e-14 || sigma == 0.0 {
            continue;
        }
        let column = x.t().dot(&decomp.eigenvectors.column(j)) / sigma;
        right_vectors.column_mut(j).assign(&column);
    }

    Ok(Spectrum {
        eigenvalues,
        right_vectors,
    })
}

/// Solve `A X = B` for square `A` by Gaussian elimination with partial pivoting.
pub fn solve_matrix(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(ModelError::DimensionMismatch {
            expected: n,
            actual: a.ncols(),
        });
    }
    if b.nrows() != n {
        return Err(ModelError::DimensionMismatch {
            expected: n,
            actual: b.nrows(),
        });
    }
    if !all_finite(a.iter()) || !all_finite(b.iter()) {
        return Err(ModelError::non_finite("linear system"));
    }

    let mut lhs = a.clone();
    let mut rhs = b.clone();
    let scale = lhs.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 {
        return Err(ModelError::Numerical("singular system: zero matrix".to_string()));
    }

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| {
                lhs[[i, col]]
                    .abs()
                    .partial_cmp(&lhs[[j, col]].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        let pivot = lhs[[pivot_row, col]];
        if pivot.abs() <= SINGULAR_PIVOT * scale {
            return Err(ModelError::Numerical(format!(
                "singular system: pivot {pivot:e} in column {col}"
            )));
        }

        if pivot_row != col {
            for k in 0..n {
                lhs.swap([col, k], [pivot_row, k]);
            }
            for k in 0..rhs.ncols() {
                rhs.swap([col, k], [pivot_row, k]);
            }
        }

        for row in (col + 1)..n {
            let factor = lhs[[row, col]] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                lhs[[row, k]] -= factor * lhs[[col, k]];
            }
            for k in 0..rhs.ncols() {
                rhs[[row, k]] -= factor * rhs[[col, k]];
            }
        }
    }

    // Back substitution
    let mut solution = Array2::<f64>::zeros(rhs.raw_dim());
    for k in 0..rhs.ncols() {
        for row in (0..n).rev() {
            let mut acc = rhs[[row, k]];
            for j in (row + 1)..n {
                acc -= lhs[[row, j]] * solution[[j, k]];
            }
            solution[[row, k]] = acc / lhs[[row, row]];
        }
    }

    if !all_finite(solution.iter()) {
        return Err(ModelError::non_finite("linear solution"));
    }
    Ok(solution)
}

/// Solve `A x = b` for a single right-hand side.
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let rhs = b.view().insert_axis(Axis(1)).to_owned();
    let solution = solve_matrix(a, &rhs)?;
    Ok(solution.column(0).to_owned())
}

/// Inverse of a square matrix.
pub fn inverse(a: &Array2<f64>) -> Result<Array2<f64>> {
    solve_matrix(a, &Array2::eye(a.nrows()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn reconstruct(decomp: &EigenDecomposition) -> Array2<f64> {
        let v = &decomp.eigenvectors;
        let lambda = Array2::from_diag(&decomp.eigenvalues);
        v.dot(&lambda).dot(&v.t())
    }

    #[test]
    fn test_jacobi_eigendecomp_identity() {
        let matrix = Array2::<f64>::eye(3);
        let decomp = jacobi_eigendecomp(&matrix, 100, 1e-12).unwrap();

        for &val in decomp.eigenvalues.iter() {
            assert_abs_diff_eq!(val, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_jacobi_eigendecomp_diagonal() {
        let matrix = Array2::from_diag(&array![1.0, 4.0, 2.0]);
        let decomp = jacobi_eigendecomp(&matrix, 100, 1e-12).unwrap();

        assert_abs_diff_eq!(decomp.eigenvalues[0], 4.0, epsilon = 1e-10);
        assert_abs_diff_eq!(decomp.eigenvalues[1], 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(decomp.eigenvalues[2], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_jacobi_eigendecomp_reconstructs() {
        let matrix = array![[2.0, 1.0, 1.0], [1.0, 2.0, 1.0], [1.0, 1.0, 2.0]];
        let decomp = jacobi_eigendecomp(&matrix, 100, 1e-12).unwrap();

        assert_abs_diff_eq!(decomp.eigenvalues[0], 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(decomp.eigenvalues[1], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(decomp.eigenvalues[2], 1.0, epsilon = 1e-9);

        let reconstructed = reconstruct(&decomp);
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(matrix[[i, j]], reconstructed[[i, j]], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_jacobi_rejects_non_square() {
        let matrix = Array2::<f64>::zeros((2, 3));
        assert!(jacobi_eigendecomp(&matrix, 100, 1e-12).is_err());
    }

    #[test]
    fn test_right_spectrum_matches_both_sides() {
        // Wide matrix goes through the Gram path, its transpose through the covariance path
        let wide = array![[1.0, 0.0, 2.0, 0.0], [0.0, 3.0, 0.0, 1.0]];
        let tall = wide.t().to_owned();

        let from_wide = right_spectrum(&wide.view()).unwrap();
        let from_tall = right_spectrum(&tall.view()).unwrap();

        assert_abs_diff_eq!(from_wide.eigenvalues[0], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(from_wide.eigenvalues[1], 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(from_tall.eigenvalues[0], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(from_tall.eigenvalues[1], 5.0, epsilon = 1e-9);

        // Right vectors of the wide matrix are unit length
        for j in 0..2 {
            let norm = from_wide.right_vectors.column(j).dot(&from_wide.right_vectors.column(j));
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_solve_with_pivoting() {
        let a = array![[0.0, 2.0], [3.0, 1.0]];
        let b = array![4.0, 5.0];
        let x = solve(&a, &b).unwrap();
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_solve_singular() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        let b = array![1.0, 2.0];
        let err = solve(&a, &b).unwrap_err();
        assert!(err.is_numerical());
    }

    #[test]
    fn test_inverse() {
        let a = array![[4.0, 7.0], [2.0, 6.0]];
        let inv = inverse(&a).unwrap();
        let product = a.dot(&inv);
        assert_abs_diff_eq!(product[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(product[[0, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(product[[1, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(product[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_center_columns() {
        let x = array![[1.0, 10.0], [3.0, 20.0]];
        let (centered, means) = center_columns(&x.view()).unwrap();
        assert_abs_diff_eq!(means[0], 2.0);
        assert_abs_diff_eq!(means[1], 15.0);
        assert_abs_diff_eq!(centered[[0, 0]], -1.0);
        assert_abs_diff_eq!(centered[[1, 1]], 5.0);
    }
}
