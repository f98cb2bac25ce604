use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::error::PortfolioError;
use crate::PortfolioResult;

/// Smallest eigenvalue still accepted as positive semi-definite.
pub const PSD_TOLERANCE: f64 = -1e-10;

// Element-wise closeness used for the diagonal and symmetry checks:
// |a - b| <= ATOL + RTOL * |b|.
const ATOL: f64 = 1e-8;
const RTOL: f64 = 1e-5;

/// Outcome of a correlation matrix check. Reported as data, never as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationCheck {
    pub valid: bool,
    pub message: String,
}

impl CorrelationCheck {
    fn ok() -> Self {
        Self {
            valid: true,
            message: "Valid correlation matrix".into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= ATOL + RTOL * b.abs()
}

/// Check that `matrix` is a valid correlation matrix.
///
/// Checks run in order and stop at the first failure: square shape, unit
/// diagonal, symmetry, entries within `[-1, 1]`, and a smallest eigenvalue
/// no lower than [`PSD_TOLERANCE`].
pub fn validate_correlation(matrix: &[Vec<f64>]) -> CorrelationCheck {
    let n = matrix.len();
    if n == 0 || matrix.iter().any(|row| row.len() != n) {
        return CorrelationCheck::fail("Matrix must be square");
    }

    if (0..n).any(|i| !is_close(matrix[i][i], 1.0)) {
        return CorrelationCheck::fail("Diagonal elements must be 1");
    }

    for i in 0..n {
        for j in 0..n {
            if !is_close(matrix[i][j], matrix[j][i]) {
                return CorrelationCheck::fail("Matrix must be symmetric");
            }
        }
    }

    // NaN fails here: the negated comparison catches it.
    if matrix.iter().flatten().any(|v| !(v.abs() <= 1.0)) {
        return CorrelationCheck::fail("Correlations must be in [-1, 1]");
    }

    let min_eigenvalue = min_eigenvalue(matrix);
    if min_eigenvalue < PSD_TOLERANCE {
        return CorrelationCheck::fail(format!(
            "Matrix is not positive semi-definite. Min eigenvalue: {min_eigenvalue:.6}"
        ));
    }

    CorrelationCheck::ok()
}

/// Smallest eigenvalue of a symmetric matrix.
pub fn min_eigenvalue(matrix: &[Vec<f64>]) -> f64 {
    let n = matrix.len();
    let m = DMatrix::from_fn(n, n, |i, j| matrix[i][j]);
    SymmetricEigen::new(m)
        .eigenvalues
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min)
}

/// Lower-triangular Cholesky factor `L` with `L Lᵀ = matrix`.
///
/// Requires strict positive definiteness: a pivot that is not strictly
/// positive fails with [`PortfolioError::NotPositiveDefinite`]. Only the
/// lower triangle of `matrix` is read.
#[allow(clippy::needless_range_loop)]
pub fn cholesky(matrix: &[Vec<f64>]) -> PortfolioResult<Vec<Vec<f64>>> {
    let n = matrix.len();
    if n == 0 || matrix.iter().any(|row| row.len() != n) {
        return Err(PortfolioError::InvalidInput {
            field: "correlation_matrix".into(),
            reason: format!("Expected a non-empty square matrix, got {n} rows"),
        });
    }

    let mut l = vec![vec![0.0_f64; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }

            if i == j {
                if !(sum > 0.0) {
                    return Err(PortfolioError::NotPositiveDefinite {
                        pivot: i,
                        value: sum,
                    });
                }
                l[i][i] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    Ok(l)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reconstruct(l: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let n = l.len();
        (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| (0..n).map(|k| l[i][k] * l[j][k]).sum())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_valid_correlation_matrix() {
        let check = validate_correlation(&[vec![1.0, 0.5], vec![0.5, 1.0]]);
        assert_eq!(
            check,
            CorrelationCheck {
                valid: true,
                message: "Valid correlation matrix".into()
            }
        );
    }

    #[test]
    fn test_identity_is_valid() {
        let m = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        assert!(validate_correlation(&m).valid);
    }

    #[test]
    fn test_not_square() {
        let check = validate_correlation(&[vec![1.0, 0.5, 0.1], vec![0.5, 1.0, 0.2]]);
        assert!(!check.valid);
        assert_eq!(check.message, "Matrix must be square");
    }

    #[test]
    fn test_ragged_rows_not_square() {
        let check = validate_correlation(&[vec![1.0, 0.5], vec![0.5]]);
        assert_eq!(check.message, "Matrix must be square");
    }

    #[test]
    fn test_empty_matrix_rejected() {
        assert!(!validate_correlation(&[]).valid);
    }

    #[test]
    fn test_invalid_diagonal() {
        let check = validate_correlation(&[vec![0.5, 0.3], vec![0.3, 1.0]]);
        assert!(!check.valid);
        assert_eq!(check.message, "Diagonal elements must be 1");
    }

    #[test]
    fn test_not_symmetric() {
        let check = validate_correlation(&[vec![1.0, 0.3], vec![0.2, 1.0]]);
        assert!(!check.valid);
        assert_eq!(check.message, "Matrix must be symmetric");
    }

    #[test]
    fn test_out_of_range() {
        let check = validate_correlation(&[vec![1.0, 1.5], vec![1.5, 1.0]]);
        assert!(!check.valid);
        assert_eq!(check.message, "Correlations must be in [-1, 1]");
    }

    #[test]
    fn test_nan_entry_rejected() {
        let check = validate_correlation(&[vec![1.0, f64::NAN], vec![f64::NAN, 1.0]]);
        assert!(!check.valid);
    }

    #[test]
    fn test_not_psd() {
        let m = vec![
            vec![1.0, 0.9, -0.9],
            vec![0.9, 1.0, 0.9],
            vec![-0.9, 0.9, 1.0],
        ];
        let check = validate_correlation(&m);
        assert!(!check.valid);
        assert!(check.message.contains("positive semi-definite"), "{}", check.message);
        assert!(check.message.contains("Min eigenvalue: -"), "{}", check.message);
    }

    #[test]
    fn test_check_order_diagonal_before_symmetry() {
        // Both the diagonal and symmetry are wrong; the diagonal is reported.
        let check = validate_correlation(&[vec![2.0, 0.3], vec![0.1, 1.0]]);
        assert_eq!(check.message, "Diagonal elements must be 1");
    }

    #[test]
    fn test_min_eigenvalue_two_by_two() {
        // Eigenvalues of [[1, r], [r, 1]] are 1 ± r.
        let ev = min_eigenvalue(&[vec![1.0, -0.3], vec![-0.3, 1.0]]);
        assert!((ev - 0.7).abs() < 1e-12, "ev={ev}");
    }

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let m = vec![
            vec![1.0, 0.3, 0.1],
            vec![0.3, 1.0, 0.5],
            vec![0.1, 0.5, 1.0],
        ];
        let l = cholesky(&m).unwrap();
        for (i, row) in l.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                if j > i {
                    assert_eq!(*v, 0.0);
                }
            }
        }
        let back = reconstruct(&l);
        for i in 0..3 {
            for j in 0..3 {
                assert!((back[i][j] - m[i][j]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_cholesky_two_asset_closed_form() {
        let l = cholesky(&[vec![1.0, -0.3], vec![-0.3, 1.0]]).unwrap();
        assert_eq!(l[0], vec![1.0, 0.0]);
        assert!((l[1][0] + 0.3).abs() < 1e-15);
        assert!((l[1][1] - (1.0_f64 - 0.09).sqrt()).abs() < 1e-15);
    }

    #[test]
    fn test_cholesky_fails_on_indefinite_matrix() {
        let m = vec![
            vec![1.0, 0.9, -0.9],
            vec![0.9, 1.0, 0.9],
            vec![-0.9, 0.9, 1.0],
        ];
        match cholesky(&m) {
            Err(PortfolioError::NotPositiveDefinite { pivot, value }) => {
                assert_eq!(pivot, 2);
                assert!(value < 0.0);
            }
            other => panic!("expected NotPositiveDefinite, got {other:?}"),
        }
    }

    #[test]
    fn test_cholesky_fails_on_singular_matrix() {
        // Perfect correlation is PSD but not positive definite.
        let m = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        assert!(validate_correlation(&m).valid);
        assert!(matches!(
            cholesky(&m),
            Err(PortfolioError::NotPositiveDefinite { pivot: 1, .. })
        ));
    }
}
