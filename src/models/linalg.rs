//! Dense Cholesky helpers for the small symmetric systems the models solve.

use super::ModelError;

/// Lower-triangular `L` with `A = L Lᵀ`.
pub fn cholesky(a: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];

    for i in 0..n {
        if a[i].len() != n {
            return Err(ModelError::DimensionMismatch {
                expected: n,
                got: a[i].len(),
            });
        }
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }

            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return Err(ModelError::NotPositiveDefinite);
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    Ok(l)
}

/// Forward substitution: solves `L y = b`.
pub fn solve_lower(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i][j] * y[j];
        }
        y[i] = sum / l[i][i];
    }
    y
}

/// Backward substitution against the transpose: solves `Lᵀ x = y`.
pub fn solve_lower_transposed(l: &[Vec<f64>], y: &[f64]) -> Vec<f64> {
    let n = y.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j][i] * x[j];
        }
        x[i] = sum / l[i][i];
    }
    x
}

/// Solves `A x = b` for symmetric positive definite `A`.
pub fn solve_spd(a: &[Vec<f64>], b: &[f64]) -> Result<Vec<f64>, ModelError> {
    if a.len() != b.len() {
        return Err(ModelError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    let l = cholesky(a)?;
    Ok(solve_lower_transposed(&l, &solve_lower(&l, b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_spd_known_system() {
        let a = vec![
            vec![4.0, 12.0, -16.0],
            vec![12.0, 37.0, -43.0],
            vec![-16.0, -43.0, 98.0],
        ];
        let x_true = [1.0, -2.0, 3.0];
        let b: Vec<f64> = a
            .iter()
            .map(|row| row.iter().zip(x_true).map(|(a, x)| a * x).sum())
            .collect();
        let x = solve_spd(&a, &b).unwrap();
        for (got, want) in x.iter().zip(x_true) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn test_cholesky_factor() {
        let a = vec![vec![4.0, 2.0], vec![2.0, 5.0]];
        let l = cholesky(&a).unwrap();
        assert_eq!(l[0][0], 2.0);
        assert_eq!(l[1][0], 1.0);
        assert_eq!(l[1][1], 2.0);
        assert_eq!(l[0][1], 0.0);
    }

    #[test]
    fn test_rejects_indefinite() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 1.0]];
        assert_eq!(cholesky(&a), Err(ModelError::NotPositiveDefinite));
    }

    #[test]
    fn test_rejects_mismatched_rhs() {
        let a = vec![vec![1.0]];
        assert!(matches!(
            solve_spd(&a, &[1.0, 2.0]),
            Err(ModelError::DimensionMismatch { .. })
        ));
    }
}
