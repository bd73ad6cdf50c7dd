//! Small dense linear algebra on `ndarray` matrices
//!
//! Matrices here are band-by-band (at most a few dozen rows), so plain
//! O(n³) routines are used throughout.

use ndarray::{Array1, Array2};
use sandwatch_core::{Error, Result};

/// Off-diagonal magnitude at which Jacobi iteration stops, relative to the
/// matrix scale
const JACOBI_TOLERANCE: f64 = 1e-14;

/// Cholesky factor `L` (lower triangular, `A = L Lᵀ`), or `None` if `A`
/// is not numerically positive definite.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for j in 0..n {
        for i in j..n {
            let mut sum = a[(i, j)];
            for k in 0..j {
                sum -= l[(i, k)] * l[(j, k)];
            }

            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return None;
                }
                l[(j, j)] = sum.sqrt();
            } else {
                l[(i, j)] = sum / l[(j, j)];
            }
        }
    }
    Some(l)
}

/// Inverse of a lower triangular matrix with non-zero diagonal
pub fn lower_triangular_inverse(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let mut inv = Array2::<f64>::zeros((n, n));

    // Forward substitution against each unit vector
    for col in 0..n {
        for i in col..n {
            let mut sum = if i == col { 1.0 } else { 0.0 };
            for k in col..i {
                sum -= l[(i, k)] * inv[(k, col)];
            }
            inv[(i, col)] = sum / l[(i, i)];
        }
    }
    inv
}

/// Inverse of a symmetric positive-definite matrix via its Cholesky factor.
///
/// `name` identifies the matrix in the error when it is not invertible.
pub fn spd_inverse(a: &Array2<f64>, name: &'static str) -> Result<Array2<f64>> {
    let l = cholesky(a).ok_or_else(|| Error::numerical(name, "not positive definite, cannot invert"))?;
    let l_inv = lower_triangular_inverse(&l);
    Ok(symmetrize(&l_inv.t().dot(&l_inv)))
}

/// Determinant of the correlation matrix `D^-1/2 A D^-1/2`, `D = diag(A)`.
///
/// Scale-free measure of singularity in [0, 1] for a covariance matrix:
/// 1 for uncorrelated bands, 0 when some band is a linear combination of
/// the others. Zero or negative variances yield 0.
pub fn normalized_determinant(a: &Array2<f64>) -> f64 {
    let n = a.nrows();
    let diag: Vec<f64> = (0..n).map(|i| a[(i, i)]).collect();
    if diag.iter().any(|&d| !(d > 0.0) || !d.is_finite()) {
        return 0.0;
    }

    let scaled = Array2::from_shape_fn((n, n), |(i, j)| a[(i, j)] / (diag[i] * diag[j]).sqrt());
    match cholesky(&scaled) {
        Some(l) => (0..n).map(|i| l[(i, i)] * l[(i, i)]).product(),
        None => 0.0,
    }
}

/// `(A + Aᵀ) / 2`
pub fn symmetrize(a: &Array2<f64>) -> Array2<f64> {
    (a + &a.t()) * 0.5
}

/// Largest `|A[i,j] - A[j,i]|`
pub fn max_asymmetry(a: &Array2<f64>) -> f64 {
    let n = a.nrows();
    let mut worst = 0.0_f64;
    for i in 0..n {
        for j in (i + 1)..n {
            worst = worst.max((a[(i, j)] - a[(j, i)]).abs());
        }
    }
    worst
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns `(eigenvalues, eigenvectors)` with eigenvectors as columns,
/// in the order the rotations leave them (unsorted).
pub fn symmetric_eigen(matrix: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = matrix.nrows();
    if matrix.ncols() != n {
        return Err(Error::Algorithm(format!(
            "eigen-decomposition needs a square matrix, got {}x{}",
            n,
            matrix.ncols()
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(Error::numerical("eigen input", "matrix has non-finite entries"));
    }

    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);

    let scale = a.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
    if scale == 0.0 {
        return Ok((Array1::zeros(n), v));
    }
    let threshold = JACOBI_TOLERANCE * scale;
    let max_sweeps = 100;

    for _ in 0..max_sweeps {
        let off = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .fold(0.0_f64, |m, (i, j)| m.max(a[(i, j)].abs()));
        if off <= threshold {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[(p, q)];
                if apq.abs() <= threshold {
                    continue;
                }

                // Rotation angle that annihilates a[p][q]
                let tau = (a[(q, q)] - a[(p, p)]) / (2.0 * apq);
                let t = if tau.abs() > 1e150 {
                    0.5 / tau
                } else {
                    tau.signum() / (tau.abs() + (1.0 + tau * tau).sqrt())
                };
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[(k, p)];
                    let akq = a[(k, q)];
                    a[(k, p)] = c * akp - s * akq;
                    a[(k, q)] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[(p, k)];
                    let aqk = a[(q, k)];
                    a[(p, k)] = c * apk - s * aqk;
                    a[(q, k)] = s * apk + c * aqk;
                }
                a[(p, q)] = 0.0;
                a[(q, p)] = 0.0;

                for k in 0..n {
                    let vkp = v[(k, p)];
                    let vkq = v[(k, q)];
                    v[(k, p)] = c * vkp - s * vkq;
                    v[(k, q)] = s * vkp + c * vkq;
                }
            }
        }
    }

    let eigenvalues = Array1::from_shape_fn(n, |i| a[(i, i)]);
    if eigenvalues.iter().chain(v.iter()).any(|x| !x.is_finite()) {
        return Err(Error::numerical("eigen output", "non-finite eigenvalue or eigenvector"));
    }
    Ok((eigenvalues, v))
}

/// Condition number `λmax / λmin` of a symmetric matrix, infinite when
/// the smallest eigenvalue is not positive.
pub fn condition_number(eigenvalues: &Array1<f64>) -> f64 {
    let max = eigenvalues.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
    if min > 0.0 { max / min } else { f64::INFINITY }
}
