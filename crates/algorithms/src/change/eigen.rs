//! Generalized symmetric eigenproblem `C x = λ B x`
//!
//! `B` is reduced away with its Cholesky factor `B = L Lᵀ`: the standard
//! problem `L⁻¹ C L⁻ᵀ y = λ y` has the same eigenvalues as `B⁻¹ C`, and
//! `x = L⁻ᵀ y` recovers its eigenvectors.

use ndarray::{Array1, Array2};

use super::linalg::{cholesky, lower_triangular_inverse, normalized_determinant, symmetric_eigen, symmetrize};
use sandwatch_core::{Error, Result};

/// Eigenpairs ordered by descending `|λ|`, one unit-length column per value
#[derive(Debug, Clone)]
pub struct GeneralizedEigen {
    pub values: Array1<f64>,
    pub vectors: Array2<f64>,
}

/// Solve `C x = λ B x` for symmetric `c` and positive-definite `b`.
///
/// Eigenpairs are sorted by descending eigenvalue magnitude, ties kept in
/// their original order. Each eigenvector is scaled to unit length and its
/// sign chosen so the entry of largest magnitude is positive.
///
/// `b_name` identifies `b` in errors. Fails with [`Error::Numerical`] when
/// the normalized determinant of `b` is below `epsilon`, when `b` has no
/// Cholesky factor, or when the solution is not finite.
pub fn generalized_eigen(
    c: &Array2<f64>,
    b: &Array2<f64>,
    b_name: &'static str,
    epsilon: f64,
) -> Result<GeneralizedEigen> {
    let n = b.nrows();
    if b.ncols() != n || c.dim() != (n, n) {
        return Err(Error::Algorithm(format!(
            "generalized eigenproblem needs square matrices of one size, got {:?} and {:?}",
            c.dim(),
            b.dim()
        )));
    }
    if c.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(Error::numerical(b_name, "eigenproblem input has non-finite entries"));
    }

    let det = normalized_determinant(b);
    if det < epsilon {
        return Err(Error::numerical(
            b_name,
            format!("not invertible (normalized determinant {:.3e})", det),
        ));
    }
    let l = cholesky(b).ok_or_else(|| Error::numerical(b_name, "not positive definite"))?;
    let l_inv = lower_triangular_inverse(&l);

    let reduced = symmetrize(&l_inv.dot(&symmetrize(c)).dot(&l_inv.t()));
    let (values, y) = symmetric_eigen(&reduced)?;
    let x = l_inv.t().dot(&y);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| values[j].abs().total_cmp(&values[i].abs()));

    let mut sorted_values = Array1::<f64>::zeros(n);
    let mut sorted_vectors = Array2::<f64>::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        sorted_values[dst] = values[src];

        let column = x.column(src);
        let norm = column.dot(&column).sqrt();
        if !(norm > 0.0) || !norm.is_finite() {
            return Err(Error::numerical(b_name, format!("eigenvector {} has norm {}", src, norm)));
        }

        // Largest-magnitude entry, first one on ties
        let pivot = column
            .iter()
            .enumerate()
            .fold(0, |best, (k, v)| if v.abs() > column[best].abs() { k } else { best });
        let scale = if column[pivot] < 0.0 { -1.0 / norm } else { 1.0 / norm };

        for k in 0..n {
            sorted_vectors[(k, dst)] = column[k] * scale;
        }
    }

    if sorted_values.iter().chain(sorted_vectors.iter()).any(|v| !v.is_finite()) {
        return Err(Error::numerical(b_name, "non-finite eigenvalue or eigenvector"));
    }

    Ok(GeneralizedEigen {
        values: sorted_values,
        vectors: sorted_vectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn check_pairs(c: &Array2<f64>, b: &Array2<f64>, eig: &GeneralizedEigen) {
        for k in 0..eig.values.len() {
            let x = eig.vectors.column(k);
            let cx = c.dot(&x);
            let bx = b.dot(&x);
            for i in 0..x.len() {
                assert_abs_diff_eq!(cx[i], eig.values[k] * bx[i], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_identity_b_is_standard_problem() {
        let c = array![[2.0, 1.0], [1.0, 2.0]];
        let eig = generalized_eigen(&c, &Array2::eye(2), "B", 1e-12).unwrap();

        assert_abs_diff_eq!(eig.values[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.values[1], 1.0, epsilon = 1e-12);
        let s = 0.5_f64.sqrt();
        assert_abs_diff_eq!(eig.vectors[(0, 0)], s, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.vectors[(1, 0)], s, epsilon = 1e-12);
    }

    #[test]
    fn test_general_pairs_satisfy_equation() {
        let c = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 1.0]];
        let b = array![[2.0, 0.3, 0.0], [0.3, 1.5, 0.1], [0.0, 0.1, 1.0]];
        let eig = generalized_eigen(&c, &b, "B", 1e-12).unwrap();
        check_pairs(&c, &b, &eig);
    }

    #[test]
    fn test_sorted_by_magnitude() {
        let c = Array2::from_diag(&array![0.5, -3.0, 2.0]);
        let eig = generalized_eigen(&c, &Array2::eye(3), "B", 1e-12).unwrap();
        assert_eq!(eig.values.to_vec(), vec![-3.0, 2.0, 0.5]);
        assert_eq!(eig.vectors.column(0).to_vec(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_ties_keep_index_order() {
        let c = Array2::from_diag(&array![1.0, 2.0, 1.0]);
        let eig = generalized_eigen(&c, &Array2::eye(3), "B", 1e-12).unwrap();
        assert_eq!(eig.vectors.column(1).to_vec(), vec![1.0, 0.0, 0.0]);
        assert_eq!(eig.vectors.column(2).to_vec(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unit_length_and_sign() {
        let c = array![[4.0, -1.5], [-1.5, 1.0]];
        let b = array![[3.0, 0.5], [0.5, 2.0]];
        let eig = generalized_eigen(&c, &b, "B", 1e-12).unwrap();

        for k in 0..2 {
            let col = eig.vectors.column(k);
            assert_abs_diff_eq!(col.dot(&col), 1.0, epsilon = 1e-12);
            let largest = col.iter().cloned().fold(0.0_f64, |m, v| if v.abs() > m.abs() { v } else { m });
            assert!(largest > 0.0);
        }
    }

    #[test]
    fn test_singular_b_names_matrix() {
        let c = Array2::eye(2);
        let b = array![[1.0, 1.0], [1.0, 1.0]];
        let err = generalized_eigen(&c, &b, "S22", 1e-12).unwrap_err();
        assert!(matches!(err, Error::Numerical { matrix: "S22", .. }));
    }

    #[test]
    fn test_non_finite_input() {
        let c = array![[f64::NAN, 0.0], [0.0, 1.0]];
        let err = generalized_eigen(&c, &Array2::eye(2), "S11", 1e-12).unwrap_err();
        assert!(matches!(err, Error::Numerical { matrix: "S11", .. }));
    }
}
