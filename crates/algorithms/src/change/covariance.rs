//! Weighted mean and covariance of the stacked band vectors
//!
//! The 2n×2n covariance of `[image1 bands.., image2 bands..]` is
//! partitioned into four n×n blocks:
//!
//! ```text
//! | S11  S12 |
//! | S21  S22 |
//! ```

use ndarray::{Array1, Array2, ArrayView1, s};

use super::linalg::{condition_number, max_asymmetry, normalized_determinant, symmetric_eigen};
use super::params::ImadParams;
use super::pixels::PixelStack;
use super::weights::WeightField;
use crate::maybe_rayon::*;
use sandwatch_core::{Error, Result};

/// Weighted statistics of one iteration
#[derive(Debug, Clone)]
pub struct WeightedCovariance {
    /// Weighted mean of each stacked band (length 2n)
    pub mean: Array1<f64>,
    /// Rescaled weighted covariance (2n×2n, symmetric)
    pub matrix: Array2<f64>,
    /// Sum of the pixel weights
    pub weight_sum: f64,
    /// Valid pixels in the pair
    pub valid_count: usize,
    /// Valid pixels with non-zero weight
    pub effective_count: usize,
    n_bands: usize,
}

impl WeightedCovariance {
    /// Bands per image (n)
    pub fn n_bands(&self) -> usize {
        self.n_bands
    }

    pub fn s11(&self) -> Array2<f64> {
        let n = self.n_bands;
        self.matrix.slice(s![..n, ..n]).to_owned()
    }

    pub fn s22(&self) -> Array2<f64> {
        let n = self.n_bands;
        self.matrix.slice(s![n.., n..]).to_owned()
    }

    pub fn s12(&self) -> Array2<f64> {
        let n = self.n_bands;
        self.matrix.slice(s![..n, n..]).to_owned()
    }

    pub fn s21(&self) -> Array2<f64> {
        let n = self.n_bands;
        self.matrix.slice(s![n.., ..n]).to_owned()
    }

    /// Weighted means of image1's bands
    pub fn mean1(&self) -> ArrayView1<'_, f64> {
        self.mean.slice(s![..self.n_bands])
    }

    /// Weighted means of image2's bands
    pub fn mean2(&self) -> ArrayView1<'_, f64> {
        self.mean.slice(s![self.n_bands..])
    }
}

/// Weighted mean and covariance of the pixel stack under `weights`.
///
/// The raw weighted covariance `Σ wₖ dₖ dₖᵀ / (N - 1)` is multiplied by
/// `N / Σ wₖ`, where `N` is the valid pixel count, so variances stay on the
/// same scale as weights fall below one on changed pixels.
///
/// Fails with [`Error::InsufficientData`] when at most 2n pixels carry
/// weight, and with [`Error::Numerical`] when the matrix or one of the
/// S11 / S22 blocks is singular, ill-conditioned or not positive
/// semi-definite.
pub fn weighted_covariance(
    pixels: &PixelStack,
    weights: &WeightField,
    params: &ImadParams,
) -> Result<WeightedCovariance> {
    let n = pixels.n_bands();
    let dim = 2 * n;

    if weights.len() != pixels.len() {
        return Err(Error::Algorithm(format!(
            "weight field has {} values for {} pixels",
            weights.len(),
            pixels.len()
        )));
    }

    let w = weights.values();
    let effective_count = w.iter().filter(|&&wk| wk > 0.0).count();
    if effective_count <= dim {
        return Err(Error::InsufficientData {
            valid: effective_count,
            required: dim + 1,
        });
    }

    let blocks = pixels.blocks();

    // Pass 1: weighted sums for the mean
    let partial_sums: Vec<(f64, Vec<f64>)> = (0..blocks.len())
        .into_par_iter()
        .map(|b| {
            let mut weight_sum = 0.0;
            let mut sums = vec![0.0; dim];
            for k in blocks[b].clone() {
                let wk = w[k];
                if wk == 0.0 {
                    continue;
                }
                weight_sum += wk;
                for (acc, &x) in sums.iter_mut().zip(pixels.pixel(k)) {
                    *acc += wk * x;
                }
            }
            (weight_sum, sums)
        })
        .collect();

    let mut weight_sum = 0.0;
    let mut sums = vec![0.0; dim];
    for (block_weight, block_sums) in partial_sums {
        weight_sum += block_weight;
        for (acc, s) in sums.iter_mut().zip(block_sums) {
            *acc += s;
        }
    }
    if !(weight_sum > 0.0) || !weight_sum.is_finite() {
        return Err(Error::numerical("weights", format!("weight sum is {}", weight_sum)));
    }
    let mean = Array1::from_vec(sums) / weight_sum;

    // Pass 2: centred cross-products, upper triangle only
    let partial_products: Vec<Vec<f64>> = (0..blocks.len())
        .into_par_iter()
        .map(|b| {
            let mut acc = vec![0.0; dim * dim];
            let mut d = vec![0.0; dim];
            for k in blocks[b].clone() {
                let wk = w[k];
                if wk == 0.0 {
                    continue;
                }
                for ((di, &x), &m) in d.iter_mut().zip(pixels.pixel(k)).zip(mean.iter()) {
                    *di = x - m;
                }
                for i in 0..dim {
                    for j in i..dim {
                        acc[i * dim + j] += wk * (d[i] * d[j]);
                    }
                }
            }
            acc
        })
        .collect();

    let mut products = vec![0.0; dim * dim];
    for block in partial_products {
        for (acc, p) in products.iter_mut().zip(block) {
            *acc += p;
        }
    }

    let valid_count = pixels.len();
    let factor = valid_count as f64 / ((valid_count - 1) as f64 * weight_sum);

    let mut matrix = Array2::<f64>::zeros((dim, dim));
    for i in 0..dim {
        for j in i..dim {
            let v = products[i * dim + j] * factor;
            matrix[(i, j)] = v;
            matrix[(j, i)] = v;
        }
        matrix[(i, i)] += params.regularization;
    }

    check_covariance(&matrix, n, params)?;

    Ok(WeightedCovariance {
        mean,
        matrix,
        weight_sum,
        valid_count,
        effective_count,
        n_bands: n,
    })
}

/// Verify a stacked 2n×2n covariance matrix is usable.
///
/// The full matrix must be finite, symmetric and positive semi-definite
/// (no eigenvalue below `-covariance_epsilon` relative to the largest).
/// The S11 and S22 blocks, which get inverted, must have positive
/// variances, a normalized determinant of at least `covariance_epsilon`
/// and a condition number within `max_condition_number`.
pub fn check_covariance(matrix: &Array2<f64>, n_bands: usize, params: &ImadParams) -> Result<()> {
    let n = n_bands;
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(Error::numerical("covariance", "matrix has non-finite entries"));
    }

    let scale = matrix.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(f64::MIN_POSITIVE);
    let asymmetry = max_asymmetry(matrix);
    if asymmetry > params.covariance_epsilon * scale {
        return Err(Error::numerical(
            "covariance",
            format!("matrix is not symmetric (deviation {:.3e})", asymmetry),
        ));
    }

    let (eigenvalues, _) = symmetric_eigen(matrix)?;
    let largest = eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
    let smallest = eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
    if smallest < -params.covariance_epsilon * largest.max(1.0) {
        return Err(Error::numerical(
            "covariance",
            format!("matrix is not positive semi-definite (eigenvalue {:.3e})", smallest),
        ));
    }

    check_block("S11", &matrix.slice(s![..n, ..n]).to_owned(), params)?;
    check_block("S22", &matrix.slice(s![n.., n..]).to_owned(), params)?;
    Ok(())
}

fn check_block(name: &'static str, block: &Array2<f64>, params: &ImadParams) -> Result<()> {
    for i in 0..block.nrows() {
        if !(block[(i, i)] > 0.0) {
            return Err(Error::numerical(name, format!("band {} has zero variance", i)));
        }
    }

    let (eigenvalues, _) = symmetric_eigen(block)?;
    let condition = condition_number(&eigenvalues);

    let det = normalized_determinant(block);
    if det < params.covariance_epsilon {
        return Err(Error::Numerical {
            matrix: name,
            reason: format!("near-singular (normalized determinant {:.3e})", det),
            condition: Some(condition),
        });
    }
    if condition > params.max_condition_number {
        return Err(Error::Numerical {
            matrix: name,
            reason: "ill-conditioned".into(),
            condition: Some(condition),
        });
    }
    Ok(())
}
