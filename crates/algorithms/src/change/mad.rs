//! Canonical correlation analysis and MAD variates

use ndarray::{Array1, Array2};

use super::covariance::WeightedCovariance;
use super::eigen::generalized_eigen;
use super::linalg::spd_inverse;
use super::params::ImadParams;
use super::pixels::PixelStack;
use super::weights::WeightField;
use crate::maybe_rayon::*;
use sandwatch_core::{Error, Result};

/// Canonical vectors, one column per component: `a` projects image1,
/// `b` projects image2.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalVectors {
    pub a: Array2<f64>,
    pub b: Array2<f64>,
}

/// Canonical correlations (descending, in [0, 1]) with their vectors
#[derive(Debug, Clone)]
pub struct CanonicalAnalysis {
    pub correlations: Array1<f64>,
    pub vectors: CanonicalVectors,
}

/// Solve both canonical eigenproblems of a stacked covariance.
///
/// `S12 S22⁻¹ S21 a = ρ² S11 a` gives A and `S21 S11⁻¹ S12 b = ρ² S22 b`
/// gives B. Column `i` of B is negated when `aᵢᵀ S12 bᵢ < 0`, so each
/// pair of canonical variates is positively correlated.
pub fn canonical_analysis(cov: &WeightedCovariance, params: &ImadParams) -> Result<CanonicalAnalysis> {
    let s11 = cov.s11();
    let s22 = cov.s22();
    let s12 = cov.s12();
    let s21 = cov.s21();

    let s11_inv = spd_inverse(&s11, "S11")?;
    let s22_inv = spd_inverse(&s22, "S22")?;

    let c1 = s12.dot(&s22_inv).dot(&s21);
    let c2 = s21.dot(&s11_inv).dot(&s12);

    let side_a = generalized_eigen(&c1, &s11, "S11", params.covariance_epsilon)?;
    let side_b = generalized_eigen(&c2, &s22, "S22", params.covariance_epsilon)?;

    let correlations = side_a.values.mapv(|rho2| rho2.max(0.0).sqrt().min(1.0));

    let a = side_a.vectors;
    let mut b = side_b.vectors;
    for i in 0..cov.n_bands() {
        let cross = a.column(i).dot(&s12.dot(&b.column(i)));
        if cross < 0.0 {
            b.column_mut(i).mapv_inplace(|v| -v);
        }
    }

    Ok(CanonicalAnalysis {
        correlations,
        vectors: CanonicalVectors { a, b },
    })
}

/// MAD variates of every valid pixel with their weighted deviations
#[derive(Debug, Clone)]
pub struct MadVariates {
    /// Pixel-major MAD values, stride `n_bands`
    values: Vec<f64>,
    n_bands: usize,
    /// Weighted standard deviation of each MAD component, floored
    pub sigma: Array1<f64>,
    pub correlations: Array1<f64>,
    pub vectors: CanonicalVectors,
}

impl MadVariates {
    pub fn n_bands(&self) -> usize {
        self.n_bands
    }

    /// Number of pixels
    pub fn len(&self) -> usize {
        if self.n_bands == 0 { 0 } else { self.values.len() / self.n_bands }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// MAD components of the k-th valid pixel
    pub fn pixel(&self, k: usize) -> &[f64] {
        &self.values[k * self.n_bands..(k + 1) * self.n_bands]
    }

    /// Component `i` for every valid pixel
    pub fn component(&self, i: usize) -> Vec<f64> {
        self.values.iter().skip(i).step_by(self.n_bands).copied().collect()
    }
}

/// Project both images onto the canonical vectors and take the difference.
///
/// `MADᵢ = aᵢᵀ(x₁ - μ₁) - bᵢᵀ(x₂ - μ₂)` with the weighted means of `cov`.
/// Each component's sigma is its weighted standard deviation under
/// `weights`, never below `params.sigma_floor`.
pub fn mad_transform(
    pixels: &PixelStack,
    cov: &WeightedCovariance,
    weights: &WeightField,
    params: &ImadParams,
) -> Result<MadVariates> {
    let n = pixels.n_bands();
    if weights.len() != pixels.len() {
        return Err(Error::Algorithm(format!(
            "weight field has {} values for {} pixels",
            weights.len(),
            pixels.len()
        )));
    }

    let analysis = canonical_analysis(cov, params)?;
    let a = &analysis.vectors.a;
    let b = &analysis.vectors.b;
    let mean1 = cov.mean1();
    let mean2 = cov.mean2();

    let blocks = pixels.blocks();
    let projected: Vec<Vec<f64>> = (0..blocks.len())
        .into_par_iter()
        .map(|blk| {
            let range = blocks[blk].clone();
            let mut out = Vec::with_capacity(range.len() * n);
            let mut d1 = vec![0.0; n];
            let mut d2 = vec![0.0; n];
            for k in range {
                let (x1, x2) = pixels.pixel(k).split_at(n);
                for j in 0..n {
                    d1[j] = x1[j] - mean1[j];
                    d2[j] = x2[j] - mean2[j];
                }
                for i in 0..n {
                    let mut u = 0.0;
                    let mut v = 0.0;
                    for j in 0..n {
                        u += a[(j, i)] * d1[j];
                        v += b[(j, i)] * d2[j];
                    }
                    out.push(u - v);
                }
            }
            out
        })
        .collect();
    let values: Vec<f64> = projected.into_iter().flatten().collect();

    if values.iter().any(|v| !v.is_finite()) {
        return Err(Error::numerical("MAD variates", "projection produced non-finite values"));
    }

    let sigma = weighted_sigma(&values, n, weights, params.sigma_floor)?;

    Ok(MadVariates {
        values,
        n_bands: n,
        sigma,
        correlations: analysis.correlations,
        vectors: analysis.vectors,
    })
}

/// Weighted standard deviation per component, `sqrt(Σ w (m - m̄)² / Σ w)`
fn weighted_sigma(values: &[f64], n: usize, weights: &WeightField, floor: f64) -> Result<Array1<f64>> {
    let w = weights.values();
    let weight_sum = weights.sum();
    if !(weight_sum > 0.0) || !weight_sum.is_finite() {
        return Err(Error::numerical("weights", format!("weight sum is {}", weight_sum)));
    }

    let mut mean = vec![0.0; n];
    for (pixel, &wk) in values.chunks_exact(n).zip(w) {
        for (m, &v) in mean.iter_mut().zip(pixel) {
            *m += wk * v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= weight_sum);

    let mut var = vec![0.0; n];
    for (pixel, &wk) in values.chunks_exact(n).zip(w) {
        for ((s, &v), &m) in var.iter_mut().zip(pixel).zip(&mean) {
            *s += wk * (v - m) * (v - m);
        }
    }

    Ok(Array1::from_iter(var.into_iter().map(|s| (s / weight_sum).sqrt().max(floor))))
}
