//! Iteratively reweighted Multivariate Alteration Detection (iMAD)
//!
//! Each iteration estimates the weighted covariance of the stacked image
//! pair, solves the canonical correlation problem, forms MAD variates and
//! turns their chi-squared statistic into the next iteration's no-change
//! weights. Pixels that look changed lose influence on the background
//! statistics, which sharpens the change signal.
//!
//! Reference:
//! Nielsen, A. A. (2007). The regularized iteratively reweighted MAD method
//! for change detection in multi- and hyperspectral data.
//! IEEE Transactions on Image Processing, 16(2), 463-478.

use ndarray::Zip;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::fmt;
use tracing::{debug, info, warn};

use super::covariance::weighted_covariance;
use super::mad::{CanonicalVectors, MadVariates, mad_transform};
use super::params::ImadParams;
use super::pixels::PixelStack;
use super::weights::{WeightField, WeightUpdate, update_weights};
use sandwatch_core::raster::{MultibandRaster, Raster};
use sandwatch_core::{Algorithm, Error, Result};

/// Why the iteration stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Canonical correlations moved less than the convergence tolerance
    Converged,
    /// The iteration cap was reached
    MaxIterations,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Converged => write!(f, "converged"),
            Termination::MaxIterations => write!(f, "max_iterations"),
        }
    }
}

/// Canonical correlations of the current and previous iteration
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceState {
    pub iteration: usize,
    pub current: Vec<f64>,
    pub previous: Option<Vec<f64>>,
}

impl ConvergenceState {
    /// Largest absolute change of any correlation, `None` on the first
    /// iteration
    pub fn max_delta(&self) -> Option<f64> {
        self.previous.as_ref().map(|prev| {
            self.current
                .iter()
                .zip(prev)
                .fold(0.0_f64, |m, (c, p)| m.max((c - p).abs()))
        })
    }

    /// Early stop is only possible with a tolerance and a previous iteration
    pub fn has_converged(&self, tolerance: Option<f64>) -> bool {
        match (tolerance, self.max_delta()) {
            (Some(tol), Some(delta)) => delta < tol,
            _ => false,
        }
    }
}

/// Summary of one completed iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration index
    pub iteration: usize,
    pub correlations: Vec<f64>,
    /// Sum of the weights the covariance was estimated with
    pub weight_sum: f64,
    pub max_delta: Option<f64>,
}

/// Output of a successful iMAD run.
///
/// Rasters share the first input's grid. Pixels invalid in either input
/// are NaN in `chi_squared` and `mad`, and 0.0 in `weights`.
#[derive(Debug, Clone)]
pub struct ImadResult {
    /// Sum of squared standardized MAD variates
    pub chi_squared: Raster<f64>,
    /// Final no-change probabilities in [0, 1]
    pub weights: Raster<f64>,
    /// One band per canonical component
    pub mad: MultibandRaster,
    /// Final canonical correlations, descending
    pub correlations: Vec<f64>,
    pub vectors: CanonicalVectors,
    pub iterations: usize,
    pub termination: Termination,
    pub history: Vec<IterationRecord>,
}

impl ImadResult {
    /// Bands per input image
    pub fn n_bands(&self) -> usize {
        self.mad.n_bands()
    }

    /// `1 - weight` on valid pixels, NaN elsewhere
    pub fn change_probability(&self) -> Raster<f64> {
        let (rows, cols) = self.chi_squared.shape();
        let mut out = self.chi_squared.with_same_meta::<f64>(rows, cols);
        out.set_nodata(Some(f64::NAN));
        *out.data_mut() = Zip::from(self.chi_squared.data())
            .and(self.weights.data())
            .map_collect(|&chi, &w| if chi.is_nan() { f64::NAN } else { 1.0 - w });
        out
    }

    /// Binary change map: 1.0 where chi-squared exceeds the `1 - significance`
    /// quantile of χ²(n), 0.0 below it, NaN on invalid pixels.
    pub fn change_mask(&self, significance: f64) -> Result<Raster<f64>> {
        if !(significance > 0.0 && significance < 1.0) {
            return Err(Error::InvalidParameter {
                name: "significance",
                value: significance.to_string(),
                reason: "must lie strictly between 0 and 1".into(),
            });
        }
        let dof = self.n_bands();
        let dist = ChiSquared::new(dof as f64)
            .map_err(|e| Error::Algorithm(format!("chi-squared distribution with {} dof: {}", dof, e)))?;
        let threshold = dist.inverse_cdf(1.0 - significance);

        let (rows, cols) = self.chi_squared.shape();
        let mut out = self.chi_squared.with_same_meta::<f64>(rows, cols);
        out.set_nodata(Some(f64::NAN));
        *out.data_mut() = self.chi_squared.data().mapv(|chi| {
            if chi.is_nan() {
                f64::NAN
            } else if chi > threshold {
                1.0
            } else {
                0.0
            }
        });
        Ok(out)
    }
}

/// iMAD change detection algorithm
#[derive(Debug, Clone, Default)]
pub struct Imad;

impl Algorithm for Imad {
    type Input = (MultibandRaster, MultibandRaster);
    type Output = ImadResult;
    type Params = ImadParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "iMAD"
    }

    fn description(&self) -> &'static str {
        "Iteratively reweighted multivariate alteration detection between two acquisitions"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        let (image1, image2) = input;
        imad(&image1, &image2, params)
    }
}

/// Run iMAD change detection between two co-registered images.
///
/// Both images need the same band count, grid size, geotransform and CRS.
/// Iterates until `params.max_iterations` or, with a convergence tolerance,
/// until the canonical correlations stop moving.
///
/// # Errors
/// - dimension mismatch variants (see [`Error::is_dimension_mismatch`])
///   when the images are not on one grid
/// - [`Error::InsufficientData`] when at most 2n pixels are usable
/// - [`Error::Numerical`] on singular or ill-conditioned statistics
///
/// Failures inside the loop are wrapped in [`Error::AtIteration`].
pub fn imad(image1: &MultibandRaster, image2: &MultibandRaster, params: ImadParams) -> Result<ImadResult> {
    params.validate()?;

    let pixels = PixelStack::from_pair(image1, image2)?;
    let n = pixels.n_bands();
    if pixels.len() <= 2 * n {
        return Err(Error::InsufficientData {
            valid: pixels.len(),
            required: 2 * n + 1,
        });
    }
    debug!(bands = n, valid_pixels = pixels.len(), "gathered image pair");

    let mut weights = WeightField::ones(pixels.len());
    let mut history: Vec<IterationRecord> = Vec::new();
    let mut termination = Termination::MaxIterations;
    let mut last: Option<(MadVariates, Vec<f64>)> = None;

    for iteration in 1..=params.max_iterations {
        let (mad, update) = iterate(&pixels, &weights, &params).map_err(|e| {
            warn!(iteration, error = %e, "iMAD iteration failed");
            e.at_iteration(iteration)
        })?;

        let state = ConvergenceState {
            iteration,
            current: mad.correlations.to_vec(),
            previous: history.last().map(|r| r.correlations.clone()),
        };
        let max_delta = state.max_delta();
        let weight_sum = weights.sum();
        debug!(
            iteration,
            correlations = ?state.current,
            weight_sum,
            max_delta = ?max_delta,
            "iMAD iteration"
        );

        history.push(IterationRecord {
            iteration,
            correlations: state.current.clone(),
            weight_sum,
            max_delta,
        });

        let WeightUpdate { chi_squared, weights: next } = update;
        weights = next;
        last = Some((mad, chi_squared));

        if state.has_converged(params.convergence_tolerance) {
            termination = Termination::Converged;
            break;
        }
    }

    let Some((mad, chi_squared)) = last else {
        return Err(Error::Algorithm("iMAD ran no iterations".into()));
    };
    let iterations = history.len();
    info!(%termination, iterations, "iMAD finished");

    let template = &image1.bands()[0];
    let chi_raster = pixels.scatter_raster(template, &chi_squared, f64::NAN)?;
    let weight_raster = pixels.scatter_raster(template, weights.values(), 0.0)?;
    let mad_bands = (0..n)
        .map(|i| pixels.scatter_raster(template, &mad.component(i), f64::NAN))
        .collect::<Result<Vec<_>>>()?;

    Ok(ImadResult {
        chi_squared: chi_raster,
        weights: weight_raster,
        mad: MultibandRaster::new(mad_bands)?,
        correlations: mad.correlations.to_vec(),
        vectors: mad.vectors,
        iterations,
        termination,
        history,
    })
}

/// One pass: covariance, canonical analysis, MAD, weight update
fn iterate(pixels: &PixelStack, weights: &WeightField, params: &ImadParams) -> Result<(MadVariates, WeightUpdate)> {
    let cov = weighted_covariance(pixels, weights, params)?;
    let mad = mad_transform(pixels, &cov, weights, params)?;
    let update = update_weights(&mad, params.weight_function)?;
    Ok((mad, update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn noise(r: usize, c: usize, seed: u64) -> f64 {
        let mut x = ((r as u64) << 32) ^ ((c as u64) << 8) ^ seed;
        x = x.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        x ^= x >> 29;
        x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
        x ^= x >> 32;
        (x % 10_000) as f64 / 10_000.0
    }

    fn band(f: impl Fn(usize, usize) -> f64) -> Array2<f64> {
        Array2::from_shape_fn((30, 30), |(r, c)| f(r, c))
    }

    /// Related acquisitions with one pixel altered in image2
    fn pair() -> (MultibandRaster, MultibandRaster) {
        let image1 = MultibandRaster::from_arrays(vec![
            band(|r, c| noise(r, c, 1)),
            band(|r, c| noise(r, c, 2)),
        ])
        .unwrap();
        let mut altered = band(|r, c| 0.8 * noise(r, c, 1) + 0.3 * noise(r, c, 3));
        altered[(5, 5)] += 4.0;
        let image2 = MultibandRaster::from_arrays(vec![
            altered,
            band(|r, c| 0.7 * noise(r, c, 2) + 0.4 * noise(r, c, 4)),
        ])
        .unwrap();
        (image1, image2)
    }

    #[test]
    fn test_convergence_state() {
        let first = ConvergenceState { iteration: 1, current: vec![0.9, 0.5], previous: None };
        assert_eq!(first.max_delta(), None);
        assert!(!first.has_converged(Some(1.0)));

        let second = ConvergenceState {
            iteration: 2,
            current: vec![0.9, 0.5],
            previous: Some(vec![0.85, 0.51]),
        };
        assert_abs_diff_eq!(second.max_delta().unwrap(), 0.05, epsilon = 1e-12);
        assert!(second.has_converged(Some(0.1)));
        assert!(!second.has_converged(Some(0.01)));
        assert!(!second.has_converged(None));
    }

    #[test]
    fn test_runs_fixed_iterations_by_default() {
        let (image1, image2) = pair();
        let params = ImadParams { max_iterations: 4, ..Default::default() };
        let result = imad(&image1, &image2, params).unwrap();

        assert_eq!(result.iterations, 4);
        assert_eq!(result.termination, Termination::MaxIterations);
        assert_eq!(result.history.len(), 4);
        assert_eq!(result.history[0].max_delta, None);
        assert_abs_diff_eq!(result.history[0].weight_sum, 900.0, epsilon = 1e-9);
        assert_eq!(result.chi_squared.shape(), (30, 30));
        assert_eq!(result.n_bands(), 2);
    }

    #[test]
    fn test_outlier_dominates_statistic() {
        let (image1, image2) = pair();
        let result = imad(&image1, &image2, ImadParams { max_iterations: 5, ..Default::default() }).unwrap();

        let chi = result.chi_squared.data();
        let peak = chi.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(chi[(5, 5)], peak);
        assert!(result.weights.data()[(5, 5)] < 0.01);
    }

    #[test]
    fn test_change_products() {
        let (image1, image2) = pair();
        let result = imad(&image1, &image2, ImadParams { max_iterations: 3, ..Default::default() }).unwrap();

        let prob = result.change_probability();
        assert_abs_diff_eq!(
            prob.data()[(5, 5)],
            1.0 - result.weights.data()[(5, 5)],
            epsilon = 1e-15
        );

        let mask = result.change_mask(0.01).unwrap();
        assert_eq!(mask.data()[(5, 5)], 1.0);
        assert!(mask.data().iter().all(|&v| v == 0.0 || v == 1.0));
        assert!(result.change_mask(0.0).is_err());
        assert!(result.change_mask(1.5).is_err());
    }

    #[test]
    fn test_invalid_params_rejected_before_work() {
        let (image1, image2) = pair();
        let err = imad(&image1, &image2, ImadParams { max_iterations: 0, ..Default::default() }).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "max_iterations", .. }));
    }

    #[test]
    fn test_algorithm_trait() {
        let (image1, image2) = pair();
        let algo = Imad;
        assert_eq!(algo.name(), "iMAD");
        let result = algo
            .execute((image1, image2), ImadParams { max_iterations: 2, ..Default::default() })
            .unwrap();
        assert_eq!(result.iterations, 2);
    }

    #[test]
    fn test_termination_display() {
        assert_eq!(Termination::Converged.to_string(), "converged");
        assert_eq!(Termination::MaxIterations.to_string(), "max_iterations");
    }
}
