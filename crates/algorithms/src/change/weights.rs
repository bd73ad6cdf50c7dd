//! Chi-squared change statistic and no-change weights

use statrs::distribution::{ChiSquared, ContinuousCDF};

use super::mad::MadVariates;
use super::params::WeightFunction;
use crate::maybe_rayon::*;
use sandwatch_core::{Error, Result};

/// Per-pixel probability of no change, one value per valid pixel
#[derive(Debug, Clone, PartialEq)]
pub struct WeightField {
    values: Vec<f64>,
}

impl WeightField {
    /// Every pixel fully trusted, the state before the first iteration
    pub fn ones(len: usize) -> Self {
        Self { values: vec![1.0; len] }
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}

/// Outcome of one weight update
#[derive(Debug, Clone)]
pub struct WeightUpdate {
    /// `Σᵢ (MADᵢ / σᵢ)²` per valid pixel
    pub chi_squared: Vec<f64>,
    /// Next iteration's weights
    pub weights: WeightField,
}

/// Standardize the MAD variates, sum their squares and turn each pixel's
/// statistic into a no-change weight with `function`.
pub fn update_weights(mad: &MadVariates, function: WeightFunction) -> Result<WeightUpdate> {
    let n = mad.n_bands();
    let sigma = &mad.sigma;
    if sigma.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
        return Err(Error::numerical("MAD sigma", format!("invalid deviations {:?}", sigma.to_vec())));
    }

    let survival = NoChangeProbability::new(function, n)?;

    let chi_squared: Vec<f64> = (0..mad.len())
        .into_par_iter()
        .map(|k| {
            mad.pixel(k)
                .iter()
                .zip(sigma.iter())
                .map(|(m, s)| (m / s) * (m / s))
                .sum::<f64>()
        })
        .collect();

    if let Some(bad) = chi_squared.iter().find(|c| !c.is_finite()) {
        return Err(Error::numerical("chi-squared", format!("statistic is {}", bad)));
    }

    let weights = chi_squared.iter().map(|&chi| survival.weight(chi)).collect();

    Ok(WeightUpdate {
        chi_squared,
        weights: WeightField::from_values(weights),
    })
}

/// `P(X ≥ chi)` for `X ~ χ²(dof)`
pub fn chi_squared_survival(chi: f64, dof: usize) -> Result<f64> {
    NoChangeProbability::new(WeightFunction::ChiSquaredSurvival, dof).map(|p| p.weight(chi))
}

enum NoChangeProbability {
    Survival(ChiSquared),
    TwoDegree,
}

impl NoChangeProbability {
    fn new(function: WeightFunction, dof: usize) -> Result<Self> {
        match function {
            WeightFunction::ChiSquaredSurvival => ChiSquared::new(dof as f64)
                .map(Self::Survival)
                .map_err(|e| Error::Algorithm(format!("chi-squared distribution with {} dof: {}", dof, e))),
            WeightFunction::TwoDegreeApproximation => Ok(Self::TwoDegree),
        }
    }

    fn weight(&self, chi: f64) -> f64 {
        if chi <= 0.0 {
            return 1.0;
        }
        let p = match self {
            Self::Survival(dist) => dist.sf(chi),
            Self::TwoDegree => (-chi / 2.0).exp(),
        };
        p.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_survival_two_dof_matches_closed_form() {
        for chi in [0.1, 1.0, 2.5, 7.0, 15.0] {
            let exact = chi_squared_survival(chi, 2).unwrap();
            assert_relative_eq!(exact, (-chi / 2.0_f64).exp(), max_relative = 1e-9);
        }
    }

    #[test]
    fn test_survival_known_quantiles() {
        // 95th percentiles of chi-squared(1) and chi-squared(4)
        assert_relative_eq!(chi_squared_survival(3.841459, 1).unwrap(), 0.05, max_relative = 1e-5);
        assert_relative_eq!(chi_squared_survival(9.487729, 4).unwrap(), 0.05, max_relative = 1e-5);
    }

    #[test]
    fn test_weight_edges() {
        let p = NoChangeProbability::new(WeightFunction::ChiSquaredSurvival, 4).unwrap();
        assert_eq!(p.weight(0.0), 1.0);
        assert!(p.weight(1e6) >= 0.0 && p.weight(1e6) < 1e-12);

        let q = NoChangeProbability::new(WeightFunction::TwoDegreeApproximation, 4).unwrap();
        assert_eq!(q.weight(0.0), 1.0);
        assert_eq!(q.weight(1e30), 0.0);
    }

    #[test]
    fn test_zero_dof_rejected() {
        assert!(chi_squared_survival(1.0, 0).is_err());
    }

    #[test]
    fn test_weights_decrease_with_statistic() {
        let p = NoChangeProbability::new(WeightFunction::ChiSquaredSurvival, 3).unwrap();
        let weights: Vec<f64> = [0.5, 1.0, 3.0, 8.0, 20.0].iter().map(|&c| p.weight(c)).collect();
        assert!(weights.windows(2).all(|w| w[0] > w[1]));
        assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
    }

    #[test]
    fn test_field_helpers() {
        let field = WeightField::ones(4);
        assert_eq!(field.len(), 4);
        assert_eq!(field.sum(), 4.0);
        assert!(!field.is_empty());
        assert_eq!(field.into_values(), vec![1.0; 4]);
    }
}
