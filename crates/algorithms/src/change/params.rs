//! iMAD configuration

use serde::{Deserialize, Serialize};
use sandwatch_core::{Error, Result};

/// How a pixel's chi-squared statistic becomes its no-change weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightFunction {
    /// Survival function of χ²(n), n = band count. Exact for any n.
    #[default]
    ChiSquaredSurvival,
    /// `exp(-χ²/2)`, the survival function of χ²(2). Exact only for two
    /// bands; kept for parity with results produced by that formula.
    TwoDegreeApproximation,
}

/// Parameters for an iMAD run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImadParams {
    /// Hard cap on iterations (default 30)
    pub max_iterations: usize,
    /// Stop early once no canonical correlation moves by more than this
    /// between two iterations. `None` always runs to `max_iterations`.
    pub convergence_tolerance: Option<f64>,
    /// Singularity threshold for the normalized determinant of S11, S22
    /// and the eigenproblem's right-hand matrix; also the tolerance for
    /// negative eigenvalues of the covariance matrix.
    pub covariance_epsilon: f64,
    /// Largest acceptable condition number of S11 and S22
    pub max_condition_number: f64,
    /// Added to the covariance diagonal before any check (ridge loading)
    pub regularization: f64,
    /// Lower bound on each MAD standard deviation
    pub sigma_floor: f64,
    pub weight_function: WeightFunction,
}

impl Default for ImadParams {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            convergence_tolerance: None,
            covariance_epsilon: 1e-12,
            max_condition_number: 1e12,
            regularization: 0.0,
            sigma_floor: 1e-12,
            weight_function: WeightFunction::ChiSquaredSurvival,
        }
    }
}

impl ImadParams {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations", 0, "must be at least 1"));
        }
        if let Some(tol) = self.convergence_tolerance {
            if !(tol > 0.0) || !tol.is_finite() {
                return Err(invalid("convergence_tolerance", tol, "must be a positive finite number"));
            }
        }
        if !(self.covariance_epsilon > 0.0) || !self.covariance_epsilon.is_finite() {
            return Err(invalid(
                "covariance_epsilon",
                self.covariance_epsilon,
                "must be a positive finite number",
            ));
        }
        if !(self.max_condition_number > 1.0) {
            return Err(invalid(
                "max_condition_number",
                self.max_condition_number,
                "must be greater than 1",
            ));
        }
        if !(self.regularization >= 0.0) || !self.regularization.is_finite() {
            return Err(invalid("regularization", self.regularization, "must be finite and >= 0"));
        }
        if !(self.sigma_floor > 0.0) || !self.sigma_floor.is_finite() {
            return Err(invalid("sigma_floor", self.sigma_floor, "must be a positive finite number"));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, value: impl ToString, reason: &str) -> Error {
    Error::InvalidParameter {
        name,
        value: value.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = ImadParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.max_iterations, 30);
        assert!(params.convergence_tolerance.is_none());
        assert_eq!(params.weight_function, WeightFunction::ChiSquaredSurvival);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            ImadParams { max_iterations: 0, ..Default::default() },
            ImadParams { convergence_tolerance: Some(0.0), ..Default::default() },
            ImadParams { convergence_tolerance: Some(f64::NAN), ..Default::default() },
            ImadParams { covariance_epsilon: -1e-9, ..Default::default() },
            ImadParams { max_condition_number: 0.5, ..Default::default() },
            ImadParams { regularization: -0.1, ..Default::default() },
            ImadParams { sigma_floor: 0.0, ..Default::default() },
        ];
        for params in cases {
            assert!(
                matches!(params.validate(), Err(Error::InvalidParameter { .. })),
                "accepted {:?}",
                params
            );
        }
    }
}
