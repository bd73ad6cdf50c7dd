//! Change detection between two acquisitions of the same scene
//!
//! The iMAD engine and its stages, leaves first:
//! - [`weighted_covariance`]: weighted mean and 2n×2n covariance of the
//!   stacked image pair
//! - [`generalized_eigen`]: `C x = λ B x` with a deterministic order and
//!   sign convention
//! - [`canonical_analysis`] / [`mad_transform`]: canonical vectors and
//!   MAD variates
//! - [`update_weights`]: chi-squared statistic and no-change weights
//! - [`imad`]: the iteration loop

mod covariance;
mod eigen;
mod imad;
mod linalg;
mod mad;
mod params;
mod pixels;
mod weights;

pub use covariance::{check_covariance, weighted_covariance, WeightedCovariance};
pub use eigen::{generalized_eigen, GeneralizedEigen};
pub use imad::{imad, ConvergenceState, Imad, ImadResult, IterationRecord, Termination};
pub use mad::{canonical_analysis, mad_transform, CanonicalAnalysis, CanonicalVectors, MadVariates};
pub use params::{ImadParams, WeightFunction};
pub use pixels::PixelStack;
pub use weights::{chi_squared_survival, update_weights, WeightField, WeightUpdate};
