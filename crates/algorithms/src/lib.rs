//! # Sandwatch Algorithms
//!
//! Change detection for paired multiband rasters.
//!
//! ## Available Algorithm Categories
//!
//! - **change**: iMAD (iteratively reweighted multivariate alteration
//!   detection), chi-squared change maps, no-change weights

pub mod change;
mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::change::{
        imad, Imad, ImadParams, ImadResult, IterationRecord, Termination, WeightFunction,
    };
    pub use sandwatch_core::prelude::*;
}
