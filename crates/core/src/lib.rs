//! # Sandwatch Core
//!
//! Core types for sandwatch change detection.
//!
//! This crate provides:
//! - `Raster<T>`: georeferenced single-band grid
//! - `MultibandRaster`: n bands on one grid with a valid-data mask
//! - `GeoTransform` and `CRS`: georeferencing and alignment checks
//! - The shared [`Error`] type and the [`Algorithm`] trait

pub mod crs;
pub mod error;
pub mod raster;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{GeoTransform, MultibandRaster, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, MultibandRaster, Raster, RasterElement};
    pub use crate::Algorithm;
}

/// Core trait for all algorithms in sandwatch.
///
/// Algorithms are pure functions that transform input data according to parameters.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
