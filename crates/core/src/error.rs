//! Error types for sandwatch

use thiserror::Error;

/// Main error type for sandwatch operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Band count mismatch: expected {expected}, got {got}")]
    BandCountMismatch { expected: usize, got: usize },

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Insufficient data: {valid} usable pixels, at least {required} required")]
    InsufficientData { valid: usize, required: usize },

    #[error("Numerical failure in {matrix}: {reason}{}", condition_suffix(.condition))]
    Numerical {
        matrix: &'static str,
        reason: String,
        condition: Option<f64>,
    },

    #[error("Iteration {iteration}: {source}")]
    AtIteration {
        iteration: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::Numerical`] without a condition diagnostic
    pub fn numerical(matrix: &'static str, reason: impl Into<String>) -> Self {
        Error::Numerical {
            matrix,
            reason: reason.into(),
            condition: None,
        }
    }

    /// Attach the iteration index at which this error surfaced
    pub fn at_iteration(self, iteration: usize) -> Self {
        Error::AtIteration {
            iteration,
            source: Box::new(self),
        }
    }

    /// The error with any iteration context stripped
    pub fn innermost(&self) -> &Error {
        match self {
            Error::AtIteration { source, .. } => source.innermost(),
            other => other,
        }
    }

    /// Iteration index carried by this error, if any
    pub fn iteration(&self) -> Option<usize> {
        match self {
            Error::AtIteration { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }

    /// Whether the two inputs disagree in band count, grid size or georeference
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(
            self.innermost(),
            Error::SizeMismatch { .. } | Error::BandCountMismatch { .. } | Error::GridMismatch(_)
        )
    }
}

fn condition_suffix(condition: &Option<f64>) -> String {
    match condition {
        Some(c) => format!(" (condition number {c:.3e})"),
        None => String::new(),
    }
}

/// Result type alias for sandwatch operations
pub type Result<T> = std::result::Result<T, Error>;
