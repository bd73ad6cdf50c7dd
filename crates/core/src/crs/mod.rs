//! Coordinate Reference System handling

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate Reference System, identified by its EPSG code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CRS {
    epsg: u32,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self { epsg: code }
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        self.epsg == other.epsg
    }

    /// Short identifier, e.g. `EPSG:32645`
    pub fn identifier(&self) -> String {
        format!("EPSG:{}", self.epsg)
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}
