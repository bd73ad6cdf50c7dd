//! Affine geotransformation for rasters

use serde::{Deserialize, Serialize};

/// Affine transformation coefficients for georeferencing rasters.
///
/// Converts between pixel coordinates (col, row) and geographic coordinates (x, y):
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    /// Pixel width (cell size in X direction)
    pub pixel_width: f64,
    /// Pixel height (cell size in Y direction, usually negative)
    pub pixel_height: f64,
    pub row_rotation: f64,
    pub col_rotation: f64,
}

impl GeoTransform {
    /// Create a new GeoTransform with no rotation (north-up image)
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Create from GDAL-style array [origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]
    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            origin_x: coeffs[0],
            pixel_width: coeffs[1],
            row_rotation: coeffs[2],
            origin_y: coeffs[3],
            col_rotation: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    /// Pixel center of (col, row) in geographic coordinates
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        let col_f = col as f64 + 0.5;
        let row_f = row as f64 + 0.5;

        let x = self.origin_x + col_f * self.pixel_width + row_f * self.row_rotation;
        let y = self.origin_y + col_f * self.col_rotation + row_f * self.pixel_height;

        (x, y)
    }

    /// Whether two grids put every pixel center in the same place.
    ///
    /// Offsets are compared in units of this transform's pixel size, so a
    /// `tolerance` of 1e-6 means "within a millionth of a pixel".
    pub fn is_aligned_with(&self, other: &GeoTransform, tolerance: f64) -> bool {
        let scale = self.pixel_width.abs().max(self.pixel_height.abs()).max(f64::MIN_POSITIVE);
        let close = |a: f64, b: f64| ((a - b) / scale).abs() <= tolerance;

        close(self.origin_x, other.origin_x)
            && close(self.origin_y, other.origin_y)
            && close(self.pixel_width, other.pixel_width)
            && close(self.pixel_height, other.pixel_height)
            && close(self.row_rotation, other.row_rotation)
            && close(self.col_rotation, other.col_rotation)
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_to_geo() {
        let gt = GeoTransform::new(100.0, 200.0, 10.0, -10.0);
        let (x, y) = gt.pixel_to_geo(5, 10);

        assert_relative_eq!(x, 155.0, epsilon = 1e-10);
        assert_relative_eq!(y, 95.0, epsilon = 1e-10);
    }

    #[test]
    fn test_from_gdal() {
        let gt = GeoTransform::from_gdal([88.2, 0.0001, 0.0, 22.05, 0.0, -0.0001]);
        assert_eq!(gt, GeoTransform::new(88.2, 22.05, 0.0001, -0.0001));
    }

    #[test]
    fn test_alignment_tolerance() {
        let a = GeoTransform::new(500_000.0, 2_400_000.0, 10.0, -10.0);
        let nudged = GeoTransform::new(500_000.0 + 1e-6, 2_400_000.0, 10.0, -10.0);
        let shifted = GeoTransform::new(500_010.0, 2_400_000.0, 10.0, -10.0);

        assert!(a.is_aligned_with(&nudged, 1e-6));
        assert!(!a.is_aligned_with(&shifted, 1e-6));
    }
}
