//! Multi-band rasters sharing one pixel grid

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster};
use ndarray::Array2;

/// Alignment tolerance for geotransforms, in pixels
const ALIGNMENT_TOLERANCE: f64 = 1e-6;

/// An n-band image on a single georeferenced grid, with an optional
/// valid-data mask.
///
/// Every band has the same shape, transform and CRS; this is checked on
/// construction. A pixel is valid when the mask (if any) is `true` and
/// every band holds a finite, non-nodata value there.
#[derive(Debug, Clone)]
pub struct MultibandRaster {
    bands: Vec<Raster<f64>>,
    mask: Option<Array2<bool>>,
}

impl MultibandRaster {
    /// Stack bands into one image. At least one band is required.
    pub fn new(bands: Vec<Raster<f64>>) -> Result<Self> {
        let Some(first) = bands.first() else {
            return Err(Error::InvalidParameter {
                name: "bands",
                value: "0".into(),
                reason: "at least one band is required".into(),
            });
        };

        let (rows, cols) = first.shape();
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidDimensions { width: cols, height: rows });
        }

        for (i, band) in bands.iter().enumerate().skip(1) {
            if band.shape() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: band.rows(),
                    ac: band.cols(),
                });
            }
            if !first.transform().is_aligned_with(band.transform(), ALIGNMENT_TOLERANCE) {
                return Err(Error::GridMismatch(format!(
                    "band {} geotransform differs from band 0",
                    i
                )));
            }
            if first.crs() != band.crs() {
                return Err(Error::GridMismatch(format!("band {} CRS differs from band 0", i)));
            }
        }

        Ok(Self { bands, mask: None })
    }

    /// Stack plain arrays on the default (unreferenced) grid
    pub fn from_arrays(arrays: Vec<Array2<f64>>) -> Result<Self> {
        Self::new(arrays.into_iter().map(Raster::from_array).collect())
    }

    /// Attach a valid-data mask (`true` = usable pixel)
    pub fn with_mask(mut self, mask: Array2<bool>) -> Result<Self> {
        let (rows, cols) = self.shape();
        if mask.dim() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: mask.nrows(),
                ac: mask.ncols(),
            });
        }
        self.mask = Some(mask);
        Ok(self)
    }

    pub fn n_bands(&self) -> usize {
        self.bands.len()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.bands[0].shape()
    }

    pub fn rows(&self) -> usize {
        self.bands[0].rows()
    }

    pub fn cols(&self) -> usize {
        self.bands[0].cols()
    }

    pub fn band(&self, index: usize) -> Option<&Raster<f64>> {
        self.bands.get(index)
    }

    pub fn bands(&self) -> &[Raster<f64>] {
        &self.bands
    }

    pub fn transform(&self) -> &GeoTransform {
        self.bands[0].transform()
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.bands[0].crs()
    }

    pub fn mask(&self) -> Option<&Array2<bool>> {
        self.mask.as_ref()
    }

    /// Whether (row, col) is usable. Out-of-grid positions are not.
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        if row >= self.rows() || col >= self.cols() {
            return false;
        }
        if let Some(mask) = &self.mask {
            if !mask[(row, col)] {
                return false;
            }
        }
        self.bands.iter().all(|band| {
            let v = unsafe { band.get_unchecked(row, col) };
            v.is_finite() && !band.is_nodata(v)
        })
    }

    /// Number of valid pixels
    pub fn valid_count(&self) -> usize {
        let (rows, cols) = self.shape();
        (0..rows)
            .map(|r| (0..cols).filter(|&c| self.is_valid(r, c)).count())
            .sum()
    }

    /// Copy the band values of pixel (row, col) into `out`.
    ///
    /// # Safety
    /// Caller must ensure the position is inside the grid and
    /// `out.len() == self.n_bands()`.
    pub unsafe fn pixel_unchecked(&self, row: usize, col: usize, out: &mut [f64]) {
        for (slot, band) in out.iter_mut().zip(&self.bands) {
            *slot = unsafe { band.get_unchecked(row, col) };
        }
    }

    /// Fail unless `other` has the same band count, grid size, geotransform
    /// and CRS as `self`.
    pub fn ensure_same_grid(&self, other: &MultibandRaster) -> Result<()> {
        if self.n_bands() != other.n_bands() {
            return Err(Error::BandCountMismatch {
                expected: self.n_bands(),
                got: other.n_bands(),
            });
        }
        let (rows, cols) = self.shape();
        if other.shape() != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: other.rows(),
                ac: other.cols(),
            });
        }
        if !self.transform().is_aligned_with(other.transform(), ALIGNMENT_TOLERANCE) {
            return Err(Error::GridMismatch(format!(
                "geotransforms differ: {:?} vs {:?}",
                self.transform(),
                other.transform()
            )));
        }
        match (self.crs(), other.crs()) {
            (None, None) => Ok(()),
            (Some(a), Some(b)) if a.is_equivalent(b) => Ok(()),
            (a, b) => Err(Error::GridMismatch(format!(
                "CRS differ: {} vs {}",
                a.map(|c| c.identifier()).unwrap_or_else(|| "none".into()),
                b.map(|c| c.identifier()).unwrap_or_else(|| "none".into())
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(rows: usize, cols: usize, value: f64) -> Raster<f64> {
        let mut r = Raster::filled(rows, cols, value);
        r.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        r
    }

    #[test]
    fn test_stack_creation() {
        let stack = MultibandRaster::new(vec![band(4, 5, 1.0), band(4, 5, 2.0)]).unwrap();
        assert_eq!(stack.n_bands(), 2);
        assert_eq!(stack.shape(), (4, 5));
        assert_eq!(stack.valid_count(), 20);
    }

    #[test]
    fn test_empty_stack_rejected() {
        assert!(MultibandRaster::new(Vec::new()).is_err());
    }

    #[test]
    fn test_band_shape_mismatch() {
        let result = MultibandRaster::new(vec![band(4, 5, 1.0), band(5, 4, 1.0)]);
        assert!(matches!(result, Err(Error::SizeMismatch { .. })));
    }

    #[test]
    fn test_validity_from_mask_and_nan() {
        let mut b1 = band(3, 3, 1.0);
        b1.set(0, 0, f64::NAN).unwrap();
        let mut b2 = band(3, 3, 2.0);
        b2.set_nodata(Some(-9999.0));
        b2.set(1, 1, -9999.0).unwrap();

        let mut mask = Array2::from_elem((3, 3), true);
        mask[(2, 2)] = false;

        let stack = MultibandRaster::new(vec![b1, b2]).unwrap().with_mask(mask).unwrap();
        assert!(!stack.is_valid(0, 0));
        assert!(!stack.is_valid(1, 1));
        assert!(!stack.is_valid(2, 2));
        assert!(stack.is_valid(0, 1));
        assert!(!stack.is_valid(3, 0));
        assert_eq!(stack.valid_count(), 6);
    }

    #[test]
    fn test_mask_shape_checked() {
        let stack = MultibandRaster::new(vec![band(3, 3, 1.0)]).unwrap();
        assert!(stack.with_mask(Array2::from_elem((2, 3), true)).is_err());
    }

    #[test]
    fn test_ensure_same_grid() {
        let a = MultibandRaster::new(vec![band(4, 4, 1.0), band(4, 4, 1.0)]).unwrap();
        let b = MultibandRaster::new(vec![band(4, 4, 2.0), band(4, 4, 2.0)]).unwrap();
        assert!(a.ensure_same_grid(&b).is_ok());

        let three = MultibandRaster::new(vec![band(4, 4, 1.0); 3]).unwrap();
        let err = a.ensure_same_grid(&three).unwrap_err();
        assert!(matches!(err, Error::BandCountMismatch { expected: 2, got: 3 }));

        let mut shifted_band = band(4, 4, 1.0);
        shifted_band.set_transform(GeoTransform::new(10.0, 4.0, 1.0, -1.0));
        let shifted = MultibandRaster::new(vec![shifted_band.clone(), shifted_band]).unwrap();
        assert!(a.ensure_same_grid(&shifted).unwrap_err().is_dimension_mismatch());

        let mut projected = band(4, 4, 1.0);
        projected.set_crs(Some(CRS::from_epsg(32645)));
        let projected = MultibandRaster::new(vec![projected.clone(), projected]).unwrap();
        assert!(matches!(a.ensure_same_grid(&projected), Err(Error::GridMismatch(_))));
    }

    #[test]
    fn test_pixel_unchecked() {
        let stack = MultibandRaster::new(vec![band(2, 2, 0.1), band(2, 2, 0.2), band(2, 2, 0.3)]).unwrap();
        let mut out = [0.0; 3];
        unsafe { stack.pixel_unchecked(1, 1, &mut out) };
        assert_eq!(out, [0.1, 0.2, 0.3]);
    }
}
