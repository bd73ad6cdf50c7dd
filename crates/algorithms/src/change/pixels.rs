//! Valid pixels of an image pair, gathered once per run

use ndarray::Array2;
use std::ops::Range;

use crate::maybe_rayon::*;
use sandwatch_core::raster::{MultibandRaster, Raster};
use sandwatch_core::{Error, Result};

/// Pixels per reduction block
const BLOCK_SIZE: usize = 4096;

/// The stacked band vectors `[image1 bands.., image2 bands..]` of every
/// pixel valid in both images, in row-major grid order.
#[derive(Debug, Clone)]
pub struct PixelStack {
    rows: usize,
    cols: usize,
    n_bands: usize,
    /// Pixel-major values, stride `2 * n_bands`
    values: Vec<f64>,
    /// Linear grid index (`row * cols + col`) of each stacked pixel
    index: Vec<usize>,
}

impl PixelStack {
    /// Gather the pixels valid in both `image1` and `image2`.
    ///
    /// Fails if the two images do not share band count, grid size,
    /// geotransform and CRS.
    pub fn from_pair(image1: &MultibandRaster, image2: &MultibandRaster) -> Result<Self> {
        image1.ensure_same_grid(image2)?;

        let n_bands = image1.n_bands();
        let stride = 2 * n_bands;
        let (rows, cols) = image1.shape();

        let per_row: Vec<(Vec<usize>, Vec<f64>)> = (0..rows)
            .into_par_iter()
            .map(|row| {
                let mut index = Vec::new();
                let mut values = Vec::new();
                let mut buf = vec![0.0; stride];
                for col in 0..cols {
                    if !(image1.is_valid(row, col) && image2.is_valid(row, col)) {
                        continue;
                    }
                    let (left, right) = buf.split_at_mut(n_bands);
                    unsafe {
                        image1.pixel_unchecked(row, col, left);
                        image2.pixel_unchecked(row, col, right);
                    }
                    index.push(row * cols + col);
                    values.extend_from_slice(&buf);
                }
                (index, values)
            })
            .collect();

        let mut index = Vec::new();
        let mut values = Vec::new();
        for (row_index, row_values) in per_row {
            index.extend(row_index);
            values.extend(row_values);
        }

        Ok(Self { rows, cols, n_bands, values, index })
    }

    /// Bands per image (n)
    pub fn n_bands(&self) -> usize {
        self.n_bands
    }

    /// Number of valid pixels
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Stacked values of the k-th valid pixel (length 2n)
    pub fn pixel(&self, k: usize) -> &[f64] {
        let stride = 2 * self.n_bands;
        &self.values[k * stride..(k + 1) * stride]
    }

    /// Contiguous pixel ranges used as units of parallel reduction.
    ///
    /// Partial results must be combined in the order returned here so
    /// that sums do not depend on thread scheduling.
    pub fn blocks(&self) -> Vec<Range<usize>> {
        (0..self.len())
            .step_by(BLOCK_SIZE)
            .map(|start| start..(start + BLOCK_SIZE).min(self.len()))
            .collect()
    }

    /// Place one value per valid pixel back onto the grid, `fill` elsewhere
    pub fn scatter(&self, values: &[f64], fill: f64) -> Array2<f64> {
        debug_assert_eq!(values.len(), self.len());
        let mut grid = Array2::from_elem((self.rows, self.cols), fill);
        if let Some(flat) = grid.as_slice_mut() {
            for (&i, &v) in self.index.iter().zip(values) {
                flat[i] = v;
            }
        }
        grid
    }

    /// Scatter onto a raster carrying `template`'s georeference
    pub fn scatter_raster(&self, template: &Raster<f64>, values: &[f64], fill: f64) -> Result<Raster<f64>> {
        if template.shape() != (self.rows, self.cols) {
            return Err(Error::SizeMismatch {
                er: self.rows,
                ec: self.cols,
                ar: template.rows(),
                ac: template.cols(),
            });
        }
        let mut raster = template.with_same_meta::<f64>(self.rows, self.cols);
        if fill.is_nan() {
            raster.set_nodata(Some(f64::NAN));
        }
        *raster.data_mut() = self.scatter(values, fill);
        Ok(raster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (MultibandRaster, MultibandRaster) {
        let b = |v: f64| Array2::from_shape_fn((3, 4), |(r, c)| v + (r * 4 + c) as f64);
        let mut one = b(0.0);
        one[(0, 1)] = f64::NAN;
        let image1 = MultibandRaster::from_arrays(vec![one, b(100.0)]).unwrap();

        let mut mask = Array2::from_elem((3, 4), true);
        mask[(2, 3)] = false;
        let image2 = MultibandRaster::from_arrays(vec![b(200.0), b(300.0)])
            .unwrap()
            .with_mask(mask)
            .unwrap();
        (image1, image2)
    }

    #[test]
    fn test_gathers_pixels_valid_in_both() {
        let (image1, image2) = pair();
        let stack = PixelStack::from_pair(&image1, &image2).unwrap();

        assert_eq!(stack.len(), 10);
        assert_eq!(stack.n_bands(), 2);
        // (0, 0) is the first pixel, (0, 1) is skipped
        assert_eq!(stack.pixel(0), &[0.0, 100.0, 200.0, 300.0]);
        assert_eq!(stack.pixel(1), &[2.0, 102.0, 202.0, 302.0]);
    }

    #[test]
    fn test_scatter_fills_invalid() {
        let (image1, image2) = pair();
        let stack = PixelStack::from_pair(&image1, &image2).unwrap();
        let ones = vec![1.0; stack.len()];

        let grid = stack.scatter(&ones, -1.0);
        assert_eq!(grid[(0, 0)], 1.0);
        assert_eq!(grid[(0, 1)], -1.0);
        assert_eq!(grid[(2, 3)], -1.0);
        assert_eq!(grid.iter().filter(|&&v| v == 1.0).count(), 10);
    }

    #[test]
    fn test_blocks_cover_all_pixels() {
        let arrays = vec![Array2::from_elem((100, 100), 1.0)];
        let image = MultibandRaster::from_arrays(arrays).unwrap();
        let stack = PixelStack::from_pair(&image, &image).unwrap();

        let blocks = stack.blocks();
        assert_eq!(blocks.first().map(|b| b.start), Some(0));
        assert_eq!(blocks.last().map(|b| b.end), Some(10_000));
        assert_eq!(blocks.iter().map(|b| b.len()).sum::<usize>(), 10_000);
    }

    #[test]
    fn test_mismatched_pair_rejected() {
        let two = MultibandRaster::from_arrays(vec![Array2::zeros((4, 4)); 2]).unwrap();
        let three = MultibandRaster::from_arrays(vec![Array2::zeros((4, 4)); 3]).unwrap();
        let err = PixelStack::from_pair(&two, &three).unwrap_err();
        assert!(err.is_dimension_mismatch());
    }
}
