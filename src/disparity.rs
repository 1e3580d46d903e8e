//! The matching and filtering capability the pipeline is written against.

use image::{GrayImage, Luma, RgbImage};
use ndarray::Array2;

use crate::error::Result;

/// Disparities are stored as fixed point with 4 fractional bits.
pub const DISPARITY_SCALE: i16 = 16;

/// Marker for pixels without a trustworthy match, `(min_disparity - 1) * 16`.
pub const INVALID_DISPARITY: i16 = -DISPARITY_SCALE;

/// Which image is the reference and where the match is searched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDirection {
    /// Reference is the left image; matches are searched to the left in the right image.
    LeftToRight,
    /// Reference is the right image; matches are searched to the right in the left image.
    RightToLeft,
}

/// Dense fixed-point disparity grid indexed `[(row, col)]`.
///
/// Values are non-negative magnitudes in the frame of the reference image,
/// or [`INVALID_DISPARITY`].
#[derive(Debug, Clone, PartialEq)]
pub struct DisparityMap {
    pub direction: MatchDirection,
    pub values: Array2<i16>,
}

impl DisparityMap {
    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    pub fn height(&self) -> usize {
        self.values.nrows()
    }

    pub fn max(&self) -> i16 {
        self.values.iter().copied().max().unwrap_or(INVALID_DISPARITY)
    }

    pub fn min(&self) -> i16 {
        self.values.iter().copied().min().unwrap_or(INVALID_DISPARITY)
    }
}

pub trait DisparityMatcher {
    fn direction(&self) -> MatchDirection;

    /// Largest disparity searched, in whole pixels.
    fn max_disparity(&self) -> u32;

    /// Computes the disparity of `reference` against `target`.
    fn compute(&self, reference: &RgbImage, target: &RgbImage) -> Result<DisparityMap>;
}

pub trait DisparityFilter {
    /// Post-filters `primary` guided by `reference`, using `mirrored` to
    /// judge which primary disparities are consistent.
    fn filter(
        &self,
        primary: &DisparityMap,
        reference: &RgbImage,
        mirrored: &DisparityMap,
    ) -> Result<Array2<i16>>;
}

/// Converts a fixed-point map to an 8-bit image of whole-pixel disparities,
/// saturating anything outside `0..=255`.
pub fn quantize(values: &Array2<i16>) -> GrayImage {
    let (rows, cols) = values.dim();
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let v = values[(y as usize, x as usize)] as f32 / DISPARITY_SCALE as f32;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}
