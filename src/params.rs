//! Tunable parameters of the depth-map pipeline and their validation.
//!
//! Parameters arrive loosely typed from the command line or a config file as
//! [`StereoParams`]. [`StereoParams::validate`] checks every constraint up
//! front and produces the immutable [`ValidatedParams`] that the rest of the
//! pipeline consumes, so no image is touched with a half-checked setup.

use std::path::Path;

use crate::error::{Error, Result};

/// Images are matched on all three colour channels.
pub const CHANNELS: i64 = 3;

pub const DEFAULT_IM_HEIGHT: i64 = 1080;
pub const DEFAULT_IM_WIDTH: i64 = 1920;
pub const DEFAULT_MAX_DISPARITY: i64 = 160;
pub const DEFAULT_BLOCK_SIZE: i64 = 15;
pub const DEFAULT_LAMBDA: f64 = 8000.0;
pub const DEFAULT_SIGMA: f64 = 1.2;

/// Suggested smoothness penalty for a ±1 disparity step, `None` when it
/// does not fit in an `i64`.
pub fn default_p1(block_size: i64) -> Option<i64> {
    penalty(8, block_size)
}

/// Suggested smoothness penalty for larger disparity jumps.
pub fn default_p2(block_size: i64) -> Option<i64> {
    penalty(32, block_size)
}

fn penalty(factor: i64, block_size: i64) -> Option<i64> {
    (factor * CHANNELS)
        .checked_mul(block_size)?
        .checked_mul(block_size)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StereoParams {
    pub im_height: i64,
    pub im_width: i64,
    pub max_disparity: i64,
    pub block_size: i64,
    pub p1: Option<i64>,
    pub p2: Option<i64>,
    pub lambda: f64,
    pub sigma: f64,
}

impl Default for StereoParams {
    fn default() -> Self {
        Self {
            im_height: DEFAULT_IM_HEIGHT,
            im_width: DEFAULT_IM_WIDTH,
            max_disparity: DEFAULT_MAX_DISPARITY,
            block_size: DEFAULT_BLOCK_SIZE,
            p1: None,
            p2: None,
            lambda: DEFAULT_LAMBDA,
            sigma: DEFAULT_SIGMA,
        }
    }
}

/// Target size every image is resized to before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedParams {
    pub image_size: ImageSize,
    pub max_disparity: u32,
    pub block_size: u32,
    pub p1: u32,
    pub p2: u32,
    pub lambda: f64,
    pub sigma: f64,
}

impl StereoParams {
    /// Checks every parameter and the pair-list path, filling in unset
    /// smoothness penalties from the block size.
    pub fn validate(&self, image_path_list: &Path) -> Result<ValidatedParams> {
        if !image_path_list.is_file() {
            return Err(Error::Configuration(format!(
                "value for image paths does not exist: {}",
                image_path_list.display()
            )));
        }
        if self.im_height <= 0 || self.im_width <= 0 {
            return Err(Error::Configuration(format!(
                "image size must be positive, got {}x{} (height x width)",
                self.im_height, self.im_width
            )));
        }
        if self.max_disparity <= 0 || self.max_disparity % 16 != 0 {
            return Err(Error::Configuration(format!(
                "invalid value for max disparity, must be integer > 0 that is divisible by 16: {}",
                self.max_disparity
            )));
        }
        if self.block_size < 3 || self.block_size % 2 == 0 {
            return Err(Error::Configuration(format!(
                "invalid value for block_size, must be odd integer >= 3: {}",
                self.block_size
            )));
        }
        let p1 = match self.p1 {
            None => default_p1(self.block_size).ok_or_else(|| default_overflow("p1", self.block_size))?,
            Some(p) if p < 0 => {
                return Err(Error::Configuration(format!(
                    "invalid value for p1, must be positive (leave unset if unsure): {p}"
                )))
            }
            Some(p) => p,
        };
        let p2 = match self.p2 {
            None => default_p2(self.block_size).ok_or_else(|| default_overflow("p2", self.block_size))?,
            Some(p) if p < 0 => {
                return Err(Error::Configuration(format!(
                    "invalid value for p2, must be positive (leave unset if unsure): {p}"
                )))
            }
            Some(p) => p,
        };
        if p1 >= p2 {
            return Err(Error::Configuration(format!(
                "invalid value for p1 and p2, p1 must be < p2: {p1} {p2}"
            )));
        }
        if !(self.lambda >= 0.0) {
            return Err(Error::Configuration(format!(
                "invalid value for lambda, must be >= 0: {}",
                self.lambda
            )));
        }
        if !(self.sigma >= 0.0) {
            return Err(Error::Configuration(format!(
                "invalid value for sigma, must be >= 0: {}",
                self.sigma
            )));
        }

        Ok(ValidatedParams {
            image_size: ImageSize {
                height: to_u32(self.im_height, "im_height")?,
                width: to_u32(self.im_width, "im_width")?,
            },
            max_disparity: to_u32(self.max_disparity, "max_disparity")?,
            block_size: to_u32(self.block_size, "block_size")?,
            p1: to_u32(p1, "p1")?,
            p2: to_u32(p2, "p2")?,
            lambda: self.lambda,
            sigma: self.sigma,
        })
    }
}

fn default_overflow(name: &str, block_size: i64) -> Error {
    Error::Configuration(format!(
        "default {name} overflows for block_size {block_size}, set it explicitly"
    ))
}

fn to_u32(value: i64, name: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::Configuration(format!("value for {name} is out of range: {value}")))
}
