//! Depth-map generation over a list of stereo pair directories.
//!
//! Each pair directory holds `left.jpg` and `right.jpg`; the filtered depth
//! map is written next to them as `disp.jpg`:
//!
//! ```text
//! └── image_key
//!     ├── disp.jpg
//!     ├── left.jpg
//!     └── right.jpg
//! ```

use std::path::{Path, PathBuf};

use image::imageops::{resize, FilterType};
use image::{GrayImage, RgbImage};
use tracing::{debug, info, instrument};

use crate::disparity::{quantize, DisparityFilter, DisparityMatcher};
use crate::error::{Error, Result};
use crate::params::{ImageSize, StereoParams, ValidatedParams};
use crate::sgm::{SgmConfig, SgmMatcher};
use crate::wls::WlsFilter;

pub const LEFT_IMAGE: &str = "left.jpg";
pub const RIGHT_IMAGE: &str = "right.jpg";
pub const DEPTH_MAP: &str = "disp.jpg";

/// A primary matcher, its mirrored twin and the post-filter bound to them.
#[derive(Debug, Clone)]
pub struct StereoPipeline<M, F> {
    pub primary: M,
    pub mirrored: M,
    pub filter: F,
}

impl StereoPipeline<SgmMatcher, WlsFilter> {
    pub fn from_params(params: &ValidatedParams) -> Self {
        let primary = SgmMatcher::new(SgmConfig::from_params(params));
        let mirrored = primary.mirrored();
        let filter = WlsFilter::for_matcher(&primary, params.lambda, params.sigma);
        Self {
            primary,
            mirrored,
            filter,
        }
    }
}

fn load_resized(path: &Path, size: ImageSize) -> Result<RgbImage> {
    let img = image::open(path)
        .map_err(|source| Error::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    if img.dimensions() == (size.width, size.height) {
        return Ok(img);
    }
    Ok(resize(&img, size.width, size.height, FilterType::Triangle))
}

/// Reads the left and right image of a pair, resized to `size`.
pub fn load_pair(pair_dir: &Path, size: ImageSize) -> Result<(RgbImage, RgbImage)> {
    let left = load_resized(&pair_dir.join(LEFT_IMAGE), size)?;
    let right = load_resized(&pair_dir.join(RIGHT_IMAGE), size)?;
    Ok((left, right))
}

/// Computes the quantized, filtered depth map of one pair without writing it.
#[instrument(skip(pipeline))]
pub fn process_pair<M, F>(
    pair_dir: &Path,
    size: ImageSize,
    pipeline: &StereoPipeline<M, F>,
) -> Result<GrayImage>
where
    M: DisparityMatcher,
    F: DisparityFilter,
{
    let (left, right) = load_pair(pair_dir, size)?;
    let displ = pipeline.primary.compute(&left, &right)?;
    let dispr = pipeline.mirrored.compute(&right, &left)?;
    let filtered = pipeline.filter.filter(&displ, &left, &dispr)?;
    debug!(
        left_max = displ.max(),
        right_min = dispr.min(),
        filtered_max = filtered.iter().copied().max().unwrap_or(0),
        filtered_min = filtered.iter().copied().min().unwrap_or(0),
        "disparity statistics"
    );
    Ok(quantize(&filtered))
}

pub fn save_depth_map(depth: &GrayImage, pair_dir: &Path) -> Result<PathBuf> {
    let path = pair_dir.join(DEPTH_MAP);
    depth.save(&path).map_err(|source| Error::ImageSave {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Reads one pair directory per line, dropping trailing whitespace and
/// blank lines.
pub fn read_pair_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Processes every listed pair in order, stopping at the first failure.
///
/// Returns the number of depth maps written.
pub fn run_batch<M, F>(
    params: &ValidatedParams,
    image_path_list: &Path,
    pipeline: &StereoPipeline<M, F>,
) -> Result<usize>
where
    M: DisparityMatcher,
    F: DisparityFilter,
{
    let pairs = read_pair_list(image_path_list)?;
    info!(count = pairs.len(), list = %image_path_list.display(), "processing image pairs");
    for (i, pair_dir) in pairs.iter().enumerate() {
        let depth = process_pair(pair_dir, params.image_size, pipeline)?;
        let out = save_depth_map(&depth, pair_dir)?;
        info!(index = i, output = %out.display(), "wrote depth map");
    }
    Ok(pairs.len())
}

/// Validates `params` against `image_path_list`, builds the matchers and
/// runs the whole batch.
pub fn run(params: &StereoParams, image_path_list: &Path) -> Result<usize> {
    let validated = params.validate(image_path_list)?;
    info!(?validated, "validated parameters");
    let pipeline = StereoPipeline::from_params(&validated);
    run_batch(&validated, image_path_list, &pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disparity::MatchDirection;

    fn validated(max_disparity: u32, block_size: u32) -> ValidatedParams {
        ValidatedParams {
            image_size: ImageSize {
                height: 24,
                width: 48,
            },
            max_disparity,
            block_size,
            p1: 216,
            p2: 864,
            lambda: 8000.0,
            sigma: 1.2,
        }
    }

    #[test]
    fn factory_builds_mirrored_twin_and_bound_filter() {
        let pipeline = StereoPipeline::from_params(&validated(32, 3));
        assert_eq!(pipeline.primary.direction(), MatchDirection::LeftToRight);
        assert_eq!(pipeline.mirrored.direction(), MatchDirection::RightToLeft);
        assert_eq!(pipeline.primary.config(), pipeline.mirrored.config());
        assert_eq!(pipeline.primary.config().num_disparities, 32);
        assert_eq!(pipeline.filter.lambda(), 8000.0);
        assert_eq!(pipeline.filter.sigma_color(), 1.2);
    }

    #[test]
    fn pair_list_strips_whitespace_and_blank_lines() {
        let path = std::env::temp_dir().join(format!("stereo-batch-list-{}.txt", std::process::id()));
        std::fs::write(&path, "/data/a  \n\n/data/b\r\n   \n/data/c").unwrap();
        let pairs = read_pair_list(&path).unwrap();
        assert_eq!(
            pairs,
            vec![
                PathBuf::from("/data/a"),
                PathBuf::from("/data/b"),
                PathBuf::from("/data/c")
            ]
        );
    }
}
