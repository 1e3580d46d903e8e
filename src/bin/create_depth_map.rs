use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stereo_batch::config::StereoConfig;
use stereo_batch::{logging, pipeline};

/// Stereo matching and filtering to create depth maps from stereo pairs.
///
/// Disparities are computed with semi-global block matching and then
/// post-processed with a weighted-least-squares filter. The depth map of
/// every pair is saved as `disp.jpg` inside the pair's directory.
#[derive(Parser, Debug)]
#[command(name = "create_depth_map", allow_negative_numbers = true)]
struct Args {
    /// Text file with one image-pair directory per line
    image_path_list: PathBuf,
    /// JSON file with any of the parameters below
    #[arg(long)]
    config: Option<PathBuf>,
    /// Height images are resized to [default: 1080]
    #[arg(long, alias = "im_height")]
    im_height: Option<i64>,
    /// Width images are resized to [default: 1920]
    #[arg(long, alias = "im_width")]
    im_width: Option<i64>,
    /// Maximum disparity to search to, a multiple of 16 [default: 160]
    #[arg(long, alias = "max_disparity")]
    max_disparity: Option<i64>,
    /// Matching window size, odd and at least 3 [default: 15]
    #[arg(long, alias = "block_size")]
    block_size: Option<i64>,
    /// Smoothness penalty for small disparity changes [default: 8*3*block_size^2]
    #[arg(long)]
    p1: Option<i64>,
    /// Smoothness penalty for large disparity changes [default: 32*3*block_size^2]
    #[arg(long)]
    p2: Option<i64>,
    /// Regularisation of the post-filter [default: 8000]
    #[arg(long, alias = "lmbda")]
    lambda: Option<f64>,
    /// Edge sensitivity of the post-filter [default: 1.2]
    #[arg(long)]
    sigma: Option<f64>,
}

impl Args {
    fn overrides(&self) -> StereoConfig {
        StereoConfig {
            im_height: self.im_height,
            im_width: self.im_width,
            max_disparity: self.max_disparity,
            block_size: self.block_size,
            p1: self.p1,
            p2: self.p2,
            lambda: self.lambda,
            sigma: self.sigma,
        }
    }
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => StereoConfig::load(path)?,
        None => StereoConfig::default(),
    };
    let params = args.overrides().or(file).into_params();

    let written = pipeline::run(&params, &args.image_path_list)
        .with_context(|| format!("depth maps for {}", args.image_path_list.display()))?;
    tracing::info!(written, "done");
    Ok(())
}
