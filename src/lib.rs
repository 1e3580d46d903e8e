//! Batch stereo depth maps, dataset splitting and scheduler job files.
//!
//! - [`pipeline`] turns a list of stereo pair directories into filtered
//!   depth maps using semi-global matching ([`sgm`]) and a
//!   weighted-least-squares post-filter ([`wls`]).
//! - [`split`] draws a reproducible random subset of a left/right dataset.
//! - [`jobs`] renders one job script per image list from a template.

pub mod config;
pub mod disparity;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod params;
pub mod pipeline;
pub mod sgm;
pub mod split;
pub mod wls;

pub use disparity::{DisparityFilter, DisparityMap, DisparityMatcher, MatchDirection};
pub use error::{Error, Result};
pub use params::{ImageSize, StereoParams, ValidatedParams};
pub use pipeline::{process_pair, run, run_batch, StereoPipeline};
