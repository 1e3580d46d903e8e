use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stereo_batch::{logging, split};

/// Makes a reproducible random split of a stereo dataset with `left/` and
/// `right/` subdirectories so small demos can run on it.
#[derive(Parser, Debug)]
#[command(name = "make_data_split")]
struct Args {
    /// Directory with the original `left/` and `right/` data
    #[arg(long, alias = "source_dir")]
    source_dir: PathBuf,
    /// Existing directory the sampled pairs are written to
    #[arg(long, alias = "out_dir")]
    out_dir: PathBuf,
    /// Number of pairs to sample
    #[arg(long, alias = "num_samples", default_value_t = split::DEFAULT_NUM_SAMPLES)]
    num_samples: usize,
    /// Seed of the sampler
    #[arg(long, default_value_t = split::DEFAULT_SEED)]
    seed: u64,
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let sampled = split::make_data_split(&args.source_dir, &args.out_dir, args.num_samples, args.seed)
        .with_context(|| {
            format!(
                "splitting {} into {}",
                args.source_dir.display(),
                args.out_dir.display()
            )
        })?;
    tracing::info!(count = sampled.len(), "copied sampled pairs");
    Ok(())
}
