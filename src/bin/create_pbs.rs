use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stereo_batch::jobs::{self, JobResources};
use stereo_batch::logging;

/// Creates one scheduler script per `image_*.txt` list in the current
/// directory from a base script.
#[derive(Parser, Debug)]
#[command(name = "create_pbs")]
struct Args {
    /// Absolute path to the base script
    base: PathBuf,
    /// Absolute path the run files are written to
    outdir: PathBuf,
    /// Number of CPU cores requested
    #[arg(long, default_value_t = jobs::DEFAULT_NCPUS, value_parser = clap::value_parser!(u32).range(1..))]
    ncpus: u32,
    /// Max runtime in HH:MM:SS format
    #[arg(long, default_value = jobs::DEFAULT_WALLTIME)]
    walltime: String,
    /// Memory required, e.g. 32GB, 500MB
    #[arg(long, default_value = jobs::DEFAULT_MEMORY)]
    mem: String,
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let resources = JobResources {
        ncpus: args.ncpus,
        walltime: args.walltime,
        memory: args.mem,
    };
    let cwd = std::env::current_dir().context("reading current directory")?;
    let written = jobs::create_job_files(&args.base, &args.outdir, &resources, &cwd)?;
    tracing::info!(count = written.len(), outdir = %args.outdir.display(), "wrote job files");
    Ok(())
}
