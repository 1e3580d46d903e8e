use tracing_subscriber::EnvFilter;

/// Installs the global subscriber for the command-line tools.
///
/// `RUST_LOG` controls the level, e.g. `RUST_LOG=debug` or
/// `RUST_LOG=stereo_batch=debug`; without it only `info` and above is shown.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_level(true)
        .init();
}
