pub mod config;
pub mod data;
pub mod error;
pub mod nets;
pub mod persist;
pub mod preview;
mod timing;
pub mod training;

pub use config::GanConfig;
pub use error::{GanErr, Result};

/// The logger used by the binary: progress goes to standard output, filtered by `RUST_LOG`
/// and showing `info` records by default.
pub fn logger() -> env_logger::Builder {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.target(env_logger::Target::Stdout);
    builder
}

/// Configures the global rayon pool the convolutions run on. Must be called once, before
/// any training.
///
/// # Errors
/// Returns `GanErr::ThreadPool` if the global pool was already initialized.
pub fn init(config: &GanConfig) -> Result<()> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = config.threads {
        builder = builder.num_threads(threads);
    }

    builder.build_global()?;
    log::debug!("using {} threads", rayon::current_num_threads());
    Ok(())
}
