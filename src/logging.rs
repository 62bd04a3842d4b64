//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The filter is read from the `ASSETRUN_LOG` environment variable (e.g.
//! `info`, `debug`, `assetrun=trace`) and defaults to `info`. Logs go to
//! stderr through the indicatif writer, so spinners for running task spans
//! don't tear log lines apart.

use indicatif::ProgressStyle;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub const ENV_FILTER: &str = "ASSETRUN_LOG";

/// Initialise the global subscriber. Call once at startup.
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(ENV_FILTER).unwrap_or_else(|_| EnvFilter::new("info"));
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()?;

    Ok(())
}

/// Spinner shown for every running task span.
pub fn task_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
