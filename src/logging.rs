//! File-based tracing setup.
//!
//! The terminal belongs to the UI, so log output goes to a daily rolling
//! file under the data directory instead of stdout.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "reelbox";
const DEFAULT_FILTER: &str = "reelbox=debug,warn";

/// Initialize the global subscriber. `RUST_LOG` overrides the default filter.
///
/// The returned guard flushes buffered lines when dropped; hold it for the
/// lifetime of the process.
pub fn init_logging(dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::info!(dir = %dir.display(), "logging initialized");
    Ok(guard)
}
