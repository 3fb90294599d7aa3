use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "reelbox";
const TRACKS_DIR: &str = "tracks";
const SESSION_FILE: &str = "session.json";
const LOG_DIR: &str = "logs";

pub const DATA_DIR_ENV: &str = "REELBOX_DATA_DIR";

pub fn data_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn tracks_dir(root: &Path) -> PathBuf {
    root.join(TRACKS_DIR)
}

pub fn session_path(root: &Path) -> PathBuf {
    root.join(SESSION_FILE)
}

pub fn log_dir(root: &Path) -> PathBuf {
    root.join(LOG_DIR)
}

pub fn ensure_data_dir(root: &Path) -> Result<()> {
    fs::create_dir_all(root).with_context(|| format!("failed to create {}", root.display()))
}

/// Tunables for the playback controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Upper bound on how stale the persisted position may get.
    pub position_flush_interval: Duration,
    /// Minimum spacing between time-update notifications handed to the UI.
    pub ui_tick_interval: Duration,
    pub status_capacity: usize,
    pub rng_seed: Option<u64>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            position_flush_interval: Duration::from_secs(1),
            ui_tick_interval: Duration::from_millis(250),
            status_capacity: 200,
            rng_seed: None,
        }
    }
}
