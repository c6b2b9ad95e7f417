//! Relaunch configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::markers::EnvMarkers;
use crate::{AppError, Result};

/// Smallest signal queue that still absorbs a burst of job-control signals.
pub const MIN_SIGNAL_QUEUE_CAPACITY: usize = 16;

fn default_launcher_program() -> PathBuf {
    PathBuf::from("/usr/bin/open")
}

fn default_hang_timeout() -> u64 {
    5
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_channel_cleanup() -> u64 {
    30
}

fn default_signal_queue_capacity() -> usize {
    100
}

/// Relaunch configuration parsed from an optional `relaunch.toml`.
///
/// Every field has a default, so an empty document is a valid config.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelaunchConfig {
    /// Program used for the indirect (registered application) launch.
    #[serde(default = "default_launcher_program")]
    pub launcher_program: PathBuf,
    /// Seconds to wait for the first sign of child activity.
    #[serde(default = "default_hang_timeout")]
    pub hang_timeout_seconds: u64,
    /// Seconds between cleanup sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Seconds after creation before channel objects are removed.
    #[serde(default = "default_channel_cleanup")]
    pub channel_cleanup_seconds: u64,
    /// Capacity of the signal intake queue.
    #[serde(default = "default_signal_queue_capacity")]
    pub signal_queue_capacity: usize,
    /// Parent directory for per-relaunch channel directories; defaults to
    /// the system temp dir.
    #[serde(default)]
    pub channel_root: Option<PathBuf>,
    /// Roots the cleanup manager may delete beneath; empty means the
    /// system temporary directory.
    #[serde(default)]
    pub cleanup_roots: Vec<PathBuf>,
    /// Directory for debug tee files; defaults to the system temp dir.
    #[serde(default)]
    pub debug_log_dir: Option<PathBuf>,
    /// Debug verbosity.
    #[serde(default)]
    pub debug: bool,
}

impl Default for RelaunchConfig {
    fn default() -> Self {
        Self {
            launcher_program: default_launcher_program(),
            hang_timeout_seconds: default_hang_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            channel_cleanup_seconds: default_channel_cleanup(),
            signal_queue_capacity: default_signal_queue_capacity(),
            channel_root: None,
            cleanup_roots: Vec::new(),
            debug_log_dir: None,
            debug: false,
        }
    }
}

impl RelaunchConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment markers onto the file configuration.
    pub fn apply_markers(&mut self, markers: &EnvMarkers) {
        if markers.debug {
            self.debug = true;
        }
    }

    /// Hang-detection window.
    #[must_use]
    pub fn hang_timeout(&self) -> Duration {
        Duration::from_secs(self.hang_timeout_seconds)
    }

    /// Interval between cleanup sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Delay before channel objects are reaped.
    #[must_use]
    pub fn channel_cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.channel_cleanup_seconds)
    }

    /// Parent directory for channel directories.
    #[must_use]
    pub fn effective_channel_root(&self) -> PathBuf {
        self.channel_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Roots the cleanup manager accepts, falling back to the temp dir.
    #[must_use]
    pub fn effective_cleanup_roots(&self) -> Vec<PathBuf> {
        if self.cleanup_roots.is_empty() {
            vec![std::env::temp_dir()]
        } else {
            self.cleanup_roots.clone()
        }
    }

    /// Directory receiving debug tee files.
    #[must_use]
    pub fn effective_debug_log_dir(&self) -> PathBuf {
        self.debug_log_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.launcher_program.as_os_str().is_empty() {
            return Err(AppError::Config("launcher_program must not be empty".into()));
        }

        if self.hang_timeout_seconds == 0 {
            return Err(AppError::Config(
                "hang_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "sweep_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.signal_queue_capacity < MIN_SIGNAL_QUEUE_CAPACITY {
            return Err(AppError::Config(format!(
                "signal_queue_capacity must be at least {MIN_SIGNAL_QUEUE_CAPACITY}"
            )));
        }

        if let Some(root) = self.cleanup_roots.iter().find(|root| !root.is_absolute()) {
            return Err(AppError::Config(format!(
                "cleanup root {} must be absolute",
                root.display()
            )));
        }

        Ok(())
    }
}
