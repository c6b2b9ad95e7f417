//! Error types shared across the relaunch bridge.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all relaunch failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Channel directory or FIFO could not be created.
    ResourceCreation(String),
    /// The launch mechanism could not start the child process.
    Launch(String),
    /// A forwarded signal could not be delivered to the child's group.
    Delivery(String),
    /// The hang timer fired before the child showed any progress.
    LaunchHang(String),
    /// The child was terminated by a signal instead of exiting.
    ChildAbnormalTermination(String),
    /// A cleanup entry was skipped (type mismatch or unusable target).
    CleanupSkipped(String),
    /// File system path failed validation against the allowed roots.
    PathViolation(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::ResourceCreation(msg) => write!(f, "resource creation: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Delivery(msg) => write!(f, "delivery: {msg}"),
            Self::LaunchHang(msg) => write!(f, "launch hang: {msg}"),
            Self::ChildAbnormalTermination(msg) => {
                write!(f, "child abnormal termination: {msg}")
            }
            Self::CleanupSkipped(msg) => write!(f, "cleanup skipped: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
