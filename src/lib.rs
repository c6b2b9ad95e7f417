#![forbid(unsafe_code)]

//! Relaunch bridge for packaged applications.
//!
//! Re-executes the current program inside its application package so the
//! platform grants package-scoped permissions, while keeping the original
//! terminal session intact: std streams are bridged over named FIFOs,
//! signals are forwarded to the child's process group, and the child's
//! exit status becomes the parent's.

pub mod bridge;
pub mod cleanup;
pub mod config;
pub mod errors;
pub mod markers;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod signals;

pub use config::RelaunchConfig;
pub use errors::{AppError, Result};
