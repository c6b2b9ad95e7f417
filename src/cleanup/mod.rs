//! Temporary-resource cleanup.
//!
//! Channel objects created for a relaunch outlive the call that made them;
//! this module guarantees they are eventually removed without blocking the
//! caller.

pub mod manager;
pub mod path_safety;

pub use manager::{CleanupEntry, CleanupManager, CleanupTask, EntryKind, SweepReport};
pub use path_safety::validate_cleanup_path;
