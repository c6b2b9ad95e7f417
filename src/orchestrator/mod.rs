//! Relaunch orchestration modules.
//!
//! Covers launch strategies, hang detection with direct-exec fallback,
//! and child exit propagation.

pub mod exit;
pub mod hang_detector;
pub mod launcher;
pub mod relaunch;

pub use exit::{exit_process, ExitDisposition, FAILURE_EXIT_CODE};
pub use hang_detector::{HangDetector, LaunchProgress};
pub use launcher::{DirectLauncher, IndirectLauncher, LaunchRequest, LaunchStrategy, Launcher};
pub use relaunch::{Orchestrator, ParentStreams, RelaunchOutcome, RelaunchReport};
