//! Relaunch lifecycle states.

use std::fmt::{Display, Formatter};

/// State of a single relaunch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaunchState {
    /// Nothing started yet.
    Idle,
    /// Channels created and the child is being spawned.
    Launching,
    /// Child started; bridges and signal forwarding active.
    Running,
    /// The launch produced no progress in time; falling back.
    HangDetected,
    /// The active child terminated.
    Exited,
    /// Exit status handed back for propagation, or the attempt was aborted.
    Terminated,
}

impl RelaunchState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Launching)
                | (Self::Launching, Self::Running | Self::Terminated)
                | (Self::Running, Self::HangDetected | Self::Exited | Self::Terminated)
                | (Self::HangDetected, Self::Exited | Self::Terminated)
                | (Self::Exited, Self::Terminated)
        )
    }
}

impl Display for RelaunchState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Launching => "launching",
            Self::Running => "running",
            Self::HangDetected => "hang_detected",
            Self::Exited => "exited",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
