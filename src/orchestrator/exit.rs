//! Child termination status and its propagation to the parent.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use crate::{AppError, Result};

/// Exit code used when no child-reported code is available.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// How the active child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Normal exit with a numeric status.
    Code(i32),
    /// Killed by a signal.
    Signaled(i32),
    /// Status could not be determined (wait failed).
    Unknown,
}

impl From<ExitStatus> for ExitDisposition {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Code(code),
            (None, Some(signal)) => Self::Signaled(signal),
            (None, None) => Self::Unknown,
        }
    }
}

impl ExitDisposition {
    /// Exit code the parent should terminate with.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Code(code) => code,
            Self::Signaled(_) | Self::Unknown => FAILURE_EXIT_CODE,
        }
    }

    /// Numeric status, or an error when the child did not exit normally.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ChildAbnormalTermination` for signal deaths and
    /// unknown statuses.
    pub fn into_code(self) -> Result<i32> {
        match self {
            Self::Code(code) => Ok(code),
            Self::Signaled(signal) => Err(AppError::ChildAbnormalTermination(format!(
                "terminated by signal {signal}"
            ))),
            Self::Unknown => Err(AppError::ChildAbnormalTermination(
                "exit status unknown".into(),
            )),
        }
    }

    /// Human-readable status text for logs.
    #[must_use]
    pub fn describe(self) -> String {
        match self {
            Self::Code(0) => "exited normally (code 0)".to_owned(),
            Self::Code(code) => format!("exited with code {code}"),
            Self::Signaled(signal) => format!("terminated by signal {signal}"),
            Self::Unknown => "status unknown".to_owned(),
        }
    }
}

/// Terminate the parent with `code`. Never returns.
pub fn exit_process(code: i32) -> ! {
    std::process::exit(code)
}
