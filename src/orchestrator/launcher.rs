//! Launch strategies for the relaunched child.
//!
//! Every strategy spawns the child as the leader of a new process group so
//! the signal forwarder can address the child and everything it starts with
//! one `killpg`. Every child carries the no-relaunch marker.
//!
//! - [`IndirectLauncher`] goes through the platform's registered-application
//!   launcher (`open`), wiring the child's std streams to FIFOs.
//! - [`DirectLauncher`] executes the packaged binary directly with the
//!   parent's own std streams.
//! - Callers may supply their own [`Launcher`] via
//!   [`LaunchStrategy::Custom`].

use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tracing::{info, info_span};

use crate::bridge::ChannelSet;
use crate::markers::NO_RELAUNCH;
use crate::models::launch::LaunchDescriptor;
use crate::{AppError, Result};

/// Everything a launcher needs for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    /// What to launch.
    pub descriptor: &'a LaunchDescriptor,
    /// FIFOs for the child's std streams, when the launcher uses them.
    pub channels: Option<&'a ChannelSet>,
}

/// A way of starting the relaunched child.
pub trait Launcher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether the child's std streams go through FIFO channels. Launches
    /// that use channels are subject to hang detection.
    fn uses_channels(&self) -> bool;

    /// Spawn the child as the leader of a new process group.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the process cannot be started.
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Child>;
}

/// Launch through the platform's registered-application launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectLauncher {
    program: PathBuf,
}

impl IndirectLauncher {
    /// Use `program` (normally `/usr/bin/open`) as the launcher.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Build the launcher command without spawning it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if no channels were supplied.
    pub fn command(&self, request: &LaunchRequest<'_>) -> Result<Command> {
        let channels = request
            .channels
            .ok_or_else(|| AppError::Launch("indirect launch requires channels".into()))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-W")
            .arg("-a")
            .arg(request.descriptor.package_path())
            .arg("--stdin")
            .arg(&channels.stdin)
            .arg("--stdout")
            .arg(&channels.stdout)
            .arg("--stderr")
            .arg(&channels.stderr)
            .arg("--env")
            .arg(format!("{NO_RELAUNCH}=1"))
            .arg("--args")
            .args(request.descriptor.args())
            .env(NO_RELAUNCH, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .process_group(0)
            .kill_on_drop(true);
        Ok(cmd)
    }
}

impl Launcher for IndirectLauncher {
    fn name(&self) -> &str {
        "indirect"
    }

    fn uses_channels(&self) -> bool {
        true
    }

    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Child> {
        let span = info_span!(
            "indirect_launch",
            package = %request.descriptor.package_path().display()
        );
        let _guard = span.enter();

        let child = self.command(request)?.spawn().map_err(|err| {
            AppError::Launch(format!("failed to spawn {}: {err}", self.program.display()))
        })?;

        info!(
            pid = child.id().unwrap_or(0),
            launcher = %self.program.display(),
            "package launch started"
        );
        Ok(child)
    }
}

/// Execute the packaged binary directly, sharing the parent's std streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectLauncher;

impl DirectLauncher {
    /// Build the direct-execution command without spawning it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the packaged executable path cannot be
    /// derived.
    pub fn command(request: &LaunchRequest<'_>) -> Result<Command> {
        let executable = request.descriptor.bundled_executable()?;
        let mut cmd = Command::new(executable);
        cmd.args(request.descriptor.args())
            .env(NO_RELAUNCH, "1")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0)
            .kill_on_drop(true);
        Ok(cmd)
    }
}

impl Launcher for DirectLauncher {
    fn name(&self) -> &str {
        "direct"
    }

    fn uses_channels(&self) -> bool {
        false
    }

    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Child> {
        let executable = request.descriptor.bundled_executable()?;
        let child = Self::command(request)?.spawn().map_err(|err| {
            AppError::Launch(format!("failed to execute {}: {err}", executable.display()))
        })?;

        info!(
            pid = child.id().unwrap_or(0),
            executable = %executable.display(),
            "direct execution started"
        );
        Ok(child)
    }
}

/// Strategy chosen once per relaunch attempt.
#[derive(Clone)]
pub enum LaunchStrategy {
    /// Registered-application launch via the configured launcher program.
    Indirect,
    /// Direct execution of the packaged binary.
    Direct,
    /// Caller-supplied launcher.
    Custom(Arc<dyn Launcher>),
}

impl Debug for LaunchStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Indirect => f.write_str("Indirect"),
            Self::Direct => f.write_str("Direct"),
            Self::Custom(launcher) => write!(f, "Custom({})", launcher.name()),
        }
    }
}

impl LaunchStrategy {
    /// Resolve the strategy into a concrete launcher.
    #[must_use]
    pub fn launcher(&self, launcher_program: &std::path::Path) -> Arc<dyn Launcher> {
        match self {
            Self::Indirect => Arc::new(IndirectLauncher::new(launcher_program)),
            Self::Direct => Arc::new(DirectLauncher),
            Self::Custom(launcher) => Arc::clone(launcher),
        }
    }
}
