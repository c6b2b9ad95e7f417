//! Launch descriptor and spawned-process handle.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use tokio::process::Child;

use crate::{AppError, Result};

/// What to relaunch: the package, the executable it wraps and the
/// arguments to pass through. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDescriptor {
    package_path: PathBuf,
    executable_path: PathBuf,
    args: Vec<OsString>,
}

impl LaunchDescriptor {
    /// Describe a relaunch of `executable_path` packaged at `package_path`.
    #[must_use]
    pub fn new(
        package_path: impl Into<PathBuf>,
        executable_path: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            package_path: package_path.into(),
            executable_path: executable_path.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Package directory handed to the launcher.
    #[must_use]
    pub fn package_path(&self) -> &Path {
        &self.package_path
    }

    /// Original executable the package was built from.
    #[must_use]
    pub fn executable_path(&self) -> &Path {
        &self.executable_path
    }

    /// Arguments forwarded to the relaunched program.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Path of the executable inside the package:
    /// `<package>/Contents/MacOS/<executable file name>`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the executable path has no file name.
    pub fn bundled_executable(&self) -> Result<PathBuf> {
        let name = self.executable_path.file_name().ok_or_else(|| {
            AppError::Launch(format!(
                "executable path {} has no file name",
                self.executable_path.display()
            ))
        })?;
        Ok(self.package_path.join("Contents").join("MacOS").join(name))
    }
}

/// Identity of a spawned child. The child leads its own process group, so
/// `pgid == pid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Child process id.
    pub pid: Pid,
    /// Process group the child leads.
    pub pgid: Pid,
}

impl ProcessHandle {
    /// Capture the identity of a freshly spawned group leader.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the child has already been reaped or
    /// its pid does not fit a `pid_t`.
    pub fn from_child(child: &Child) -> Result<Self> {
        let raw = child
            .id()
            .ok_or_else(|| AppError::Launch("child exited before its pid was read".into()))?;
        let pid = i32::try_from(raw)
            .map(Pid::from_raw)
            .map_err(|err| AppError::Launch(format!("pid {raw} out of range: {err}")))?;
        Ok(Self { pid, pgid: pid })
    }
}
