//! Named FIFO channel endpoints.
//!
//! The indirect launch path does not inherit file descriptors, so the
//! child's standard streams are wired to FIFOs instead. All three FIFOs of
//! a relaunch live in one private directory (`0700`); each FIFO is `0600`.

use std::fmt::{Display, Formatter};
use std::fs::{self, DirBuilder, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tracing::{debug, warn};

use crate::cleanup::{CleanupManager, EntryKind};
use crate::{AppError, Result};

/// Permissions of the private channel directory.
pub const CHANNEL_DIR_MODE: u32 = 0o700;

/// Permissions of each FIFO.
pub const CHANNEL_FIFO_MODE: u32 = 0o600;

static CHANNEL_SEQ: AtomicU64 = AtomicU64::new(0);

/// The three standard streams bridged across a relaunch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Parent stdin → child.
    Stdin,
    /// Child → parent stdout.
    Stdout,
    /// Child → parent stderr.
    Stderr,
}

impl Stream {
    /// Stable lowercase name used in channel and log file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl Display for Stream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Create a private directory (`0700`) under `parent` for channel objects.
///
/// # Errors
///
/// Returns `AppError::ResourceCreation` if the directory cannot be created
/// or its permissions cannot be restricted. A half-created directory is
/// removed before returning.
pub fn create_private_dir(parent: &Path, prefix: &str) -> Result<PathBuf> {
    let name = format!(
        "{prefix}-{}-{}",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    let dir = parent.join(name);

    DirBuilder::new()
        .mode(CHANNEL_DIR_MODE)
        .create(&dir)
        .map_err(|err| {
            AppError::ResourceCreation(format!("cannot create {}: {err}", dir.display()))
        })?;

    // The umask may have widened or narrowed the requested mode.
    if let Err(err) = fs::set_permissions(&dir, Permissions::from_mode(CHANNEL_DIR_MODE)) {
        let _ = fs::remove_dir(&dir);
        return Err(AppError::ResourceCreation(format!(
            "cannot restrict {}: {err}",
            dir.display()
        )));
    }

    Ok(dir)
}

/// Create a uniquely named FIFO (`0600`) inside `dir`.
///
/// The name combines `prefix`, the process id, a per-process sequence
/// number and a random suffix.
///
/// # Errors
///
/// Returns `AppError::ResourceCreation` if the FIFO cannot be created or
/// restricted. A half-created FIFO is removed before returning.
pub fn open_duplex_channel(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let seq = CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed);
    let random = uuid::Uuid::new_v4().simple().to_string();
    let name = format!("{prefix}-{}-{seq}-{}", std::process::id(), &random[..8]);
    let path = dir.join(name);

    mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|err| {
        AppError::ResourceCreation(format!("mkfifo {} failed: {err}", path.display()))
    })?;

    if let Err(err) = fs::set_permissions(&path, Permissions::from_mode(CHANNEL_FIFO_MODE)) {
        let _ = fs::remove_file(&path);
        return Err(AppError::ResourceCreation(format!(
            "cannot restrict {}: {err}",
            path.display()
        )));
    }

    debug!(path = %path.display(), "channel created");
    Ok(path)
}

/// The private directory plus one FIFO per standard stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet {
    /// Private directory holding the FIFOs.
    pub dir: PathBuf,
    /// FIFO wired to the child's stdin.
    pub stdin: PathBuf,
    /// FIFO wired to the child's stdout.
    pub stdout: PathBuf,
    /// FIFO wired to the child's stderr.
    pub stderr: PathBuf,
}

impl ChannelSet {
    /// Create a fresh directory under `parent` with three FIFOs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ResourceCreation` if any object cannot be
    /// created; everything created so far is removed first.
    pub fn create(parent: &Path) -> Result<Self> {
        let dir = create_private_dir(parent, "macgo")?;

        let build = || -> Result<Self> {
            Ok(Self {
                stdin: open_duplex_channel(&dir, Stream::Stdin.as_str())?,
                stdout: open_duplex_channel(&dir, Stream::Stdout.as_str())?,
                stderr: open_duplex_channel(&dir, Stream::Stderr.as_str())?,
                dir: dir.clone(),
            })
        };

        build().inspect_err(|_| {
            if let Err(err) = fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), %err, "failed to remove partial channel dir");
            }
        })
    }

    /// FIFO path for `stream`.
    #[must_use]
    pub fn path(&self, stream: Stream) -> &Path {
        match stream {
            Stream::Stdin => &self.stdin,
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    /// Remove the FIFOs and their directory now.
    ///
    /// Objects that are already gone count as removed, so this is safe to
    /// repeat and to race with a scheduled sweep.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` for the first object that exists but cannot
    /// be removed.
    pub fn remove(&self) -> Result<()> {
        for stream in [Stream::Stdin, Stream::Stdout, Stream::Stderr] {
            let path = self.path(stream);
            ignore_missing(path, fs::remove_file(path))?;
        }
        ignore_missing(&self.dir, fs::remove_dir(&self.dir))?;
        debug!(dir = %self.dir.display(), "channels removed");
        Ok(())
    }

    /// Hand the FIFOs and their directory to the cleanup manager.
    ///
    /// Scheduling failures are logged; they never abort a relaunch.
    pub fn schedule_cleanup(&self, cleanup: &CleanupManager, delay: Duration) {
        for stream in [Stream::Stdin, Stream::Stdout, Stream::Stderr] {
            let path = self.path(stream);
            if let Err(err) = cleanup.schedule(path, delay, EntryKind::File) {
                warn!(path = %path.display(), %err, "failed to schedule channel cleanup");
            }
        }
        if let Err(err) = cleanup.schedule(&self.dir, delay, EntryKind::Directory) {
            warn!(dir = %self.dir.display(), %err, "failed to schedule channel dir cleanup");
        }
    }
}

fn ignore_missing(path: &Path, removed: std::io::Result<()>) -> Result<()> {
    match removed {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(format!("cannot remove {}: {err}", path.display()))),
    }
}
