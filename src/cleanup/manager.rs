//! Deferred removal of temporary filesystem objects.
//!
//! Callers hand paths to [`CleanupManager::schedule`] and move on. A
//! background task started with [`CleanupManager::spawn`] sweeps the table
//! on a fixed interval and removes every entry whose due time has passed.
//!
//! The entry table is guarded by a single mutex that is held only while the
//! table is mutated. Filesystem removal always happens after the lock is
//! released so new schedule requests never wait on disk I/O.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::path_safety::validate_cleanup_path;
use crate::{AppError, Result};

/// Expected filesystem object type of a cleanup target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Anything that is not a directory: regular file, FIFO, socket, symlink.
    File,
    /// A directory, removed recursively.
    Directory,
}

/// A scheduled removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupEntry {
    /// Canonical path of the target.
    pub path: PathBuf,
    /// Type the target had when it was scheduled.
    pub kind: EntryKind,
    /// Earliest instant at which the target may be removed.
    pub due: Instant,
}

/// Outcome counts of a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Targets deleted by this sweep.
    pub removed: usize,
    /// Targets that were already gone.
    pub missing: usize,
    /// Targets left in place (type mismatch, failed validation, I/O error).
    pub skipped: usize,
}

struct Inner {
    entries: Mutex<HashMap<PathBuf, CleanupEntry>>,
    roots: Vec<PathBuf>,
    interval: Duration,
}

/// Shared handle to the cleanup table. Cloning is cheap.
#[derive(Clone)]
pub struct CleanupManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CleanupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupManager")
            .field("roots", &self.inner.roots)
            .field("interval", &self.inner.interval)
            .field("pending", &self.pending())
            .finish()
    }
}

impl CleanupManager {
    /// Create a manager that only removes paths beneath `roots`.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                roots,
                interval,
            }),
        }
    }

    /// Sweep interval used by the background task.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Record `path` for removal once `delay` has elapsed.
    ///
    /// Scheduling a path that is already pending keeps the later due time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` if the path fails validation.
    pub fn schedule(&self, path: impl AsRef<Path>, delay: Duration, kind: EntryKind) -> Result<()> {
        let key = validate_cleanup_path(&self.inner.roots, path)?;
        let due = Instant::now() + delay;

        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_insert(CleanupEntry {
            path: key.clone(),
            kind,
            due,
        });
        entry.kind = kind;
        entry.due = entry.due.max(due);
        drop(entries);

        debug!(path = %key.display(), ?kind, delay_ms = delay.as_millis(), "cleanup scheduled");
        Ok(())
    }

    /// Number of entries waiting to be swept.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Whether `path` is currently waiting in the table.
    #[must_use]
    pub fn is_scheduled(&self, path: impl AsRef<Path>) -> bool {
        validate_cleanup_path(&self.inner.roots, path)
            .is_ok_and(|key| self.lock().contains_key(&key))
    }

    /// Remove every due entry from the table and delete its target.
    ///
    /// Performs blocking filesystem I/O; async callers should run it on a
    /// blocking thread.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();

        let due: Vec<CleanupEntry> = {
            let mut entries = self.lock();
            let keys: Vec<PathBuf> = entries
                .values()
                .filter(|entry| entry.due <= now)
                .map(|entry| entry.path.clone())
                .collect();
            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };

        let mut report = SweepReport::default();
        for entry in due {
            match self.remove_entry(&entry) {
                Ok(Removal::Removed) => report.removed += 1,
                Ok(Removal::Missing) => report.missing += 1,
                Err(err) => {
                    warn!(path = %entry.path.display(), %err, "cleanup entry skipped");
                    report.skipped += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                removed = report.removed,
                missing = report.missing,
                skipped = report.skipped,
                "cleanup sweep completed"
            );
        }
        report
    }

    /// Spawn the periodic sweep task.
    ///
    /// The task sweeps every [`interval`](Self::interval) until `cancel`
    /// fires. Use [`CleanupTask::shutdown`] to stop it and wait for any
    /// in-flight sweep to finish.
    #[must_use]
    pub fn spawn(&self, cancel: CancellationToken) -> CleanupTask {
        let manager = self.clone();
        let task_cancel = cancel.clone();
        let join_handle = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(manager.interval());
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = task_cancel.cancelled() => {
                            info!("cleanup sweep shutting down");
                            break;
                        }
                        _ = interval.tick() => {
                            let sweeper = manager.clone();
                            if let Err(err) = tokio::task::spawn_blocking(move || sweeper.sweep()).await {
                                warn!(%err, "cleanup sweep task failed");
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("cleanup_sweep")),
        );

        CleanupTask {
            cancel,
            join_handle: Some(join_handle),
        }
    }

    fn remove_entry(&self, entry: &CleanupEntry) -> Result<Removal> {
        validate_cleanup_path(&self.inner.roots, &entry.path)?;

        let metadata = match std::fs::symlink_metadata(&entry.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %entry.path.display(), "cleanup target already gone");
                return Ok(Removal::Missing);
            }
            Err(err) => return Err(AppError::CleanupSkipped(format!("stat failed: {err}"))),
        };

        let result = match (entry.kind, metadata.is_dir()) {
            (EntryKind::Directory, true) => std::fs::remove_dir_all(&entry.path),
            (EntryKind::File, false) => std::fs::remove_file(&entry.path),
            (expected, _) => {
                return Err(AppError::CleanupSkipped(format!(
                    "expected {expected:?} but found {:?}",
                    metadata.file_type()
                )));
            }
        };

        match result {
            Ok(()) => {
                debug!(path = %entry.path.display(), "cleanup target removed");
                Ok(Removal::Removed)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Removal::Missing),
            Err(err) => Err(AppError::CleanupSkipped(format!("removal failed: {err}"))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, CleanupEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

enum Removal {
    Removed,
    Missing,
}

/// Handle to the background sweep task.
pub struct CleanupTask {
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl Drop for CleanupTask {
    /// Cancel the sweep when the handle is dropped.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl CleanupTask {
    /// Stop the sweep and wait for it to exit.
    ///
    /// A sweep already in progress runs to completion first.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
