//! Launch hang detection.
//!
//! The platform launcher can hang indefinitely when launch-time components
//! are misconfigured. [`HangDetector::watch`] races a bounded timer against
//! the first sign of child progress: one of the bridges reporting that the
//! child opened its FIFO.

use std::time::Duration;

use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::exit::ExitDisposition;
use crate::bridge::{BridgeEvent, Stream};
use crate::AppError;

/// Result of watching a fresh launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchProgress {
    /// The child connected to the given stream.
    Started(Stream),
    /// The launcher process exited before any stream connected.
    ChildExited(ExitDisposition),
    /// The timer fired first.
    Hung,
    /// External cancellation fired first.
    Cancelled,
}

/// Bounded wait for the first sign of child activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HangDetector {
    timeout: Duration,
}

impl HangDetector {
    /// Construct a detector with the given window.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Hang-detection window.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for progress, launcher exit, the timer or cancellation,
    /// whichever comes first. Progress wins ties against launcher exit.
    pub async fn watch(
        &self,
        events: &mut mpsc::Receiver<BridgeEvent>,
        child: &mut Child,
        cancel: &CancellationToken,
    ) -> LaunchProgress {
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("launch watch cancelled");
                    return LaunchProgress::Cancelled;
                }
                event = events.recv(), if events_open => match event {
                    Some(BridgeEvent::Connected(stream)) => {
                        info!(%stream, "child connected");
                        return LaunchProgress::Started(stream);
                    }
                    None => {
                        // Every bridge ended without a connection; keep
                        // waiting on the child and the timer.
                        events_open = false;
                    }
                },
                status = child.wait() => {
                    let disposition = status.map_or(ExitDisposition::Unknown, ExitDisposition::from);
                    info!(status = %disposition.describe(), "launcher exited before child connected");
                    return LaunchProgress::ChildExited(disposition);
                }
                () = &mut deadline => {
                    let err = AppError::LaunchHang(format!(
                        "no child activity within {:?}",
                        self.timeout
                    ));
                    warn!(%err, "launch appears hung");
                    return LaunchProgress::Hung;
                }
            }
        }
    }
}
