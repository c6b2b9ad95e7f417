//! Per-direction byte forwarding between a parent stream and a FIFO.
//!
//! Opening a FIFO blocks until the peer opens the other end, which is how
//! the bridge learns that the child has started: the open runs on a
//! blocking thread and its completion is reported as
//! [`BridgeEvent::Connected`]. Once open, the handle is converted to a
//! non-blocking tokio pipe so cancellation can drop it at any time.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::fcntl::OFlag;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::channel::Stream;
use crate::{AppError, Result};

const COPY_BUFFER_SIZE: usize = 8 * 1024;

/// Upper bound on waiting for a blocked `open` to be released on cancel.
const RELEASE_GRACE: Duration = Duration::from_secs(1);

/// Direction of a bridge and the parent-side stream it uses.
pub enum Flow {
    /// Bytes from `source` are written into the FIFO (opened write-only).
    Inbound(Box<dyn AsyncRead + Send + Unpin>),
    /// Bytes read from the FIFO (opened read-only) are written to `sink`.
    Outbound(Box<dyn AsyncWrite + Send + Unpin>),
}

impl Flow {
    fn is_inbound(&self) -> bool {
        matches!(self, Self::Inbound(_))
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_inbound() { "Inbound" } else { "Outbound" })
    }
}

/// Lifecycle notifications emitted by a running bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The child opened its end of the FIFO.
    Connected(Stream),
}

/// Summary of a finished bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeReport {
    /// Bytes forwarded.
    pub bytes: u64,
    /// Whether the peer ever opened the FIFO.
    pub connected: bool,
    /// Whether the bridge stopped because of cancellation.
    pub cancelled: bool,
}

/// A single forwarding direction for one FIFO.
#[derive(Debug)]
pub struct Bridge {
    channel: PathBuf,
    stream: Stream,
    events: Option<mpsc::Sender<BridgeEvent>>,
    tee_path: Option<PathBuf>,
}

impl Bridge {
    /// Bridge `channel`, labelled as `stream` in logs and events.
    #[must_use]
    pub fn new(channel: impl Into<PathBuf>, stream: Stream) -> Self {
        Self {
            channel: channel.into(),
            stream,
            events: None,
            tee_path: None,
        }
    }

    /// Report lifecycle events on `events`.
    #[must_use]
    pub fn with_events(mut self, events: mpsc::Sender<BridgeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Append a copy of every forwarded byte to `macgo-<pid>-<stream>.log`
    /// inside `dir`.
    #[must_use]
    pub fn with_tee_dir(mut self, dir: &Path) -> Self {
        self.tee_path = Some(debug_log_path(dir, self.stream));
        self
    }

    /// Spawn [`run`](Self::run) as an independent task.
    #[must_use]
    pub fn spawn(self, flow: Flow, cancel: CancellationToken) -> JoinHandle<Result<BridgeReport>> {
        let span = info_span!("bridge", stream = %self.stream);
        tokio::spawn(self.run(flow, cancel).instrument(span))
    }

    /// Open the FIFO and copy bytes until end-of-stream, error or cancel.
    ///
    /// A broken pipe ends the copy normally.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the FIFO cannot be opened or a copy fails
    /// for any reason other than a broken pipe.
    pub async fn run(self, flow: Flow, cancel: CancellationToken) -> Result<BridgeReport> {
        let inbound = flow.is_inbound();
        let mut report = BridgeReport::default();

        let Some(file) = open_channel(&self.channel, inbound, &cancel).await? else {
            debug!(stream = %self.stream, "bridge cancelled before peer connected");
            report.cancelled = true;
            return Ok(report);
        };

        report.connected = true;
        debug!(stream = %self.stream, "peer connected");
        if let Some(events) = &self.events {
            // One event per stream; a full queue drops it.
            let _ = events.try_send(BridgeEvent::Connected(self.stream));
        }

        let mut tee = match &self.tee_path {
            Some(path) => open_tee(path).await,
            None => None,
        };

        let mut copied = 0;
        let outcome = match flow {
            Flow::Inbound(mut source) => {
                let mut sender = pipe::Sender::from_file(file)
                    .map_err(|err| AppError::Io(format!("{} channel: {err}", self.stream)))?;
                tokio::select! {
                    result = pump(&mut source, &mut sender, &mut tee, &mut copied) => Some(result),
                    () = cancel.cancelled() => None,
                }
            }
            Flow::Outbound(mut sink) => {
                let mut receiver = pipe::Receiver::from_file(file)
                    .map_err(|err| AppError::Io(format!("{} channel: {err}", self.stream)))?;
                let result = tokio::select! {
                    result = pump(&mut receiver, &mut sink, &mut tee, &mut copied) => Some(result),
                    () = cancel.cancelled() => None,
                };
                let _ = sink.flush().await;
                result
            }
        };
        report.bytes = copied;

        match outcome {
            None => {
                debug!(stream = %self.stream, bytes = copied, "bridge cancelled");
                report.cancelled = true;
                Ok(report)
            }
            Some(Ok(())) => {
                debug!(stream = %self.stream, bytes = copied, "bridge reached end of stream");
                Ok(report)
            }
            Some(Err(err)) if err.kind() == ErrorKind::BrokenPipe => {
                debug!(stream = %self.stream, bytes = copied, "bridge peer closed");
                Ok(report)
            }
            Some(Err(err)) => {
                warn!(stream = %self.stream, %err, "bridge copy failed");
                Err(AppError::Io(format!("{} copy failed: {err}", self.stream)))
            }
        }
    }
}

/// Deterministic debug tee file for `stream` of this process.
#[must_use]
pub fn debug_log_path(dir: &Path, stream: Stream) -> PathBuf {
    dir.join(format!("macgo-{}-{stream}.log", std::process::id()))
}

/// Open `path` in the direction of the flow, waiting for the peer.
///
/// Returns `Ok(None)` when `cancel` fires first. A blocked `open` is
/// released by briefly opening the opposite end without blocking.
async fn open_channel(
    path: &Path,
    inbound: bool,
    cancel: &CancellationToken,
) -> Result<Option<std::fs::File>> {
    let target = path.to_path_buf();
    let mut opening = tokio::task::spawn_blocking(move || {
        let mut options = OpenOptions::new();
        if inbound {
            options.write(true);
        } else {
            options.read(true);
        }
        options.open(&target)
    });

    tokio::select! {
        joined = &mut opening => match joined {
            Ok(Ok(file)) => Ok(Some(file)),
            Ok(Err(err)) => Err(AppError::Io(format!("cannot open {}: {err}", path.display()))),
            Err(err) => Err(AppError::Io(format!("channel open task failed: {err}"))),
        },
        () = cancel.cancelled() => {
            let releaser = open_peer_nonblocking(path, inbound);
            if tokio::time::timeout(RELEASE_GRACE, opening).await.is_err() {
                warn!(path = %path.display(), "blocked channel open could not be released");
            }
            drop(releaser);
            Ok(None)
        }
    }
}

fn open_peer_nonblocking(path: &Path, inbound: bool) -> Option<std::fs::File> {
    let mut options = OpenOptions::new();
    if inbound {
        options.read(true);
    } else {
        options.write(true);
    }
    options
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
        .inspect_err(|err| debug!(path = %path.display(), %err, "peer release open failed"))
        .ok()
}

async fn open_tee(path: &Path) -> Option<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
        .await
        .inspect_err(|err| warn!(path = %path.display(), %err, "cannot open debug tee"))
        .ok()
}

/// Copy until end-of-stream. `total` counts bytes fully written, so it
/// stays accurate when the copy fails or is dropped part way.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    tee: &mut Option<tokio::fs::File>,
    total: &mut u64,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };

        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *total += n as u64;

        if let Some(file) = tee.as_mut() {
            if let Err(err) = file.write_all(&buf[..n]).await {
                warn!(%err, "debug tee write failed; disabling tee");
                *tee = None;
            }
        }
    }
}
