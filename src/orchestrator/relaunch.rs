//! Relaunch orchestration.
//!
//! One [`Orchestrator`] drives one relaunch attempt through
//! `Idle → Launching → Running → (HangDetected | Exited) → Terminated`.
//! It owns the channel set, the three bridge tasks and the signal
//! forwarder for the attempt, and hands back a [`RelaunchReport`] whose
//! exit code the caller propagates with
//! [`exit_process`](super::exit::exit_process). At most one relaunch is
//! active per process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::exit::ExitDisposition;
use super::hang_detector::{HangDetector, LaunchProgress};
use super::launcher::{DirectLauncher, LaunchRequest, LaunchStrategy, Launcher};
use crate::bridge::{Bridge, BridgeEvent, BridgeReport, ChannelSet, Flow, Stream};
use crate::cleanup::CleanupManager;
use crate::config::RelaunchConfig;
use crate::models::launch::{LaunchDescriptor, ProcessHandle};
use crate::models::state::RelaunchState;
use crate::signals::{ForwardStats, ForwarderHandle, OsDelivery, SignalDelivery, SignalForwarder};
use crate::{AppError, Result};

/// Time allowed for output bridges to flush after the child exits.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Time allowed for a signalled child to be reaped during teardown.
const REAP_GRACE: Duration = Duration::from_secs(2);

/// Set while a relaunch owns this process's signals and streams.
static RELAUNCH_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Claim on the single active relaunch slot, released on drop.
struct ActiveRelaunch;

impl ActiveRelaunch {
    fn claim() -> Option<Self> {
        RELAUNCH_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self)
    }
}

impl Drop for ActiveRelaunch {
    fn drop(&mut self) {
        RELAUNCH_ACTIVE.store(false, Ordering::Release);
    }
}

/// The parent-side ends of the three bridged streams.
pub struct ParentStreams {
    /// Source forwarded to the child's stdin.
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    /// Sink receiving the child's stdout.
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    /// Sink receiving the child's stderr.
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
}

impl ParentStreams {
    /// Bundle arbitrary streams.
    #[must_use]
    pub fn new(
        stdin: impl AsyncRead + Send + Unpin + 'static,
        stdout: impl AsyncWrite + Send + Unpin + 'static,
        stderr: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }

    /// The current process's own standard streams.
    #[must_use]
    pub fn inherit() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), tokio::io::stderr())
    }
}

/// How a relaunch attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaunchOutcome {
    /// The active child terminated.
    Exited(ExitDisposition),
    /// External cancellation aborted the attempt; no status to propagate.
    Cancelled,
}

/// Summary of a finished relaunch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchReport {
    /// Final outcome.
    pub outcome: RelaunchOutcome,
    /// Whether the hang fallback to direct execution ran.
    pub fallback_used: bool,
    /// Process group of every child started, in order.
    pub process_groups: Vec<Pid>,
    /// Every state the attempt passed through, starting with `Idle`.
    pub states: Vec<RelaunchState>,
    /// Signal forwarding counters.
    pub signals: ForwardStats,
}

impl RelaunchReport {
    /// Exit code to propagate, or `None` when the attempt was cancelled.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            RelaunchOutcome::Exited(disposition) => Some(disposition.exit_code()),
            RelaunchOutcome::Cancelled => None,
        }
    }
}

/// Drives a single relaunch attempt.
pub struct Orchestrator {
    config: RelaunchConfig,
    cleanup: CleanupManager,
    streams: Option<ParentStreams>,
    delivery: Arc<dyn SignalDelivery>,
    os_signals: bool,
    hang_timeout: Duration,
    channel_cleanup_delay: Duration,
    state: RelaunchState,
    states: Vec<RelaunchState>,
    process_groups: Vec<Pid>,
    fallback_used: bool,
}

impl Orchestrator {
    /// Build an orchestrator from configuration and the shared cleanup
    /// manager.
    #[must_use]
    pub fn new(config: RelaunchConfig, cleanup: CleanupManager) -> Self {
        let hang_timeout = config.hang_timeout();
        let channel_cleanup_delay = config.channel_cleanup_delay();
        Self {
            config,
            cleanup,
            streams: None,
            delivery: Arc::new(OsDelivery),
            os_signals: true,
            hang_timeout,
            channel_cleanup_delay,
            state: RelaunchState::Idle,
            states: vec![RelaunchState::Idle],
            process_groups: Vec::new(),
            fallback_used: false,
        }
    }

    /// Use `streams` instead of the process's own standard streams.
    #[must_use]
    pub fn with_streams(mut self, streams: ParentStreams) -> Self {
        self.streams = Some(streams);
        self
    }

    /// Deliver forwarded signals through `delivery`.
    #[must_use]
    pub fn with_signal_delivery(mut self, delivery: Arc<dyn SignalDelivery>) -> Self {
        self.delivery = delivery;
        self
    }

    /// Whether to register OS signal handlers for forwarding.
    #[must_use]
    pub fn with_os_signals(mut self, enabled: bool) -> Self {
        self.os_signals = enabled;
        self
    }

    /// Override the hang-detection window.
    #[must_use]
    pub fn with_hang_timeout(mut self, timeout: Duration) -> Self {
        self.hang_timeout = timeout;
        self
    }

    /// Override how long channel objects live before cleanup.
    #[must_use]
    pub fn with_channel_cleanup_delay(mut self, delay: Duration) -> Self {
        self.channel_cleanup_delay = delay;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RelaunchState {
        self.state
    }

    /// Run the relaunch to completion.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ResourceCreation` if the channels cannot be
    /// created and `AppError::Launch` if no child could be started or
    /// another relaunch is already active in this process. All of these
    /// abort the attempt before any status exists to propagate.
    pub async fn relaunch(
        self,
        descriptor: &LaunchDescriptor,
        strategy: &LaunchStrategy,
        cancel: CancellationToken,
    ) -> Result<RelaunchReport> {
        let Some(_active) = ActiveRelaunch::claim() else {
            return Err(AppError::Launch(
                "another relaunch is already active in this process".into(),
            ));
        };
        let launcher = strategy.launcher(&self.config.launcher_program);
        let span = info_span!(
            "relaunch",
            strategy = launcher.name(),
            package = %descriptor.package_path().display()
        );
        self.run(descriptor, launcher, cancel).instrument(span).await
    }

    async fn run(
        mut self,
        descriptor: &LaunchDescriptor,
        launcher: Arc<dyn Launcher>,
        cancel: CancellationToken,
    ) -> Result<RelaunchReport> {
        self.transition(RelaunchState::Launching);
        let result = if cancel.is_cancelled() {
            debug!("cancelled before launch");
            Ok((RelaunchOutcome::Cancelled, ForwardStats::default()))
        } else if launcher.uses_channels() {
            self.run_bridged(descriptor, launcher.as_ref(), &cancel).await
        } else {
            self.run_unbridged(descriptor, launcher.as_ref(), &cancel).await
        };

        if result.is_err() {
            self.transition(RelaunchState::Terminated);
        }
        let (outcome, signals) = result?;

        self.transition(RelaunchState::Terminated);
        if let RelaunchOutcome::Exited(disposition) = outcome {
            info!(status = %disposition.describe(), "relaunched child finished");
        } else {
            info!("relaunch cancelled");
        }

        Ok(RelaunchReport {
            outcome,
            fallback_used: self.fallback_used,
            process_groups: self.process_groups,
            states: self.states,
            signals,
        })
    }

    /// Launch without channels: the child shares the parent's streams.
    async fn run_unbridged(
        &mut self,
        descriptor: &LaunchDescriptor,
        launcher: &dyn Launcher,
        cancel: &CancellationToken,
    ) -> Result<(RelaunchOutcome, ForwardStats)> {
        let request = LaunchRequest {
            descriptor,
            channels: None,
        };
        let (mut child, handle) = self.start(launcher, &request)?;
        self.transition(RelaunchState::Running);

        let forwarder = self.spawn_forwarder(SignalForwarder::lightweight(handle.pgid), cancel);
        let outcome = self.await_child(&mut child, handle, cancel).await;
        Ok((outcome, forwarder.shutdown().await))
    }

    /// Launch with FIFO channels, hang detection and direct fallback.
    async fn run_bridged(
        &mut self,
        descriptor: &LaunchDescriptor,
        launcher: &dyn Launcher,
        cancel: &CancellationToken,
    ) -> Result<(RelaunchOutcome, ForwardStats)> {
        let channels = ChannelSet::create(&self.config.effective_channel_root())?;
        // The scheduled entries are a backstop; teardown removes the
        // channels as soon as no bridge holds them.
        channels.schedule_cleanup(&self.cleanup, self.channel_cleanup_delay);

        let request = LaunchRequest {
            descriptor,
            channels: Some(&channels),
        };
        let (mut child, handle) = match self.start(launcher, &request) {
            Ok(started) => started,
            Err(err) => {
                remove_channels(&channels);
                return Err(err);
            }
        };
        self.transition(RelaunchState::Running);

        let (bridges, mut events) = self.spawn_bridges(&channels, cancel);
        let forwarder = self.spawn_forwarder(
            SignalForwarder::new(handle.pgid).capacity(self.config.signal_queue_capacity),
            cancel,
        );

        let progress = HangDetector::new(self.hang_timeout)
            .watch(&mut events, &mut child, cancel)
            .await;

        let outcome = match progress {
            LaunchProgress::Started(_) => {
                let outcome = self.await_child(&mut child, handle, cancel).await;
                if outcome == RelaunchOutcome::Cancelled {
                    bridges.abort().await;
                } else {
                    bridges.finish(DRAIN_GRACE).await;
                }
                Ok(outcome)
            }
            LaunchProgress::ChildExited(disposition) => {
                self.transition(RelaunchState::Exited);
                bridges.abort().await;
                Ok(RelaunchOutcome::Exited(disposition))
            }
            LaunchProgress::Cancelled => {
                bridges.abort().await;
                terminate_group(&mut child, handle.pgid, Signal::SIGTERM).await;
                Ok(RelaunchOutcome::Cancelled)
            }
            LaunchProgress::Hung => {
                self.transition(RelaunchState::HangDetected);
                bridges.abort().await;
                terminate_group(&mut child, handle.pgid, Signal::SIGKILL).await;
                remove_channels(&channels);
                self.fall_back(descriptor, &forwarder, cancel).await
            }
        };

        remove_channels(&channels);
        let signals = forwarder.shutdown().await;
        outcome.map(|outcome| (outcome, signals))
    }

    /// Direct execution after a hung indirect launch. Runs at most once.
    async fn fall_back(
        &mut self,
        descriptor: &LaunchDescriptor,
        forwarder: &ForwarderHandle,
        cancel: &CancellationToken,
    ) -> Result<RelaunchOutcome> {
        self.fallback_used = true;
        warn!("falling back to direct execution");

        let request = LaunchRequest {
            descriptor,
            channels: None,
        };
        let (mut child, handle) = self.start(&DirectLauncher, &request)?;
        forwarder.retarget(handle.pgid);
        Ok(self.await_child(&mut child, handle, cancel).await)
    }

    fn start(
        &mut self,
        launcher: &dyn Launcher,
        request: &LaunchRequest<'_>,
    ) -> Result<(Child, ProcessHandle)> {
        let child = launcher.launch(request)?;
        let handle = ProcessHandle::from_child(&child)?;
        self.process_groups.push(handle.pgid);
        debug!(pid = handle.pid.as_raw(), pgid = handle.pgid.as_raw(), "child started");
        Ok((child, handle))
    }

    /// Wait for the child to terminate, or tear it down on cancellation.
    async fn await_child(
        &mut self,
        child: &mut Child,
        handle: ProcessHandle,
        cancel: &CancellationToken,
    ) -> RelaunchOutcome {
        tokio::select! {
            status = child.wait() => {
                let disposition = status.map_or_else(
                    |err| {
                        warn!(%err, "failed to wait for child");
                        ExitDisposition::Unknown
                    },
                    ExitDisposition::from,
                );
                self.transition(RelaunchState::Exited);
                if let Err(err) = disposition.into_code() {
                    warn!(%err, pid = handle.pid.as_raw(), "child did not exit normally");
                }
                RelaunchOutcome::Exited(disposition)
            }
            () = cancel.cancelled() => {
                terminate_group(child, handle.pgid, Signal::SIGTERM).await;
                RelaunchOutcome::Cancelled
            }
        }
    }

    fn spawn_bridges(
        &mut self,
        channels: &ChannelSet,
        cancel: &CancellationToken,
    ) -> (BridgeTasks, mpsc::Receiver<BridgeEvent>) {
        let streams = self.streams.take().unwrap_or_else(ParentStreams::inherit);
        let (events_tx, events_rx) = mpsc::channel(3);

        let cancel = cancel.child_token();
        let stdin_cancel = cancel.child_token();
        let tee_dir = self
            .config
            .debug
            .then(|| self.config.effective_debug_log_dir());

        let build = |stream: Stream| {
            let bridge = Bridge::new(channels.path(stream), stream).with_events(events_tx.clone());
            match &tee_dir {
                Some(dir) => bridge.with_tee_dir(dir),
                None => bridge,
            }
        };

        let stdin = build(Stream::Stdin).spawn(Flow::Inbound(streams.stdin), stdin_cancel.clone());
        let outputs = vec![
            (
                Stream::Stdout,
                build(Stream::Stdout).spawn(Flow::Outbound(streams.stdout), cancel.clone()),
            ),
            (
                Stream::Stderr,
                build(Stream::Stderr).spawn(Flow::Outbound(streams.stderr), cancel.clone()),
            ),
        ];

        let tasks = BridgeTasks {
            cancel,
            stdin_cancel,
            stdin,
            outputs,
        };
        (tasks, events_rx)
    }

    fn spawn_forwarder(
        &self,
        forwarder: SignalForwarder,
        cancel: &CancellationToken,
    ) -> ForwarderHandle {
        forwarder
            .delivery(Arc::clone(&self.delivery))
            .os_intake(self.os_signals)
            .spawn(cancel.child_token())
    }

    fn transition(&mut self, next: RelaunchState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "unexpected relaunch transition");
        }
        debug!(from = %self.state, to = %next, "relaunch state changed");
        self.state = next;
        self.states.push(next);
    }
}

/// The three bridge tasks of one attempt.
struct BridgeTasks {
    cancel: CancellationToken,
    stdin_cancel: CancellationToken,
    stdin: JoinHandle<Result<BridgeReport>>,
    outputs: Vec<(Stream, JoinHandle<Result<BridgeReport>>)>,
}

impl BridgeTasks {
    /// Stop the stdin bridge and give the output bridges `grace` to drain
    /// what the child wrote before exiting.
    async fn finish(self, grace: Duration) {
        self.stdin_cancel.cancel();

        let cancel = self.cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            cancel.cancel();
        });

        log_bridge(Stream::Stdin, self.stdin.await);
        for (stream, handle) in self.outputs {
            log_bridge(stream, handle.await);
        }
        timer.abort();
        self.cancel.cancel();
    }

    /// Cancel every bridge and wait for them to stop.
    async fn abort(self) {
        self.cancel.cancel();
        log_bridge(Stream::Stdin, self.stdin.await);
        for (stream, handle) in self.outputs {
            log_bridge(stream, handle.await);
        }
    }
}

fn log_bridge(
    stream: Stream,
    joined: std::result::Result<Result<BridgeReport>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(report)) => debug!(
            %stream,
            bytes = report.bytes,
            connected = report.connected,
            cancelled = report.cancelled,
            "bridge finished"
        ),
        Ok(Err(err)) => warn!(%stream, %err, "bridge failed"),
        Err(err) => warn!(%stream, %err, "bridge task panicked"),
    }
}

fn remove_channels(channels: &ChannelSet) {
    if let Err(err) = channels.remove() {
        warn!(dir = %channels.dir.display(), %err, "failed to remove channels; left to the sweep");
    }
}

/// Signal the child's group, then reap it within [`REAP_GRACE`].
async fn terminate_group(child: &mut Child, pgid: Pid, signal: Signal) {
    if let Err(errno) = killpg(pgid, signal) {
        debug!(pgid = pgid.as_raw(), %errno, "group signal failed; killing child directly");
        let _ = child.start_kill();
    }

    match tokio::time::timeout(REAP_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(pgid = pgid.as_raw(), %status, "child reaped"),
        Ok(Err(err)) => warn!(pgid = pgid.as_raw(), %err, "failed to reap child"),
        Err(_) => {
            warn!(pgid = pgid.as_raw(), "child ignored termination; killing");
            let _ = child.start_kill();
            let _ = tokio::time::timeout(REAP_GRACE, child.wait()).await;
        }
    }
}
