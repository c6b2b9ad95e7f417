//! Signal forwarding from the parent to the child's process group.
//!
//! Each registered signal gets a small listener task that pushes into a
//! bounded [`SignalQueue`]. A single consumer drains the queue and sends
//! every signal to the whole target group. A full queue drops the signal
//! and logs it; intake never blocks.
//!
//! `SIGKILL` and `SIGSTOP` cannot be caught and are never registered.
//! `SIGCHLD` is deliberately not forwarded: the parent's own child reaping
//! has nothing to do with the launched package.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::AppError;

/// Queue size for a plain direct-execution run.
pub const LIGHTWEIGHT_QUEUE_CAPACITY: usize = 16;

/// Queue size for the orchestrated indirect relaunch.
pub const ORCHESTRATED_QUEUE_CAPACITY: usize = 100;

/// Signals that are forwarded to the child's process group.
///
/// Every catchable signal except `SIGCHLD`. The synchronous faults
/// `SIGSEGV`, `SIGBUS`, `SIGILL` and `SIGFPE` keep their default
/// disposition.
pub const FORWARDED_SIGNALS: &[Signal] = &[
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTRAP,
    Signal::SIGABRT,
    Signal::SIGALRM,
    Signal::SIGPIPE,
    Signal::SIGTERM,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGCONT,
    Signal::SIGWINCH,
    Signal::SIGURG,
    Signal::SIGIO,
    Signal::SIGPROF,
    Signal::SIGVTALRM,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
    Signal::SIGSYS,
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    Signal::SIGINFO,
];

/// Whether `signal` is forwarded at all.
#[must_use]
pub fn is_forwarded(signal: Signal) -> bool {
    FORWARDED_SIGNALS.contains(&signal)
}

/// Terminal job-control stops that also suspend the parent.
#[must_use]
pub fn is_job_control_stop(signal: Signal) -> bool {
    matches!(signal, Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU)
}

/// How forwarded signals reach the operating system.
pub trait SignalDelivery: Send + Sync {
    /// Send `signal` to every process in group `pgid`.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the group cannot be signalled.
    fn signal_group(&self, pgid: Pid, signal: Signal) -> nix::Result<()>;

    /// Suspend the calling process with an unconditional stop.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the stop cannot be raised.
    fn stop_self(&self) -> nix::Result<()>;
}

/// Real delivery through `killpg(2)` and `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsDelivery;

impl SignalDelivery for OsDelivery {
    fn signal_group(&self, pgid: Pid, signal: Signal) -> nix::Result<()> {
        killpg(pgid, signal)
    }

    fn stop_self(&self) -> nix::Result<()> {
        kill(Pid::this(), Signal::SIGSTOP)
    }
}

/// Producer side of the bounded signal queue.
#[derive(Debug, Clone)]
pub struct SignalQueue {
    tx: mpsc::Sender<Signal>,
}

impl SignalQueue {
    /// Enqueue `signal` without blocking.
    ///
    /// Returns `false` and logs when the queue is full or closed.
    pub fn push(&self, signal: Signal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%signal, "signal queue full; dropping signal");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%signal, "signal queue closed; dropping signal");
                false
            }
        }
    }
}

/// Counters returned when the forwarder shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Signals delivered to the target group.
    pub delivered: u64,
    /// Delivery attempts that failed.
    pub failed: u64,
    /// Times the parent stopped itself after a job-control signal.
    pub suspended: u64,
}

/// Builder for a signal forwarder targeting one process group.
pub struct SignalForwarder {
    target: Pid,
    capacity: usize,
    delivery: Arc<dyn SignalDelivery>,
    os_intake: bool,
}

impl SignalForwarder {
    /// Forward to `target` with the orchestrated queue size and real
    /// delivery.
    #[must_use]
    pub fn new(target: Pid) -> Self {
        Self {
            target,
            capacity: ORCHESTRATED_QUEUE_CAPACITY,
            delivery: Arc::new(OsDelivery),
            os_intake: true,
        }
    }

    /// Forward to `target` with the lightweight queue size, as used for
    /// plain direct execution.
    #[must_use]
    pub fn lightweight(target: Pid) -> Self {
        Self::new(target).capacity(LIGHTWEIGHT_QUEUE_CAPACITY)
    }

    /// Override the queue size.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Override how signals are delivered.
    #[must_use]
    pub fn delivery(mut self, delivery: Arc<dyn SignalDelivery>) -> Self {
        self.delivery = delivery;
        self
    }

    /// Whether to register OS signal handlers. When disabled, signals only
    /// arrive through [`ForwarderHandle::queue`].
    #[must_use]
    pub fn os_intake(mut self, enabled: bool) -> Self {
        self.os_intake = enabled;
        self
    }

    /// Start the consumer and, unless disabled, the OS listeners.
    ///
    /// A signal whose handler cannot be registered is logged and skipped.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> ForwarderHandle {
        let (tx, rx) = mpsc::channel(self.capacity);
        let queue = SignalQueue { tx };
        let target = Arc::new(AtomicI32::new(self.target.as_raw()));

        let mut listeners = Vec::new();
        if self.os_intake {
            for &sig in FORWARDED_SIGNALS {
                match signal(SignalKind::from_raw(sig as i32)) {
                    Ok(stream) => listeners.push(spawn_listener(
                        sig,
                        stream,
                        queue.clone(),
                        cancel.clone(),
                    )),
                    Err(err) => warn!(signal = %sig, %err, "cannot register signal handler"),
                }
            }
            info!(
                pgid = self.target.as_raw(),
                registered = listeners.len(),
                "signal forwarding started"
            );
        }

        let consumer = tokio::spawn(
            consume(
                rx,
                Arc::clone(&target),
                Arc::clone(&self.delivery),
                cancel.clone(),
            )
            .instrument(info_span!("signal_forwarder")),
        );

        ForwarderHandle {
            target,
            queue,
            cancel,
            consumer: Some(consumer),
            listeners,
        }
    }
}

/// Start forwarding to `target` with the lightweight queue and real
/// delivery.
#[must_use]
pub fn forward(target: Pid, cancel: CancellationToken) -> ForwarderHandle {
    SignalForwarder::lightweight(target).spawn(cancel)
}

fn spawn_listener(
    sig: Signal,
    mut stream: tokio::signal::unix::Signal,
    queue: SignalQueue,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = stream.recv() => {
                    if received.is_none() {
                        break;
                    }
                    debug!(signal = %sig, "signal received");
                    queue.push(sig);
                }
            }
        }
    })
}

async fn consume(
    mut rx: mpsc::Receiver<Signal>,
    target: Arc<AtomicI32>,
    delivery: Arc<dyn SignalDelivery>,
    cancel: CancellationToken,
) -> ForwardStats {
    let mut stats = ForwardStats::default();
    loop {
        // Queued signals are drained before cancellation is honoured.
        let sig = tokio::select! {
            biased;

            next = rx.recv() => match next {
                Some(sig) => sig,
                None => break,
            },
            () = cancel.cancelled() => break,
        };

        if sig == Signal::SIGCHLD {
            debug!("ignoring child-reaped notification");
            continue;
        }

        let pgid = Pid::from_raw(target.load(Ordering::SeqCst));
        match delivery.signal_group(pgid, sig) {
            Ok(()) => {
                debug!(signal = %sig, pgid = pgid.as_raw(), "signal forwarded");
                stats.delivered += 1;
            }
            Err(errno) => {
                let err = AppError::Delivery(format!(
                    "{sig} to group {}: {errno}",
                    pgid.as_raw()
                ));
                warn!(%err, "signal forwarding failed");
                stats.failed += 1;
            }
        }

        if is_job_control_stop(sig) {
            match delivery.stop_self() {
                Ok(()) => stats.suspended += 1,
                Err(errno) => warn!(%errno, "failed to suspend parent after job-control signal"),
            }
        }
    }
    stats
}

/// Handle to a running forwarder.
pub struct ForwarderHandle {
    target: Arc<AtomicI32>,
    queue: SignalQueue,
    cancel: CancellationToken,
    consumer: Option<JoinHandle<ForwardStats>>,
    listeners: Vec<JoinHandle<()>>,
}

impl Drop for ForwarderHandle {
    /// Stop forwarding when the handle is dropped.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ForwarderHandle {
    /// Current target process group.
    #[must_use]
    pub fn target(&self) -> Pid {
        Pid::from_raw(self.target.load(Ordering::SeqCst))
    }

    /// Point forwarding at a different process group.
    ///
    /// Signals already queued go to the new group.
    pub fn retarget(&self, pgid: Pid) {
        let previous = self.target.swap(pgid.as_raw(), Ordering::SeqCst);
        info!(from = previous, to = pgid.as_raw(), "signal forwarding retargeted");
    }

    /// Producer side of the intake queue.
    #[must_use]
    pub fn queue(&self) -> SignalQueue {
        self.queue.clone()
    }

    /// Stop all listeners and the consumer, returning the counters.
    pub async fn shutdown(mut self) -> ForwardStats {
        self.cancel.cancel();
        for listener in self.listeners.drain(..) {
            let _ = listener.await;
        }
        match self.consumer.take() {
            Some(consumer) => consumer.await.unwrap_or_default(),
            None => ForwardStats::default(),
        }
    }
}
