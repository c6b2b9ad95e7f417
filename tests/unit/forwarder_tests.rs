//! Unit tests for the signal forwarder.
//!
//! Most tests swap in a recording delivery so no real signal leaves the
//! test process; one test delivers for real to a throwaway process group.

use std::os::unix::process::ExitStatusExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serial_test::serial;
use tokio_util::sync::CancellationToken;

use macgo_relaunch::signals::{
    forward, is_forwarded, is_job_control_stop, SignalDelivery, SignalForwarder,
    FORWARDED_SIGNALS,
};

#[derive(Default)]
struct RecordingDelivery {
    delivered: Mutex<Vec<(Pid, Signal)>>,
    stops: AtomicU64,
    fail: bool,
}

impl RecordingDelivery {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn delivered(&self) -> Vec<(Pid, Signal)> {
        self.delivered.lock().unwrap().clone()
    }
}

impl SignalDelivery for RecordingDelivery {
    fn signal_group(&self, pgid: Pid, signal: Signal) -> nix::Result<()> {
        self.delivered.lock().unwrap().push((pgid, signal));
        if self.fail {
            Err(Errno::ESRCH)
        } else {
            Ok(())
        }
    }

    fn stop_self(&self) -> nix::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn target() -> Pid {
    Pid::from_raw(4242)
}

#[tokio::test]
async fn queued_signals_reach_group_in_order() {
    let recorder = Arc::new(RecordingDelivery::default());
    let handle = SignalForwarder::new(target())
        .delivery(recorder.clone())
        .os_intake(false)
        .spawn(CancellationToken::new());

    let queue = handle.queue();
    assert!(queue.push(Signal::SIGINT));
    assert!(queue.push(Signal::SIGTERM));
    let stats = handle.shutdown().await;

    assert_eq!(stats.delivered, 2);
    assert_eq!(
        recorder.delivered(),
        vec![(target(), Signal::SIGINT), (target(), Signal::SIGTERM)]
    );
}

#[tokio::test]
async fn child_reaped_notification_is_never_forwarded() {
    let recorder = Arc::new(RecordingDelivery::default());
    let handle = SignalForwarder::new(target())
        .delivery(recorder.clone())
        .os_intake(false)
        .spawn(CancellationToken::new());

    handle.queue().push(Signal::SIGCHLD);
    let stats = handle.shutdown().await;

    assert_eq!(stats.delivered, 0);
    assert!(recorder.delivered().is_empty());
}

#[tokio::test]
async fn job_control_signal_suspends_parent_after_forwarding() {
    let recorder = Arc::new(RecordingDelivery::default());
    let handle = SignalForwarder::new(target())
        .delivery(recorder.clone())
        .os_intake(false)
        .spawn(CancellationToken::new());

    handle.queue().push(Signal::SIGTSTP);
    handle.queue().push(Signal::SIGCONT);
    let stats = handle.shutdown().await;

    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.suspended, 1);
    assert_eq!(recorder.stops.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.delivered()[0], (target(), Signal::SIGTSTP));
}

#[tokio::test]
async fn delivery_failure_does_not_stop_forwarding() {
    let recorder = Arc::new(RecordingDelivery::failing());
    let handle = SignalForwarder::new(target())
        .delivery(recorder.clone())
        .os_intake(false)
        .spawn(CancellationToken::new());

    handle.queue().push(Signal::SIGHUP);
    handle.queue().push(Signal::SIGUSR1);
    let stats = handle.shutdown().await;

    assert_eq!(stats.failed, 2);
    assert_eq!(stats.delivered, 0);
    assert_eq!(recorder.delivered().len(), 2);
}

#[tokio::test]
async fn full_queue_drops_without_blocking() {
    let recorder = Arc::new(RecordingDelivery::default());
    let handle = SignalForwarder::new(target())
        .capacity(16)
        .delivery(recorder.clone())
        .os_intake(false)
        .spawn(CancellationToken::new());

    // The current-thread runtime cannot run the consumer until we yield.
    let queue = handle.queue();
    let accepted = (0..20).filter(|_| queue.push(Signal::SIGWINCH)).count();
    let stats = handle.shutdown().await;

    assert_eq!(accepted, 16);
    assert_eq!(stats.delivered, 16);
}

#[tokio::test]
async fn retarget_redirects_pending_signals() {
    let recorder = Arc::new(RecordingDelivery::default());
    let handle = SignalForwarder::new(target())
        .delivery(recorder.clone())
        .os_intake(false)
        .spawn(CancellationToken::new());

    let fallback = Pid::from_raw(5151);
    handle.retarget(fallback);
    handle.queue().push(Signal::SIGUSR2);
    assert_eq!(handle.target(), fallback);
    handle.shutdown().await;

    assert_eq!(recorder.delivered(), vec![(fallback, Signal::SIGUSR2)]);
}

#[tokio::test]
async fn closed_forwarder_rejects_new_signals() {
    let handle = SignalForwarder::new(target())
        .delivery(Arc::new(RecordingDelivery::default()))
        .os_intake(false)
        .spawn(CancellationToken::new());
    let queue = handle.queue();

    handle.shutdown().await;

    // The consumer is gone; pushes neither block nor panic.
    let _ = queue.push(Signal::SIGINT);
}

#[tokio::test]
#[serial]
async fn os_signal_is_captured_and_forwarded() {
    let recorder = Arc::new(RecordingDelivery::default());
    let handle = SignalForwarder::new(target())
        .delivery(recorder.clone())
        .spawn(CancellationToken::new());

    nix::sys::signal::kill(Pid::this(), Signal::SIGUSR2).expect("raise signal");

    let seen = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if recorder
                .delivered()
                .contains(&(target(), Signal::SIGUSR2))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    handle.shutdown().await;

    assert!(seen.is_ok(), "SIGUSR2 should be forwarded");
}

#[tokio::test]
#[serial]
async fn lightweight_forward_signals_real_child_group() {
    let mut child = tokio::process::Command::new("sleep")
        .arg("30")
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .expect("spawn sleep");
    let pgid = Pid::from_raw(i32::try_from(child.id().expect("pid")).expect("pid fits"));

    let handle = forward(pgid, CancellationToken::new());
    assert_eq!(handle.target(), pgid);
    handle.queue().push(Signal::SIGTERM);
    let stats = handle.shutdown().await;

    let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .expect("child exits")
        .expect("wait");
    assert_eq!(stats.delivered, 1);
    assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
}

#[tokio::test]
async fn real_delivery_reaches_child_process_group() {
    let mut child = tokio::process::Command::new("sleep")
        .arg("30")
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .expect("spawn sleep");
    let pgid = Pid::from_raw(i32::try_from(child.id().expect("pid")).expect("pid fits"));

    let handle = SignalForwarder::new(pgid)
        .os_intake(false)
        .spawn(CancellationToken::new());
    handle.queue().push(Signal::SIGTERM);
    let stats = handle.shutdown().await;

    let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .expect("child exits")
        .expect("wait");
    assert_eq!(stats.delivered, 1);
    assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
}

#[test]
fn forwarded_set_is_every_catchable_signal_but_sigchld() {
    for signal in [
        Signal::SIGKILL,
        Signal::SIGSTOP,
        Signal::SIGCHLD,
        Signal::SIGSEGV,
        Signal::SIGBUS,
        Signal::SIGILL,
        Signal::SIGFPE,
    ] {
        assert!(!is_forwarded(signal), "{signal} must not be forwarded");
    }
    for signal in [
        Signal::SIGINT,
        Signal::SIGTERM,
        Signal::SIGHUP,
        Signal::SIGWINCH,
        Signal::SIGPIPE,
        Signal::SIGTRAP,
        Signal::SIGSYS,
    ] {
        assert!(is_forwarded(signal), "{signal} must be forwarded");
    }
    assert!(FORWARDED_SIGNALS.len() >= 22);
}

#[test]
fn job_control_stops_are_recognised() {
    assert!(is_job_control_stop(Signal::SIGTSTP));
    assert!(is_job_control_stop(Signal::SIGTTIN));
    assert!(is_job_control_stop(Signal::SIGTTOU));
    assert!(!is_job_control_stop(Signal::SIGCONT));
    assert!(!is_job_control_stop(Signal::SIGSTOP));
}
