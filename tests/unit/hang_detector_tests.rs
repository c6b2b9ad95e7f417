//! Unit tests for launch hang detection.

use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use macgo_relaunch::bridge::{BridgeEvent, Stream};
use macgo_relaunch::orchestrator::{ExitDisposition, HangDetector, LaunchProgress};

fn long_running_child() -> Child {
    Command::new("sleep")
        .arg("30")
        .kill_on_drop(true)
        .spawn()
        .expect("spawn sleep")
}

#[tokio::test]
async fn connection_counts_as_progress() {
    let (tx, mut rx) = mpsc::channel(3);
    let mut child = long_running_child();
    tx.send(BridgeEvent::Connected(Stream::Stdout))
        .await
        .expect("send event");

    let progress = HangDetector::new(Duration::from_secs(5))
        .watch(&mut rx, &mut child, &CancellationToken::new())
        .await;

    assert_eq!(progress, LaunchProgress::Started(Stream::Stdout));
}

#[tokio::test]
async fn silence_is_reported_as_hang_after_timeout() {
    let (_tx, mut rx) = mpsc::channel::<BridgeEvent>(3);
    let mut child = long_running_child();
    let started = Instant::now();

    let progress = HangDetector::new(Duration::from_millis(150))
        .watch(&mut rx, &mut child, &CancellationToken::new())
        .await;

    assert_eq!(progress, LaunchProgress::Hung);
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn closed_event_channel_still_waits_for_timer() {
    let (tx, mut rx) = mpsc::channel::<BridgeEvent>(3);
    drop(tx);
    let mut child = long_running_child();

    let progress = HangDetector::new(Duration::from_millis(150))
        .watch(&mut rx, &mut child, &CancellationToken::new())
        .await;

    assert_eq!(progress, LaunchProgress::Hung);
}

#[tokio::test]
async fn early_launcher_exit_is_reported() {
    let (_tx, mut rx) = mpsc::channel::<BridgeEvent>(3);
    let mut child = Command::new("sh")
        .args(["-c", "exit 3"])
        .spawn()
        .expect("spawn sh");

    let progress = HangDetector::new(Duration::from_secs(5))
        .watch(&mut rx, &mut child, &CancellationToken::new())
        .await;

    assert_eq!(
        progress,
        LaunchProgress::ChildExited(ExitDisposition::Code(3))
    );
}

#[tokio::test]
async fn cancellation_ends_watch() {
    let (_tx, mut rx) = mpsc::channel::<BridgeEvent>(3);
    let mut child = long_running_child();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let progress = HangDetector::new(Duration::from_secs(5))
        .watch(&mut rx, &mut child, &cancel)
        .await;

    assert_eq!(progress, LaunchProgress::Cancelled);
}
