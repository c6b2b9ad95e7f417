//! Unit tests for the FIFO bridge.
//!
//! A plain thread plays the child: it opens the other end of the FIFO
//! with blocking std I/O, exactly as a relaunched process would.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use macgo_relaunch::bridge::{
    debug_log_path, open_duplex_channel, Bridge, BridgeEvent, Flow, Stream,
};
use macgo_relaunch::AppError;

fn fifo(dir: &tempfile::TempDir, prefix: &str) -> PathBuf {
    open_duplex_channel(dir.path(), prefix).expect("create fifo")
}

#[tokio::test]
async fn outbound_bridge_forwards_bytes_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = fifo(&temp, "stdout");
    let (events_tx, mut events_rx) = mpsc::channel(3);
    let (sink, mut observed) = tokio::io::duplex(64 * 1024);

    let peer_path = path.clone();
    let peer = std::thread::spawn(move || {
        let mut writer = std::fs::OpenOptions::new()
            .write(true)
            .open(peer_path)
            .expect("open fifo for writing");
        writer.write_all(b"first line\n").expect("write");
        writer.write_all(b"second line\n").expect("write");
    });

    let report = Bridge::new(&path, Stream::Stdout)
        .with_events(events_tx)
        .spawn(Flow::Outbound(Box::new(sink)), CancellationToken::new())
        .await
        .expect("bridge task")
        .expect("bridge result");
    peer.join().expect("peer thread");

    let mut output = String::new();
    observed.read_to_string(&mut output).await.expect("read sink");
    assert_eq!(output, "first line\nsecond line\n");
    assert_eq!(report.bytes, 23);
    assert!(report.connected);
    assert!(!report.cancelled);
    assert_eq!(
        events_rx.recv().await,
        Some(BridgeEvent::Connected(Stream::Stdout))
    );
}

#[tokio::test]
async fn inbound_bridge_forwards_source_and_closes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = fifo(&temp, "stdin");

    let peer_path = path.clone();
    let peer = std::thread::spawn(move || {
        let mut reader = std::fs::File::open(peer_path).expect("open fifo for reading");
        let mut received = Vec::new();
        reader.read_to_end(&mut received).expect("read");
        received
    });

    let source = std::io::Cursor::new(b"typed by the user".to_vec());
    let report = Bridge::new(&path, Stream::Stdin)
        .run(Flow::Inbound(Box::new(source)), CancellationToken::new())
        .await
        .expect("bridge result");

    let received = peer.join().expect("peer thread");
    assert_eq!(received, b"typed by the user");
    assert_eq!(report.bytes, 17);
}

#[tokio::test]
async fn broken_pipe_keeps_bytes_already_forwarded() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = fifo(&temp, "stdin");
    let (mut feed, source) = tokio::io::duplex(1024);

    let peer_path = path.clone();
    let peer = std::thread::spawn(move || {
        let mut reader = std::fs::File::open(peer_path).expect("open fifo for reading");
        let mut received = [0u8; 5];
        reader.read_exact(&mut received).expect("read");
        received
    });

    let handle = Bridge::new(&path, Stream::Stdin)
        .spawn(Flow::Inbound(Box::new(source)), CancellationToken::new());
    feed.write_all(b"first").await.expect("feed first");
    let received = tokio::task::spawn_blocking(move || peer.join().expect("peer thread"))
        .await
        .expect("join peer");
    assert_eq!(&received, b"first");

    // The reader is gone; the next chunk hits a broken pipe.
    feed.write_all(b"second").await.expect("feed second");
    let report = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("bridge stops on broken pipe")
        .expect("bridge task")
        .expect("broken pipe is not an error");

    assert_eq!(report.bytes, 5);
    assert!(report.connected);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn cancel_before_peer_connects_returns_promptly() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = fifo(&temp, "stderr");
    let cancel = CancellationToken::new();
    let (sink, _observed) = tokio::io::duplex(1024);

    let handle = Bridge::new(&path, Stream::Stderr).spawn(Flow::Outbound(Box::new(sink)), cancel.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("bridge stops after cancel")
        .expect("bridge task")
        .expect("bridge result");
    assert!(report.cancelled);
    assert!(!report.connected);
}

#[tokio::test]
async fn cancel_inbound_before_peer_connects_returns_promptly() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = fifo(&temp, "stdin");
    let cancel = CancellationToken::new();

    let handle = Bridge::new(&path, Stream::Stdin).spawn(
        Flow::Inbound(Box::new(tokio::io::empty())),
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("bridge stops after cancel")
        .expect("bridge task")
        .expect("bridge result");
    assert!(report.cancelled);
}

#[tokio::test]
async fn cancel_while_copying_stops_bridge() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = fifo(&temp, "stdout");
    let cancel = CancellationToken::new();
    let (events_tx, mut events_rx) = mpsc::channel(3);
    let (sink, _observed) = tokio::io::duplex(1024);
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    let peer_path = path.clone();
    let peer = std::thread::spawn(move || {
        let _writer = std::fs::OpenOptions::new()
            .write(true)
            .open(peer_path)
            .expect("open fifo for writing");
        let _ = release_rx.recv_timeout(Duration::from_secs(10));
    });

    let handle = Bridge::new(&path, Stream::Stdout)
        .with_events(events_tx)
        .spawn(Flow::Outbound(Box::new(sink)), cancel.clone());
    events_rx.recv().await.expect("connected event");
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("bridge stops after cancel")
        .expect("bridge task")
        .expect("bridge result");
    release_tx.send(()).expect("release peer");
    peer.join().expect("peer thread");

    assert!(report.connected);
    assert!(report.cancelled);
}

#[tokio::test]
async fn debug_tee_captures_forwarded_bytes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let logs = tempfile::tempdir().expect("tempdir");
    let path = fifo(&temp, "stdout");
    let (sink, _observed) = tokio::io::duplex(64 * 1024);

    let peer_path = path.clone();
    let peer = std::thread::spawn(move || {
        let mut writer = std::fs::OpenOptions::new()
            .write(true)
            .open(peer_path)
            .expect("open fifo for writing");
        writer.write_all(b"mirrored").expect("write");
    });

    Bridge::new(&path, Stream::Stdout)
        .with_tee_dir(logs.path())
        .run(Flow::Outbound(Box::new(sink)), CancellationToken::new())
        .await
        .expect("bridge result");
    peer.join().expect("peer thread");

    let tee = std::fs::read(debug_log_path(logs.path(), Stream::Stdout)).expect("read tee");
    assert_eq!(tee, b"mirrored");
}

#[test]
fn debug_log_path_names_pid_and_stream() {
    let path = debug_log_path(std::path::Path::new("/tmp"), Stream::Stderr);

    assert_eq!(
        path,
        PathBuf::from(format!("/tmp/macgo-{}-stderr.log", std::process::id()))
    );
}

#[tokio::test]
async fn missing_channel_is_io_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (sink, _observed) = tokio::io::duplex(1024);

    let result = Bridge::new(temp.path().join("absent"), Stream::Stdout)
        .run(Flow::Outbound(Box::new(sink)), CancellationToken::new())
        .await;

    assert!(matches!(result, Err(AppError::Io(_))));
}
