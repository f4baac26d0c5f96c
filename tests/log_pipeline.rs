//! Integration tests for the protocol log pipeline: sink -> queue and the
//! independent file tailer. These run on the real clock because they
//! exercise actual filesystem activity.

use std::path::PathBuf;
use std::time::Duration;
use tokio::time::timeout;
use torque_daq::protolog::queue::{DeliveryQueue, MAX_HISTORY};
use torque_daq::protolog::sink::ProtocolLog;
use torque_daq::protolog::tail::LogTailer;
use torque_daq::protolog::{TailedLine, TelegramDirection};

async fn recv_line(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<TailedLine>,
) -> TailedLine {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("tailer delivered in time")
        .expect("tailer channel open")
}

fn append(path: &std::path::Path, content: &str) {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open for append");
    file.write_all(content.as_bytes()).expect("append");
}

#[tokio::test]
async fn tailer_delivers_only_newly_appended_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("Log-Protocol-1.log");
    append(&log_path, "2025-03-01 12:00:00.000 [TX] historical\n");

    let missing = dir.path().join("not-created-yet");
    let mut tailer = LogTailer::new(vec![dir.path().to_path_buf(), missing]);
    let mut lines = tailer.start().await;

    // Give the tailer a moment to open the file (at its end).
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    append(&log_path, "2025-03-01 12:00:01.000 [RX] fresh data\n");

    let line = recv_line(&mut lines).await;
    assert!(line.raw.contains("fresh data"));
    let telegram = line.telegram.expect("classified");
    assert_eq!(telegram.direction, TelegramDirection::Rx);

    tailer.stop().await;
}

#[tokio::test]
async fn tailer_switches_to_the_newer_file_without_replay() {
    let dir = tempfile::tempdir().expect("tempdir");
    let staging = tempfile::tempdir().expect("staging dir");
    let old_path = dir.path().join("Log-Protocol-old.log");
    append(&old_path, "2025-03-01 12:00:00.000 [TX] old header\n");

    let mut tailer = LogTailer::new(vec![dir.path().to_path_buf()]);
    let mut lines = tailer.start().await;
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    append(&old_path, "2025-03-01 12:00:01.000 [TX] from old file\n");
    let line = recv_line(&mut lines).await;
    assert!(line.raw.contains("from old file"));

    // Rotate: a newer file appears, fully written before it becomes
    // visible in the scanned directory.
    let staged = staging.path().join("Log-Protocol-new.log");
    append(&staged, "2025-03-01 12:05:00.000 [TX] new file history\n");
    let new_path = dir.path().join("Log-Protocol-new.log");
    std::fs::rename(&staged, &new_path).expect("rename into scanned dir");

    // Wait for the switch, then append.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    append(&new_path, "2025-03-01 12:05:01.000 [RX] new file growth\n");

    let line = recv_line(&mut lines).await;
    assert!(
        line.raw.contains("new file growth"),
        "pre-switch content must not replay, got: {}",
        line.raw
    );

    tailer.stop().await;
    assert!(lines.try_recv().is_err(), "no extra replayed lines");
}

#[tokio::test]
async fn tailer_survives_nonexistent_directories() {
    let parent = tempfile::tempdir().expect("tempdir");
    let late_dir = parent.path().join("appears-later");

    let mut tailer = LogTailer::new(vec![late_dir.clone(), PathBuf::from("/no/such/dir")]);
    let mut lines = tailer.start().await;

    // Nothing exists yet; the tailer must keep scanning, not die.
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    std::fs::create_dir_all(&late_dir).expect("create dir");
    let log_path = late_dir.join("Log-Protocol-2.log");
    append(&log_path, "2025-03-01 12:00:00.000 [SYS] preexisting\n");
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    append(&log_path, "2025-03-01 12:00:01.000 [TX] appended later\n");
    loop {
        let line = recv_line(&mut lines).await;
        if line.raw.contains("appended later") {
            assert_eq!(
                line.telegram.expect("classified").direction,
                TelegramDirection::Tx
            );
            break;
        }
    }

    tailer.stop().await;
}

#[tokio::test]
async fn sink_feeds_queue_in_order_with_bounded_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sink = ProtocolLog::new(dir.path());
    let (queue, mut batches) = DeliveryQueue::new();
    let _forwarder = queue.attach(&sink);

    for n in 0..300 {
        sink.write("TX", &format!("telegram {n}"), None);
        // Stay well under the sink's broadcast capacity.
        if n % 100 == 0 {
            tokio::task::yield_now().await;
        }
    }

    let mut delivered = Vec::new();
    while delivered.len() < 300 {
        let batch = timeout(Duration::from_secs(10), batches.recv())
            .await
            .expect("batch in time")
            .expect("queue alive");
        delivered.extend(batch);
    }

    for (n, line) in delivered.iter().enumerate() {
        assert_eq!(line.text, format!("telegram {n}"));
    }
    assert!(queue.history().len() <= MAX_HISTORY);
}
