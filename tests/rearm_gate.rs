//! Integration tests for re-arm sequencing.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::timeout;
use torque_daq::config::Settings;
use torque_daq::device::mock::{MockHandle, MockTransducer};
use torque_daq::device::{DeviceEvent, ResultKind, TestResult};
use torque_daq::protolog::sink::ProtocolLog;
use torque_daq::session::SessionManager;

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

fn final_result(offset_ms: i64, torque: f64, angle: f64) -> TestResult {
    TestResult {
        kind: ResultKind::Final,
        torque,
        angle,
        timestamp: base_time() + chrono::Duration::milliseconds(offset_ms),
    }
}

fn partial_result(offset_ms: i64) -> TestResult {
    TestResult {
        kind: ResultKind::Partial,
        torque: 1.2,
        angle: 20.0,
        timestamp: base_time() + chrono::Duration::milliseconds(offset_ms),
    }
}

async fn connected_session() -> (SessionManager, MockHandle, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mock = MockTransducer::new();
    let handle = mock.handle();
    let mut session = SessionManager::new(
        Box::new(mock),
        &Settings::default(),
        ProtocolLog::new(dir.path()),
    );
    session.connect("10.0.0.5").await.expect("connect");
    wait_for_count(&handle, "request_information", 1).await;
    handle.clear_ops();
    (session, handle, dir)
}

async fn wait_for_count(handle: &MockHandle, op: &str, count: usize) {
    timeout(Duration::from_secs(60), async {
        while handle.count(op) < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {count}x {op}"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_rearm_requests_collapse_to_one_sequence() {
    let (_session, handle, _dir) = connected_session().await;

    // Three final results in quick succession; each one requests a re-arm,
    // but only the first wins the slot.
    handle.emit(DeviceEvent::TestResults(vec![final_result(0, 4.0, 90.0)]));
    handle.emit(DeviceEvent::TestResults(vec![final_result(
        10, 6.0, 120.0,
    )]));
    handle.emit(DeviceEvent::TestResults(vec![final_result(
        20, 8.0, 150.0,
    )]));

    wait_for_count(&handle, "start_read", 1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(handle.count("start_read"), 1, "dropped requests never queue");
    assert_eq!(handle.count("set_test_parameter"), 1);
}

#[tokio::test(start_paused = true)]
async fn each_completed_cycle_rearms_once_the_slot_is_free() {
    let (_session, handle, _dir) = connected_session().await;

    handle.emit(DeviceEvent::TestResults(vec![final_result(0, 4.0, 90.0)]));
    wait_for_count(&handle, "start_read", 1).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    handle.emit(DeviceEvent::TestResults(vec![final_result(
        5_000, 6.0, 120.0,
    )]));
    wait_for_count(&handle, "start_read", 2).await;
}

#[tokio::test(start_paused = true)]
async fn suppressed_duplicates_still_rearm() {
    let (session, handle, _dir) = connected_session().await;

    handle.emit(DeviceEvent::TestResults(vec![final_result(0, 4.0, 90.0)]));
    wait_for_count(&handle, "start_read", 1).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Same torque/angle 500ms later: suppressed by the deduplicator, but the
    // cycle still completed, so the device is re-armed.
    handle.emit(DeviceEvent::TestResults(vec![final_result(
        500, 4.01, 90.1,
    )]));
    wait_for_count(&handle, "start_read", 2).await;

    assert_eq!(session.results().len(), 1, "duplicate not in history");
}

#[tokio::test(start_paused = true)]
async fn untightening_counts_and_rearms() {
    let (session, handle, _dir) = connected_session().await;

    // A result batch without a final record is an untightening.
    handle.emit(DeviceEvent::TestResults(vec![partial_result(0)]));
    wait_for_count(&handle, "start_read", 1).await;

    assert_eq!(session.untightenings(), 1);
    assert!(session.results().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.emit(DeviceEvent::TestResults(vec![partial_result(3_000)]));
    wait_for_count(&handle, "start_read", 2).await;
    assert_eq!(session.untightenings(), 2);
}

#[tokio::test(start_paused = true)]
async fn accepted_results_land_in_bounded_history() {
    let (session, handle, _dir) = connected_session().await;

    handle.emit(DeviceEvent::TestResults(vec![final_result(0, 4.0, 90.0)]));
    // Far outside the duplicate window.
    handle.emit(DeviceEvent::TestResults(vec![final_result(
        10_000, 6.0, 120.0,
    )]));

    timeout(Duration::from_secs(30), async {
        while session.results().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both results accepted");

    let results = session.results();
    assert_eq!(results[0].torque, 4.0);
    assert_eq!(results[1].torque, 6.0);
}
