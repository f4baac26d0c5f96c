//! Mock transducer link.
//!
//! Simulates the external transducer library for tests and the demo binary,
//! without any physical hardware. Every operation is recorded with a
//! timestamp so tests can assert on call order and timing; a [`MockHandle`]
//! lets tests inject device events and configure operations to fail.
//!
//! In simulated mode (`MockTransducer::simulated`), `start_read` spawns a
//! task that produces a torque ramp and a final result, roughly what one
//! tightening cycle looks like on the wire.

use super::{
    DeviceEvent, DeviceInfo, EventReceiver, PerformanceProfile, PlannedFrame, ResultKind, Sample,
    TestResult, TransducerLink,
};
use crate::config::AcquisitionConfig;
use crate::error::{AcqResult, DaqError};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One recorded link operation.
#[derive(Debug, Clone)]
pub struct RecordedOp {
    pub name: &'static str,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    ops: Vec<RecordedOp>,
    failing: HashSet<&'static str>,
}

/// Test/demo double for the external transducer library.
pub struct MockTransducer {
    state: Arc<Mutex<MockState>>,
    event_tx: broadcast::Sender<DeviceEvent>,
    reading: Arc<AtomicBool>,
    simulate: bool,
    sim_task: Option<JoinHandle<()>>,
}

/// Cloneable handle for driving and inspecting a boxed [`MockTransducer`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    event_tx: broadcast::Sender<DeviceEvent>,
}

impl MockHandle {
    /// Injects a device event as if the hardware had produced it.
    pub fn emit(&self, event: DeviceEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Names of all operations recorded so far, in call order.
    pub fn ops(&self) -> Vec<&'static str> {
        self.lock_state().ops.iter().map(|op| op.name).collect()
    }

    /// Recorded operations with their timestamps.
    pub fn recorded(&self) -> Vec<RecordedOp> {
        self.lock_state().ops.clone()
    }

    /// Number of times `name` was called.
    pub fn count(&self, name: &str) -> usize {
        self.lock_state()
            .ops
            .iter()
            .filter(|op| op.name == name)
            .count()
    }

    /// Makes every future call of `name` fail with a device error.
    pub fn fail_on(&self, name: &'static str) {
        self.lock_state().failing.insert(name);
    }

    /// Clears a failure injection.
    pub fn recover(&self, name: &'static str) {
        self.lock_state().failing.remove(name);
    }

    pub fn clear_ops(&self) {
        self.lock_state().ops.clear();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MockTransducer {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            event_tx,
            reading: Arc::new(AtomicBool::new(false)),
            simulate: false,
            sim_task: None,
        }
    }

    /// A mock that generates one simulated tightening cycle per `start_read`.
    pub fn simulated() -> Self {
        Self {
            simulate: true,
            ..Self::new()
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    fn record(&self, name: &'static str) -> AcqResult<()> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.ops.push(RecordedOp {
            name,
            at: Instant::now(),
        });
        if state.failing.contains(name) {
            return Err(DaqError::Device(format!("mock failure injected on {name}")));
        }
        Ok(())
    }

    fn spawn_cycle(&mut self) {
        if let Some(task) = self.sim_task.take() {
            task.abort();
        }
        let tx = self.event_tx.clone();
        let reading = self.reading.clone();
        self.sim_task = Some(tokio::spawn(async move {
            let mut rng = rand::rngs::OsRng;
            let target: f64 = 4.0 + rng.gen_range(-0.5..0.5);
            let mut torque = 0.0;
            let mut angle = 0.0;
            while torque < target {
                if !reading.load(Ordering::SeqCst) {
                    return;
                }
                torque += target / 12.0;
                angle += rng.gen_range(2.0..6.0);
                let _ = tx.send(DeviceEvent::Sample(Sample {
                    torque,
                    angle,
                    timestamp: Utc::now(),
                }));
                sleep(Duration::from_millis(50)).await;
            }
            let _ = tx.send(DeviceEvent::TestResults(vec![
                TestResult {
                    kind: ResultKind::Partial,
                    torque: torque * 0.9,
                    angle: angle * 0.9,
                    timestamp: Utc::now(),
                },
                TestResult {
                    kind: ResultKind::Final,
                    torque,
                    angle,
                    timestamp: Utc::now(),
                },
            ]));
        }));
    }
}

impl Default for MockTransducer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransducerLink for MockTransducer {
    async fn connect(&mut self, _address: &str, _port: u16) -> AcqResult<()> {
        self.record("connect")
    }

    fn set_performance(&mut self, _profile: PerformanceProfile) {
        let _ = self.record("set_performance");
    }

    async fn start_service(&mut self) -> AcqResult<()> {
        self.record("start_service")
    }

    async fn stop_service(&mut self) -> AcqResult<()> {
        self.reading.store(false, Ordering::SeqCst);
        self.record("stop_service")
    }

    async fn start_communication(&mut self) -> AcqResult<()> {
        self.record("start_communication")
    }

    async fn request_information(&mut self) -> AcqResult<()> {
        self.record("request_information")?;
        if self.simulate {
            let _ = self.event_tx.send(DeviceEvent::Info(DeviceInfo {
                hard_id: "PHX-MOCK-01".to_string(),
                scale: 1.0,
                limit: 10.0,
            }));
        }
        Ok(())
    }

    async fn set_zero_torque(&mut self) -> AcqResult<()> {
        self.record("set_zero_torque")
    }

    async fn set_zero_angle(&mut self) -> AcqResult<()> {
        self.record("set_zero_angle")
    }

    async fn set_click_wrench(&mut self, _a1: f64, _a2: f64, _a3: f64) -> AcqResult<()> {
        self.record("set_click_wrench")
    }

    async fn set_test_parameter(&mut self, _config: &AcquisitionConfig) -> AcqResult<()> {
        self.record("set_test_parameter")
    }

    async fn start_read(&mut self) -> AcqResult<()> {
        self.record("start_read")?;
        self.reading.store(true, Ordering::SeqCst);
        if self.simulate {
            self.spawn_cycle();
        }
        Ok(())
    }

    async fn stop_read(&mut self) -> AcqResult<()> {
        self.reading.store(false, Ordering::SeqCst);
        self.record("stop_read")
    }

    async fn planned_frames(&mut self) -> AcqResult<Vec<PlannedFrame>> {
        self.record("planned_frames")?;
        Ok(vec![
            PlannedFrame {
                text: "SET ZERO TORQUE".to_string(),
                raw: vec![0x02, 0x5A, 0x54, 0x03],
            },
            PlannedFrame {
                text: "SET ZERO ANGLE".to_string(),
                raw: vec![0x02, 0x5A, 0x41, 0x03],
            },
        ])
    }

    fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }
}
