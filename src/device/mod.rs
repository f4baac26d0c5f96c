//! The transducer link boundary.
//!
//! The byte-level wire protocol (framing, CRC, telegram layout) is owned by
//! the external transducer library; this crate talks to it through the
//! [`TransducerLink`] trait. Device notifications arrive as a closed set of
//! typed [`DeviceEvent`] variants on a broadcast channel and are consumed by
//! a single dispatcher loop, so no component ever runs inside the producer's
//! callback context.

pub mod mock;

use crate::config::AcquisitionConfig;
use crate::error::AcqResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Fixed telnet-style control port the transducer listens on.
pub const DEVICE_PORT: u16 = 23;

/// Host-side polling speed hint for the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcSpeed {
    Slow,
    Fast,
}

/// How many characteristic points the device streams per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharPoints {
    Few,
    Many,
}

/// Performance profile applied once per session, right after connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceProfile {
    pub speed: PcSpeed,
    pub char_points: CharPoints,
}

impl PerformanceProfile {
    /// The fixed profile every session uses. Conservative timing keeps slow
    /// firmware revisions from dropping telegrams.
    pub const FIRMWARE_SAFE: Self = Self {
        speed: PcSpeed::Slow,
        char_points: CharPoints::Many,
    };
}

/// A frame the device plans to send before checksumming, surfaced purely for
/// diagnostic logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFrame {
    pub text: String,
    pub raw: Vec<u8>,
}

/// Identity and calibration data reported by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub hard_id: String,
    pub scale: f64,
    pub limit: f64,
}

/// A transient torque/angle sample. Not retained; only the latest value is
/// published.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub torque: f64,
    pub angle: f64,
    pub timestamp: DateTime<Utc>,
}

/// Result-record kind marker. `Final` corresponds to the device's "FR"
/// record, which terminates one tightening cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    #[serde(rename = "FR")]
    Final,
    #[serde(rename = "PR")]
    Partial,
}

/// One entry of a test-result batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub kind: ResultKind,
    pub torque: f64,
    pub angle: f64,
    pub timestamp: DateTime<Utc>,
}

impl TestResult {
    pub fn is_final(&self) -> bool {
        self.kind == ResultKind::Final
    }
}

/// Typed device notifications delivered over the event channel.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Sample(Sample),
    TestResults(Vec<TestResult>),
    Info(DeviceInfo),
    Debug { state: String, error: String },
    Error(i32),
}

/// Receiver half of the device event stream.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Shared handle to the one link instance a session talks through. The mutex
/// serializes device commands; the InitRead sequence holds it for its whole
/// duration so recovery actions cannot interleave with configuration steps.
pub type SharedLink = Arc<tokio::sync::Mutex<Box<dyn TransducerLink>>>;

/// Session-level interface to the external transducer library.
///
/// Implementations own transport and framing. All operations are fallible
/// device round-trips except `set_performance` (a local mode switch) and
/// `subscribe` (channel plumbing).
#[async_trait]
pub trait TransducerLink: Send + Sync {
    /// Points the link at a device endpoint. No traffic flows until
    /// `start_service` / `start_communication`.
    async fn connect(&mut self, address: &str, port: u16) -> AcqResult<()>;

    fn set_performance(&mut self, profile: PerformanceProfile);

    async fn start_service(&mut self) -> AcqResult<()>;
    async fn stop_service(&mut self) -> AcqResult<()>;
    async fn start_communication(&mut self) -> AcqResult<()>;

    /// Asks the device to report identity/calibration; the answer arrives as
    /// a [`DeviceEvent::Info`] event. Also used by recovery to resynchronize
    /// the command stream.
    async fn request_information(&mut self) -> AcqResult<()>;

    async fn set_zero_torque(&mut self) -> AcqResult<()>;
    async fn set_zero_angle(&mut self) -> AcqResult<()>;
    async fn set_click_wrench(&mut self, angle1: f64, angle2: f64, angle3: f64) -> AcqResult<()>;
    async fn set_test_parameter(&mut self, config: &AcquisitionConfig) -> AcqResult<()>;

    async fn start_read(&mut self) -> AcqResult<()>;
    async fn stop_read(&mut self) -> AcqResult<()>;

    /// Frames the device would send for the current configuration, before
    /// checksumming. Diagnostic only; callers treat failure as non-fatal.
    async fn planned_frames(&mut self) -> AcqResult<Vec<PlannedFrame>>;

    /// Subscribes to the typed event stream.
    fn subscribe(&self) -> EventReceiver;
}
