//! Final-result deduplication.
//!
//! A single physical trigger can produce several device-level "final"
//! notifications in quick succession. A result is suppressed when a prior
//! accepted result exists and the new one falls inside the duplicate window
//! on all three axes: elapsed time, torque delta, and angle delta. The
//! baseline only moves on acceptance, so a burst of near-identical results
//! collapses to the first one.

use crate::device::TestResult;
use chrono::{DateTime, Utc};

/// Window after an accepted result inside which near-identical results are
/// considered duplicates.
pub const DUPLICATE_WINDOW_MS: i64 = 2_000;
/// Maximum torque delta for a duplicate, in torque units.
pub const TORQUE_TOLERANCE: f64 = 0.05;
/// Maximum angle delta for a duplicate, in angle units.
pub const ANGLE_TOLERANCE: f64 = 0.5;

/// Outcome of evaluating one final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Suppressed,
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    timestamp: DateTime<Utc>,
    torque: f64,
    angle: f64,
}

/// Stateful duplicate filter for one session.
#[derive(Debug, Default)]
pub struct ResultDeduplicator {
    last_accepted: Option<Baseline>,
}

impl ResultDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether `result` is a fresh measurement or an echo of the
    /// last accepted one. Accepting moves the baseline; suppressing leaves
    /// it untouched.
    pub fn evaluate(&mut self, result: &TestResult) -> Verdict {
        if let Some(baseline) = self.last_accepted {
            let elapsed_ms = result
                .timestamp
                .signed_duration_since(baseline.timestamp)
                .num_milliseconds();
            let duplicate = elapsed_ms <= DUPLICATE_WINDOW_MS
                && (result.torque - baseline.torque).abs() <= TORQUE_TOLERANCE
                && (result.angle - baseline.angle).abs() <= ANGLE_TOLERANCE;
            if duplicate {
                return Verdict::Suppressed;
            }
        }

        self.last_accepted = Some(Baseline {
            timestamp: result.timestamp,
            torque: result.torque,
            angle: result.angle,
        });
        Verdict::Accepted
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}
