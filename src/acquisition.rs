//! The scripted device-configuration sequence (InitRead).
//!
//! The transducer firmware needs settle time after each configuration
//! command; the delays below reflect its timing requirements and are part of
//! the device contract, not tuning knobs. The sequence holds the link lock
//! for its whole duration so no other command can interleave with it.

use crate::config::AcquisitionConfig;
use crate::device::SharedLink;
use crate::error::AcqResult;
use crate::protolog::sink::ProtocolLog;
use crate::status::StatusSink;
use log::{debug, error};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Settle after zeroing the torque reference.
pub const ZERO_TORQUE_SETTLE: Duration = Duration::from_millis(10);
/// Settle after zeroing the angle reference.
pub const ZERO_ANGLE_SETTLE: Duration = Duration::from_millis(10);
/// Settle after programming the click-wrench angles.
pub const CLICK_WRENCH_SETTLE: Duration = Duration::from_millis(10);
/// Settle after applying the full test configuration.
pub const TEST_PARAMETER_SETTLE: Duration = Duration::from_millis(100);

/// Runs the InitRead sequence and the standalone read operations.
pub struct AcquisitionOrchestrator {
    link: SharedLink,
    protolog: ProtocolLog,
    status: Arc<StatusSink>,
}

impl AcquisitionOrchestrator {
    pub fn new(link: SharedLink, protolog: ProtocolLog, status: Arc<StatusSink>) -> Self {
        Self {
            link,
            protolog,
            status,
        }
    }

    /// Zero references -> click-wrench -> test parameters -> start read,
    /// each followed by its settle delay.
    ///
    /// A failing step aborts the remainder; already-applied steps stay
    /// applied. Retries, if any, are driven by error recovery or re-arm, not
    /// here.
    pub async fn run_init_sequence(&self, config: &AcquisitionConfig) -> AcqResult<()> {
        self.log_planned_frames().await;

        let mut link = self.link.lock().await;
        let result: AcqResult<()> = async {
            link.set_zero_torque()
                .await
                .map_err(|e| e.at_step("zero torque"))?;
            sleep(ZERO_TORQUE_SETTLE).await;

            link.set_zero_angle()
                .await
                .map_err(|e| e.at_step("zero angle"))?;
            sleep(ZERO_ANGLE_SETTLE).await;

            let cw = config.click_wrench;
            link.set_click_wrench(cw.angle1, cw.angle2, cw.angle3)
                .await
                .map_err(|e| e.at_step("click wrench"))?;
            sleep(CLICK_WRENCH_SETTLE).await;

            link.set_test_parameter(config)
                .await
                .map_err(|e| e.at_step("test parameters"))?;
            sleep(TEST_PARAMETER_SETTLE).await;

            link.start_read().await.map_err(|e| e.at_step("start read"))
        }
        .await;

        if let Err(e) = &result {
            error!("init sequence aborted: {e}");
            self.status.set_status(format!("Read error: {e}"));
        } else {
            debug!("init sequence complete, read armed");
        }
        result
    }

    /// Starts reading without reconfiguring.
    pub async fn start_read(&self) -> AcqResult<()> {
        self.link.lock().await.start_read().await
    }

    /// Stops the current read cycle.
    pub async fn stop_read(&self) -> AcqResult<()> {
        self.link.lock().await.stop_read().await
    }

    /// Writes the device's planned pre-checksum frames to the protocol log.
    /// Purely diagnostic; unavailability is not an error.
    async fn log_planned_frames(&self) {
        let frames = self.link.lock().await.planned_frames().await;
        match frames {
            Ok(frames) => {
                for frame in frames {
                    self.protolog
                        .write("TX (pre-CRC)", &frame.text, Some(&frame.raw));
                }
            }
            Err(e) => debug!("planned frames unavailable: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockTransducer;
    use crate::device::TransducerLink;
    use tokio::sync::Mutex;

    fn orchestrator_with_mock() -> (
        AcquisitionOrchestrator,
        crate::device::mock::MockHandle,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mock = MockTransducer::new();
        let handle = mock.handle();
        let link: SharedLink = Arc::new(Mutex::new(Box::new(mock) as Box<dyn TransducerLink>));
        let protolog = ProtocolLog::new(dir.path());
        let orchestrator = AcquisitionOrchestrator::new(link, protolog, Arc::new(StatusSink::new()));
        (orchestrator, handle, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn init_sequence_runs_steps_in_order() {
        let (orchestrator, handle, _dir) = orchestrator_with_mock();
        orchestrator
            .run_init_sequence(&AcquisitionConfig::default())
            .await
            .expect("sequence");
        assert_eq!(
            handle.ops(),
            vec![
                "planned_frames",
                "set_zero_torque",
                "set_zero_angle",
                "set_click_wrench",
                "set_test_parameter",
                "start_read",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn step_failure_aborts_the_remainder() {
        let (orchestrator, handle, _dir) = orchestrator_with_mock();
        handle.fail_on("set_click_wrench");
        let err = orchestrator
            .run_init_sequence(&AcquisitionConfig::default())
            .await
            .expect_err("sequence should fail");
        assert!(err.to_string().contains("click wrench"));
        assert_eq!(handle.count("set_test_parameter"), 0);
        assert_eq!(handle.count("start_read"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn planned_frame_failure_is_not_fatal() {
        let (orchestrator, handle, _dir) = orchestrator_with_mock();
        handle.fail_on("planned_frames");
        orchestrator
            .run_init_sequence(&AcquisitionConfig::default())
            .await
            .expect("sequence survives missing frames");
        assert_eq!(handle.count("start_read"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delays_separate_the_steps() {
        let (orchestrator, handle, _dir) = orchestrator_with_mock();
        orchestrator
            .run_init_sequence(&AcquisitionConfig::default())
            .await
            .expect("sequence");
        let recorded = handle.recorded();
        let by_name = |name: &str| {
            recorded
                .iter()
                .find(|op| op.name == name)
                .map(|op| op.at)
                .expect("op recorded")
        };
        let config_to_start = by_name("start_read") - by_name("set_test_parameter");
        assert!(config_to_start >= TEST_PARAMETER_SETTLE);
    }
}
