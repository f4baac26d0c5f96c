//! Re-arm sequencing between measurement cycles.
//!
//! After every completed cycle (a final result, accepted or suppressed, or
//! an untightening) the acquisition sequence must run again so the device is
//! ready for the next trigger. Requests race in from the dispatcher faster
//! than a sequence can run; a single-permit semaphore with a non-blocking
//! acquire makes re-arming single-flight. A request that loses the race is
//! dropped, not queued: the sequence about to run will arm the device anyway.

use crate::acquisition::AcquisitionOrchestrator;
use crate::session::SessionShared;
use crate::status::StatusSink;
use log::{debug, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};

/// Wait between a completed cycle and the next init sequence.
pub const REARM_COOLDOWN: Duration = Duration::from_millis(800);

/// Single-flight gate around re-running the init sequence.
pub struct RearmController {
    orchestrator: Arc<AcquisitionOrchestrator>,
    shared: Arc<SessionShared>,
    status: Arc<StatusSink>,
    slot: Arc<Semaphore>,
    untightenings: AtomicU32,
}

impl RearmController {
    pub fn new(
        orchestrator: Arc<AcquisitionOrchestrator>,
        shared: Arc<SessionShared>,
        status: Arc<StatusSink>,
    ) -> Self {
        Self {
            orchestrator,
            shared,
            status,
            slot: Arc::new(Semaphore::new(1)),
            untightenings: AtomicU32::new(0),
        }
    }

    /// Requests a re-arm. Returns false when one is already in flight (the
    /// request is dropped).
    pub fn request_rearm(&self) -> bool {
        let permit = match Arc::clone(&self.slot).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!("re-arm already in flight; request dropped");
                return false;
            }
        };

        let orchestrator = self.orchestrator.clone();
        let shared = self.shared.clone();
        let status = self.status.clone();
        let epoch = self.shared.epoch();
        tokio::spawn(async move {
            sleep(REARM_COOLDOWN).await;
            if shared.epoch() != epoch {
                debug!("dropping stale re-arm for a replaced session");
                drop(permit);
                return;
            }
            let config = shared.config();
            if let Err(e) = orchestrator.run_init_sequence(&config).await {
                warn!("re-arm init sequence failed: {e}");
                status.set_status(format!("Re-arm failed: {e}"));
            }
            drop(permit);
        });
        true
    }

    /// Forgets per-session state; called when a new session is created.
    pub fn reset(&self) {
        self.untightenings.store(0, Ordering::SeqCst);
    }

    /// Records a test-result batch that ended without a final result.
    pub fn note_untightening(&self) -> u32 {
        self.untightenings.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn untightenings(&self) -> u32 {
        self.untightenings.load(Ordering::SeqCst)
    }
}
