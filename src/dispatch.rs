//! The device event dispatcher.
//!
//! One loop per session consumes the typed event stream and routes each
//! variant to the component that reacts to it. Long-running reactions
//! (recovery actions, re-arm sequences) are spawned onto their own tasks;
//! the loop itself only classifies, so the producer side of the channel is
//! never blocked by recovery work.

use crate::dedup::{ResultDeduplicator, Verdict};
use crate::device::{DeviceEvent, EventReceiver, Sample, TestResult};
use crate::recovery::ErrorRecovery;
use crate::rearm::RearmController;
use crate::session::SessionShared;
use crate::status::StatusSink;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cap on retained accepted results.
pub const MAX_RESULT_HISTORY: usize = 256;

/// Everything the dispatcher loop needs, cloned out of the session manager.
pub(crate) struct DispatchContext {
    pub shared: Arc<SessionShared>,
    pub recovery: Arc<ErrorRecovery>,
    pub rearm: Arc<RearmController>,
    pub status: Arc<StatusSink>,
    pub latest_sample: watch::Sender<Option<Sample>>,
    pub history: Arc<Mutex<VecDeque<TestResult>>>,
}

pub(crate) fn spawn_dispatcher(mut events: EventReceiver, ctx: DispatchContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Deduplication state lives and dies with the session's dispatcher.
        let mut dedup = ResultDeduplicator::new();
        loop {
            match events.recv().await {
                Ok(event) => handle_event(event, &ctx, &mut dedup).await,
                Err(RecvError::Lagged(n)) => {
                    warn!("dispatcher lagged; {n} device events were missed");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_event(event: DeviceEvent, ctx: &DispatchContext, dedup: &mut ResultDeduplicator) {
    match event {
        DeviceEvent::Sample(sample) => {
            ctx.latest_sample.send_replace(Some(sample));
        }
        DeviceEvent::TestResults(results) => match results.iter().find(|r| r.is_final()) {
            Some(final_result) => {
                match dedup.evaluate(final_result) {
                    Verdict::Accepted => {
                        push_history(&ctx.history, final_result.clone());
                        ctx.status.set_status(format!(
                            "Final result: {:.2} Nm @ {:.1} deg",
                            final_result.torque, final_result.angle
                        ));
                    }
                    Verdict::Suppressed => {
                        debug!(
                            "duplicate final result suppressed ({:.2} Nm)",
                            final_result.torque
                        );
                    }
                }
                // Re-arm after every evaluation, suppressed or not.
                ctx.rearm.request_rearm();
            }
            None => {
                let count = ctx.rearm.note_untightening();
                ctx.status
                    .set_status(format!("Untightening detected ({count})"));
                ctx.rearm.request_rearm();
            }
        },
        DeviceEvent::Info(info) => {
            debug!("device info received: {}", info.hard_id);
            ctx.status
                .set_status(format!("Device info received: {}", info.hard_id));
            ctx.shared.set_info(info);
            ctx.shared.mark_connected();
        }
        DeviceEvent::Debug { state, error } => {
            debug!("device debug: state={state} error={error}");
        }
        DeviceEvent::Error(code) => {
            ctx.recovery.handle(code).await;
        }
    }
}

fn push_history(history: &Mutex<VecDeque<TestResult>>, result: TestResult) {
    let mut history = match history.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if history.len() >= MAX_RESULT_HISTORY {
        history.pop_front();
    }
    history.push_back(result);
}
