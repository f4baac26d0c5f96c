//! Device error recovery.
//!
//! The transducer reports protocol problems as numbered error codes on the
//! event stream. Each code has its own counter and its own recovery policy;
//! counters are monotonic for the lifetime of a session and reset only when
//! a new session is created.
//!
//! | Code | Meaning            | Policy                                               |
//! |------|--------------------|------------------------------------------------------|
//! | 1    | CRC invalid        | full link restart on every 10th occurrence           |
//! | 2    | syntax invalid     | stop read, throttled warning                         |
//! | 3    | invalid command    | re-request device info; stop read once count >= 5    |
//! | 4    | device not ready   | staged retries (1s x attempt, max 5), then terminal  |
//! | *    | unknown            | log and surface status only                          |
//!
//! Classification and counter updates happen inline on the dispatcher loop
//! (cheap, one mutex); every actual recovery action runs on its own spawned
//! task so the event path never blocks. Occurrences of the same code are
//! counted in arrival order; actions for different codes may interleave.

use crate::acquisition::AcquisitionOrchestrator;
use crate::device::SharedLink;
use crate::error::AcqResult;
use crate::session::SessionShared;
use crate::status::StatusSink;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

/// A full link restart runs on every Nth CRC error.
pub const RESTART_EVERY: u32 = 10;
/// Invalid-command occurrences after which the read is also stopped.
pub const RESYNC_STOP_THRESHOLD: u32 = 5;
/// Maximum staged retries for "device not ready".
pub const MAX_NOT_READY_RETRIES: u32 = 5;
/// Backoff unit for not-ready retries; attempt n waits n times this.
pub const NOT_READY_BACKOFF_STEP: Duration = Duration::from_millis(1_000);
/// Pause between stopping and restarting the service in a full restart.
pub const RESTART_PAUSE: Duration = Duration::from_millis(200);

/// Classified device error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    CrcInvalid,
    SyntaxInvalid,
    InvalidCommand,
    NotReady,
    Unknown(i32),
}

impl ErrorCode {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => ErrorCode::CrcInvalid,
            2 => ErrorCode::SyntaxInvalid,
            3 => ErrorCode::InvalidCommand,
            4 => ErrorCode::NotReady,
            other => ErrorCode::Unknown(other),
        }
    }

    pub fn label(&self) -> String {
        match self {
            ErrorCode::CrcInvalid => "ER01".to_string(),
            ErrorCode::SyntaxInvalid => "ER02".to_string(),
            ErrorCode::InvalidCommand => "ER03".to_string(),
            ErrorCode::NotReady => "ER04".to_string(),
            ErrorCode::Unknown(raw) => format!("ER{raw:02}"),
        }
    }
}

/// Per-code occurrence counts for one session.
#[derive(Debug, Default, Clone)]
pub struct ErrorCounters {
    pub crc_invalid: u32,
    pub syntax_invalid: u32,
    pub invalid_command: u32,
    pub not_ready: u32,
    /// Staged retries consumed for not-ready recovery.
    pub not_ready_retries: u32,
    pub unknown: u32,
}

/// Executes the per-code recovery policies.
pub struct ErrorRecovery {
    link: SharedLink,
    orchestrator: Arc<AcquisitionOrchestrator>,
    shared: Arc<SessionShared>,
    status: Arc<StatusSink>,
    counters: Arc<Mutex<ErrorCounters>>,
}

impl ErrorRecovery {
    pub fn new(
        link: SharedLink,
        orchestrator: Arc<AcquisitionOrchestrator>,
        shared: Arc<SessionShared>,
        status: Arc<StatusSink>,
        counters: Arc<Mutex<ErrorCounters>>,
    ) -> Self {
        Self {
            link,
            orchestrator,
            shared,
            status,
            counters,
        }
    }

    /// Classifies one reported code, updates its counter, and spawns the
    /// recovery action the policy calls for. Returns quickly; the caller is
    /// the dispatcher loop.
    pub async fn handle(&self, raw: i32) {
        let code = ErrorCode::from_raw(raw);
        debug!("device error {} reported", code.label());

        match code {
            ErrorCode::CrcInvalid => {
                let count = {
                    let mut counters = self.counters.lock().await;
                    counters.crc_invalid += 1;
                    counters.crc_invalid
                };
                if count % RESTART_EVERY == 0 {
                    info!("CRC error count reached {count}; scheduling full restart");
                    let link = self.link.clone();
                    let status = self.status.clone();
                    tokio::spawn(full_restart(link, status));
                }
            }
            ErrorCode::SyntaxInvalid => {
                {
                    let mut counters = self.counters.lock().await;
                    counters.syntax_invalid += 1;
                }
                let link = self.link.clone();
                let status = self.status.clone();
                tokio::spawn(async move {
                    if let Err(e) = link.lock().await.stop_read().await {
                        warn!("stop read after syntax error failed: {e}");
                    }
                    status.warn_throttled(
                        "er02",
                        "Device rejected a telegram (invalid syntax); read stopped",
                    );
                });
            }
            ErrorCode::InvalidCommand => {
                let count = {
                    let mut counters = self.counters.lock().await;
                    counters.invalid_command += 1;
                    counters.invalid_command
                };
                let link = self.link.clone();
                let status = self.status.clone();
                tokio::spawn(async move {
                    // Re-requesting device information resynchronizes the
                    // command stream.
                    if let Err(e) = link.lock().await.request_information().await {
                        warn!("resync info request failed: {e}");
                    }
                    if count >= RESYNC_STOP_THRESHOLD {
                        if let Err(e) = link.lock().await.stop_read().await {
                            warn!("stop read after repeated invalid commands failed: {e}");
                        }
                        status.warn_throttled(
                            "er03",
                            "Device desynchronized repeatedly; read stopped",
                        );
                    }
                });
            }
            ErrorCode::NotReady => {
                let attempt = {
                    let mut counters = self.counters.lock().await;
                    counters.not_ready += 1;
                    if counters.not_ready_retries < MAX_NOT_READY_RETRIES {
                        counters.not_ready_retries += 1;
                        Some(counters.not_ready_retries)
                    } else {
                        None
                    }
                };
                match attempt {
                    Some(attempt) => {
                        let epoch = self.shared.epoch();
                        tokio::spawn(retry_not_ready(
                            self.link.clone(),
                            self.orchestrator.clone(),
                            self.shared.clone(),
                            attempt,
                            epoch,
                        ));
                    }
                    None => {
                        tokio::spawn(terminal_not_ready(
                            self.link.clone(),
                            self.shared.clone(),
                            self.status.clone(),
                        ));
                    }
                }
            }
            ErrorCode::Unknown(raw) => {
                {
                    let mut counters = self.counters.lock().await;
                    counters.unknown += 1;
                }
                warn!("unknown device error code {raw}");
                self.status
                    .set_status(format!("Device error {} reported", code.label()));
            }
        }
    }
}

/// Stop read + service, pause, then bring the link back up. Runs on every
/// Nth CRC error indefinitely; there is no exhaustion.
async fn full_restart(link: SharedLink, status: Arc<StatusSink>) {
    status.set_status("Recovering link after CRC errors...");
    let mut link = link.lock().await;
    if let Err(e) = link.stop_read().await {
        warn!("restart: stop read failed: {e}");
    }
    if let Err(e) = link.stop_service().await {
        warn!("restart: stop service failed: {e}");
    }
    sleep(RESTART_PAUSE).await;

    let result: AcqResult<()> = async {
        link.start_service().await?;
        link.start_communication().await?;
        link.request_information().await?;
        Ok(())
    }
    .await;
    match result {
        Ok(()) => info!("link restart complete"),
        Err(e) => {
            error!("link restart failed: {e}");
            status.set_status(format!("Restart failed: {e}"));
        }
    }
}

/// Staged not-ready retry: wait `attempt` backoff units, then re-request
/// info and re-run the init sequence. A retry whose session has been
/// replaced since scheduling drops itself.
async fn retry_not_ready(
    link: SharedLink,
    orchestrator: Arc<AcquisitionOrchestrator>,
    shared: Arc<SessionShared>,
    attempt: u32,
    epoch: u64,
) {
    sleep(NOT_READY_BACKOFF_STEP * attempt).await;
    if shared.epoch() != epoch {
        debug!("dropping stale not-ready retry (attempt {attempt})");
        return;
    }
    info!("not-ready retry {attempt}/{MAX_NOT_READY_RETRIES}");
    if let Err(e) = link.lock().await.request_information().await {
        warn!("retry {attempt}: info request failed: {e}");
    }
    let config = shared.config();
    if let Err(e) = orchestrator.run_init_sequence(&config).await {
        warn!("retry {attempt}: init sequence failed: {e}");
    }
}

/// Retries exhausted: stop reading and leave the session degraded until the
/// user reconnects.
async fn terminal_not_ready(link: SharedLink, shared: Arc<SessionShared>, status: Arc<StatusSink>) {
    if let Err(e) = link.lock().await.stop_read().await {
        warn!("terminal not-ready: stop read failed: {e}");
    }
    shared.mark_degraded();
    status.warn_throttled(
        "er04-terminal",
        "Device not ready; retries exhausted. Reconnect to resume acquisition.",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codes_classify() {
        assert_eq!(ErrorCode::from_raw(1), ErrorCode::CrcInvalid);
        assert_eq!(ErrorCode::from_raw(2), ErrorCode::SyntaxInvalid);
        assert_eq!(ErrorCode::from_raw(3), ErrorCode::InvalidCommand);
        assert_eq!(ErrorCode::from_raw(4), ErrorCode::NotReady);
        assert_eq!(ErrorCode::from_raw(99), ErrorCode::Unknown(99));
    }

    #[test]
    fn labels_match_device_nomenclature() {
        assert_eq!(ErrorCode::CrcInvalid.label(), "ER01");
        assert_eq!(ErrorCode::NotReady.label(), "ER04");
        assert_eq!(ErrorCode::Unknown(7).label(), "ER07");
    }
}
