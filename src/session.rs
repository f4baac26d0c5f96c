//! Session management for the acquisition application.
//!
//! A session is one connected transducer instance together with its
//! configuration snapshot and lifecycle state. The [`SessionManager`] owns
//! the only active session: connecting tears the previous one down first,
//! and every per-session resource (error counters, dedup state, result
//! history, the dispatcher task) is rebuilt on each connect.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                      |             |
//!                      +--> Degraded <+   (not-ready retries exhausted)
//! ```
//!
//! `Connecting -> Connected` happens on the first `DeviceInfo` event; the
//! service-start calls completing without error is not, by itself, proof the
//! device is alive. `Degraded` is terminal until the user reconnects.
//!
//! Teardown never fails from the caller's viewpoint: stop errors during
//! disconnect are logged and swallowed.

use crate::config::{AcquisitionConfig, Settings};
use crate::device::{
    DeviceInfo, PerformanceProfile, Sample, SharedLink, TestResult, TransducerLink, DEVICE_PORT,
};
use crate::dispatch::{spawn_dispatcher, DispatchContext};
use crate::error::{AcqResult, DaqError};
use crate::protolog::sink::ProtocolLog;
use crate::acquisition::AcquisitionOrchestrator;
use crate::rearm::RearmController;
use crate::recovery::{ErrorCounters, ErrorRecovery};
use crate::status::StatusSink;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Lifecycle state of the device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Not-ready retries exhausted; manual reconnect required.
    Degraded,
}

/// Session state shared with background tasks (recovery, re-arm, dispatch).
pub struct SessionShared {
    epoch: AtomicU64,
    state_tx: watch::Sender<SessionState>,
    config: StdMutex<AcquisitionConfig>,
    info: StdMutex<Option<DeviceInfo>>,
}

impl SessionShared {
    pub fn new(config: AcquisitionConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            epoch: AtomicU64::new(0),
            state_tx,
            config: StdMutex::new(config),
            info: StdMutex::new(None),
        }
    }

    /// Identifies the current session; scheduled work captures this and
    /// drops itself if the session was replaced in the meantime.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    /// Connected is only reached from Connecting; a Degraded session stays
    /// degraded even if a late info event arrives.
    pub(crate) fn mark_connected(&self) {
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Connected;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn mark_degraded(&self) {
        self.set_state(SessionState::Degraded);
    }

    /// Snapshot of the acquisition parameters for the next sequence run.
    pub fn config(&self) -> AcquisitionConfig {
        lock_std(&self.config).clone()
    }

    pub fn set_config(&self, config: AcquisitionConfig) {
        *lock_std(&self.config) = config.sanitized();
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        lock_std(&self.info).clone()
    }

    pub(crate) fn set_info(&self, info: DeviceInfo) {
        *lock_std(&self.info) = Some(info);
    }
}

fn lock_std<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Owns the single active device session and its lifecycle.
pub struct SessionManager {
    link: SharedLink,
    shared: Arc<SessionShared>,
    status: Arc<StatusSink>,
    orchestrator: Arc<AcquisitionOrchestrator>,
    recovery: Arc<ErrorRecovery>,
    rearm: Arc<RearmController>,
    counters: Arc<Mutex<ErrorCounters>>,
    history: Arc<StdMutex<VecDeque<TestResult>>>,
    latest_sample: watch::Sender<Option<Sample>>,
    dispatcher: Option<JoinHandle<()>>,
    startup: Option<JoinHandle<()>>,
    address: Option<String>,
}

impl SessionManager {
    pub fn new(link: Box<dyn TransducerLink>, settings: &Settings, protolog: ProtocolLog) -> Self {
        let link: SharedLink = Arc::new(Mutex::new(link));
        let status = Arc::new(StatusSink::new());
        let shared = Arc::new(SessionShared::new(settings.acquisition.clone().sanitized()));
        let orchestrator = Arc::new(AcquisitionOrchestrator::new(
            link.clone(),
            protolog,
            status.clone(),
        ));
        let counters = Arc::new(Mutex::new(ErrorCounters::default()));
        let rearm = Arc::new(RearmController::new(
            orchestrator.clone(),
            shared.clone(),
            status.clone(),
        ));
        let recovery = Arc::new(ErrorRecovery::new(
            link.clone(),
            orchestrator.clone(),
            shared.clone(),
            status.clone(),
            counters.clone(),
        ));
        let (latest_sample, _) = watch::channel(None);

        Self {
            link,
            shared,
            status,
            orchestrator,
            recovery,
            rearm,
            counters,
            history: Arc::new(StdMutex::new(VecDeque::new())),
            latest_sample,
            dispatcher: None,
            startup: None,
            address: None,
        }
    }

    /// Connects to the device at `address`, replacing any existing session.
    ///
    /// The previous session is torn down synchronously first; its teardown
    /// failures are logged, never propagated. Service startup continues in
    /// the background: a failure there leaves the session in `Connecting`
    /// with a status message, and no automatic retry happens.
    pub async fn connect(&mut self, address: &str) -> AcqResult<()> {
        self.teardown().await;

        *self.counters.lock().await = ErrorCounters::default();
        self.rearm.reset();
        lock_std(&self.history).clear();
        self.latest_sample.send_replace(None);
        self.shared.next_epoch();
        self.shared.set_state(SessionState::Connecting);
        self.status.set_status(format!("Connecting to {address}..."));
        self.address = Some(address.to_string());

        // Subscribe before any traffic flows so the dispatcher sees every
        // event, the info reply included.
        let events = self.link.lock().await.subscribe();
        self.dispatcher = Some(spawn_dispatcher(
            events,
            DispatchContext {
                shared: self.shared.clone(),
                recovery: self.recovery.clone(),
                rearm: self.rearm.clone(),
                status: self.status.clone(),
                latest_sample: self.latest_sample.clone(),
                history: self.history.clone(),
            },
        ));

        {
            let mut link = self.link.lock().await;
            link.set_performance(PerformanceProfile::FIRMWARE_SAFE);
            if let Err(e) = link.connect(address, DEVICE_PORT).await {
                error!("connect to {address} failed: {e}");
                self.status.set_status(format!("Connect error: {e}"));
                return Err(e);
            }
        }

        let link = self.link.clone();
        let status = self.status.clone();
        self.startup = Some(tokio::spawn(async move {
            let result: AcqResult<()> = async {
                let mut link = link.lock().await;
                link.start_service()
                    .await
                    .map_err(|e| DaqError::Connection(e.to_string()))?;
                link.start_communication()
                    .await
                    .map_err(|e| DaqError::Connection(e.to_string()))?;
                link.request_information()
                    .await
                    .map_err(|e| DaqError::Connection(e.to_string()))?;
                Ok(())
            }
            .await;
            match result {
                Ok(()) => status.set_status("Service started, awaiting device information"),
                Err(e) => {
                    error!("service startup failed: {e}");
                    status.set_status(format!("Connect error: {e}"));
                }
            }
        }));

        Ok(())
    }

    /// Disconnects the current session. Always succeeds; stop failures are
    /// logged and swallowed.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        self.address = None;
        self.shared.set_state(SessionState::Disconnected);
        self.status.set_status("Disconnected");
    }

    async fn teardown(&mut self) {
        if let Some(startup) = self.startup.take() {
            startup.abort();
        }
        if self.dispatcher.is_some() {
            let mut link = self.link.lock().await;
            if let Err(e) = link.stop_read().await {
                warn!("stop read during teardown failed: {e}");
            }
            if let Err(e) = link.stop_service().await {
                warn!("stop service during teardown failed: {e}");
            }
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }

    /// Runs the full InitRead sequence with the current config snapshot.
    pub async fn run_init_sequence(&self) -> AcqResult<()> {
        self.ensure_active()?;
        self.orchestrator
            .run_init_sequence(&self.shared.config())
            .await
    }

    /// Starts reading without reconfiguring the device.
    pub async fn start_read(&self) -> AcqResult<()> {
        self.ensure_active()?;
        self.orchestrator.start_read().await
    }

    pub async fn stop_read(&self) -> AcqResult<()> {
        self.ensure_active()?;
        self.orchestrator.stop_read().await
    }

    fn ensure_active(&self) -> AcqResult<()> {
        match self.shared.state() {
            SessionState::Connecting | SessionState::Connected => Ok(()),
            SessionState::Disconnected | SessionState::Degraded => Err(DaqError::NotConnected),
        }
    }

    /// Replaces the acquisition parameters used by future sequence runs.
    pub fn update_config(&self, config: AcquisitionConfig) {
        self.shared.set_config(config);
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.subscribe_state()
    }

    pub fn subscribe_samples(&self) -> watch::Receiver<Option<Sample>> {
        self.latest_sample.subscribe()
    }

    pub fn status_sink(&self) -> Arc<StatusSink> {
        self.status.clone()
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.shared.device_info()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Accepted results, oldest first.
    pub fn results(&self) -> Vec<TestResult> {
        lock_std(&self.history).iter().cloned().collect()
    }

    pub fn untightenings(&self) -> u32 {
        self.rearm.untightenings()
    }

    /// Snapshot of the per-session error counters.
    pub async fn error_counters(&self) -> ErrorCounters {
        self.counters.lock().await.clone()
    }

    /// Tears the session down for application exit.
    pub async fn shutdown(&mut self) {
        self.disconnect().await;
    }
}
