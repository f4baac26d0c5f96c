//! Status publication and throttled user warnings.
//!
//! Components report significant events here instead of talking to any UI.
//! The latest status text is available on a `watch` channel; warnings go out
//! on a broadcast channel but are rate-limited per key so a misbehaving
//! device cannot flood the consumer.

use log::{info, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::time::{Duration, Instant};

/// Minimum interval between repeated warnings with the same key.
pub const WARNING_THROTTLE: Duration = Duration::from_secs(1);

const WARNING_CHANNEL_CAPACITY: usize = 64;

/// Fan-out point for status text and warnings.
pub struct StatusSink {
    status_tx: watch::Sender<String>,
    warning_tx: broadcast::Sender<String>,
    last_warning: Mutex<HashMap<String, Instant>>,
}

impl StatusSink {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(String::new());
        let (warning_tx, _) = broadcast::channel(WARNING_CHANNEL_CAPACITY);
        Self {
            status_tx,
            warning_tx,
            last_warning: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the current status text.
    pub fn set_status(&self, text: impl Into<String>) {
        let text = text.into();
        info!("status: {text}");
        self.status_tx.send_replace(text);
    }

    /// Emits a warning unless one with the same key went out within
    /// [`WARNING_THROTTLE`]. Returns whether the warning was delivered.
    pub fn warn_throttled(&self, key: &str, text: &str) -> bool {
        let now = Instant::now();
        {
            let mut last = match self.last_warning.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(&prev) = last.get(key) {
                if now.duration_since(prev) < WARNING_THROTTLE {
                    return false;
                }
            }
            last.insert(key.to_string(), now);
        }
        warn!("{text}");
        let _ = self.warning_tx.send(text.to_string());
        true
    }

    pub fn current_status(&self) -> String {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<String> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_warnings(&self) -> broadcast::Receiver<String> {
        self.warning_tx.subscribe()
    }
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new()
    }
}
