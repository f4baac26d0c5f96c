//! Batched delivery of protocol log notifications.
//!
//! The sink can produce entries far faster than a display consumer wants
//! them. The queue takes every notification, bounds memory with a hard cap
//! on pending entries (oldest dropped first), and hands the consumer batches
//! of bounded size. At most one delivery task exists at a time: an enqueue
//! schedules it only if it is not already scheduled, and the task keeps
//! running while the queue is non-empty, yielding between batches.

use super::LogLine;
use crate::protolog::sink::ProtocolLog;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Hard cap on undelivered entries.
pub const MAX_PENDING: usize = 20_000;
/// Entries delivered per batch.
pub const DELIVERY_BATCH: usize = 200;
/// Cap on the retained display history.
pub const MAX_HISTORY: usize = 2_000;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<LogLine>,
    history: VecDeque<LogLine>,
    scheduled: bool,
    dropped: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    batch_tx: mpsc::UnboundedSender<Vec<LogLine>>,
}

/// Producer/inspection handle for the delivery queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

impl DeliveryQueue {
    /// Creates the queue and the consumer end receiving delivered batches.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<LogLine>>) {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let queue = Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                batch_tx,
            }),
        };
        (queue, batch_rx)
    }

    /// Enqueues one entry, scheduling the delivery task if idle.
    pub fn enqueue(&self, line: LogLine) {
        let schedule = {
            let mut state = lock(&self.inner.state);
            state.pending.push_back(line);
            while state.pending.len() > MAX_PENDING {
                state.pending.pop_front();
                state.dropped += 1;
            }
            if state.scheduled {
                false
            } else {
                state.scheduled = true;
                true
            }
        };
        if schedule {
            let inner = self.inner.clone();
            tokio::spawn(deliver(inner));
        }
    }

    /// Forwards every sink notification into the queue. The task ends when
    /// the sink is dropped.
    pub fn attach(&self, sink: &ProtocolLog) -> JoinHandle<()> {
        let mut rx = sink.subscribe();
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(line) => queue.enqueue(line),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("log queue lagged behind sink by {n} notifications");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Snapshot of the delivered display history (most recent last).
    pub fn history(&self) -> Vec<LogLine> {
        lock(&self.inner.state).history.iter().cloned().collect()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    /// Entries discarded because the pending cap was exceeded.
    pub fn dropped(&self) -> u64 {
        lock(&self.inner.state).dropped
    }
}

async fn deliver(inner: Arc<QueueInner>) {
    loop {
        let batch = {
            let mut state = lock(&inner.state);
            if state.pending.is_empty() {
                // Clearing the flag under the same lock as the emptiness
                // check closes the race with a concurrent enqueue.
                state.scheduled = false;
                return;
            }
            let take = state.pending.len().min(DELIVERY_BATCH);
            let batch: Vec<LogLine> = state.pending.drain(..take).collect();
            for line in &batch {
                if state.history.len() >= MAX_HISTORY {
                    state.history.pop_front();
                }
                state.history.push_back(line.clone());
            }
            batch
        };
        // Consumer gone: keep draining so the pending cap still bounds
        // memory, but deliveries become no-ops.
        let _ = inner.batch_tx.send(batch);
        tokio::task::yield_now().await;
    }
}

fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn line(n: usize) -> LogLine {
        LogLine {
            timestamp: Local::now(),
            direction: "TX".to_string(),
            text: format!("entry {n}"),
            raw: None,
        }
    }

    async fn drain_until_idle(queue: &DeliveryQueue) {
        while queue.pending_len() > 0 {
            tokio::task::yield_now().await;
        }
        // One extra yield so the delivery task can clear its flag.
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn delivers_in_enqueue_order_in_batches() {
        let (queue, mut rx) = DeliveryQueue::new();
        for n in 0..450 {
            queue.enqueue(line(n));
        }
        drain_until_idle(&queue).await;

        let mut delivered = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            assert!(batch.len() <= DELIVERY_BATCH);
            delivered.extend(batch);
        }
        assert_eq!(delivered.len(), 450);
        for (n, entry) in delivered.iter().enumerate() {
            assert_eq!(entry.text, format!("entry {n}"));
        }
    }

    #[tokio::test]
    async fn history_never_exceeds_its_cap() {
        let (queue, mut rx) = DeliveryQueue::new();
        for n in 0..10_000 {
            queue.enqueue(line(n));
        }
        drain_until_idle(&queue).await;

        let history = queue.history();
        assert_eq!(history.len(), MAX_HISTORY);
        // The retained entries are the most recent ones.
        assert_eq!(
            history.last().map(|l| l.text.as_str()),
            Some("entry 9999")
        );
        assert_eq!(
            history.first().map(|l| l.text.as_str()),
            Some(format!("entry {}", 10_000 - MAX_HISTORY).as_str())
        );
        while rx.try_recv().is_ok() {}
    }

    #[tokio::test]
    async fn pending_cap_drops_oldest() {
        // No consumer polls here and the queue outpaces delivery easily, so
        // exercise the cap directly by enqueueing under a held runtime.
        let (queue, _rx) = DeliveryQueue::new();
        {
            // Pre-mark as scheduled so no delivery task drains during the
            // burst; this isolates the cap behavior.
            lock(&queue.inner.state).scheduled = true;
        }
        for n in 0..(MAX_PENDING + 500) {
            queue.enqueue(line(n));
        }
        assert_eq!(queue.pending_len(), MAX_PENDING);
        assert_eq!(queue.dropped(), 500);
        let state = lock(&queue.inner.state);
        assert_eq!(
            state.pending.front().map(|l| l.text.as_str()),
            Some("entry 500")
        );
    }

    #[tokio::test]
    async fn attach_forwards_sink_notifications() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = ProtocolLog::new(dir.path());
        let (queue, mut rx) = DeliveryQueue::new();
        let _forwarder = queue.attach(&sink);

        sink.write("TX", "forwarded", None);

        let batch = rx.recv().await.expect("batch");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].text, "forwarded");
    }
}
