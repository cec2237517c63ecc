//! FIFO buffer between relay streams and the ingest worker.
//!
//! Any number of producers push raw event JSON without touching storage.
//! Exactly one [`IngestDrain`] exists per queue; it is not `Clone`, so only
//! one task can ever pop and write into the store.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// One untrusted event as received from a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub raw: String,
    pub relay: String,
}

#[derive(Default)]
struct Shared {
    entries: Mutex<VecDeque<QueuedEvent>>,
    notify: Notify,
}

/// Producer side. Cheap to clone; `push` never blocks on persistence.
#[derive(Clone)]
pub struct IngestQueue {
    shared: Arc<Shared>,
}

/// Consumer side. There is exactly one per queue.
pub struct IngestDrain {
    shared: Arc<Shared>,
}

/// Create a queue and its single drain.
pub fn ingest_queue() -> (IngestQueue, IngestDrain) {
    let shared = Arc::new(Shared::default());
    (
        IngestQueue {
            shared: shared.clone(),
        },
        IngestDrain { shared },
    )
}

impl IngestQueue {
    pub fn push(&self, raw: impl Into<String>, relay: impl Into<String>) {
        self.shared.entries.lock().push_back(QueuedEvent {
            raw: raw.into(),
            relay: relay.into(),
        });
        self.shared.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IngestDrain {
    /// Remove and return up to `n` of the oldest entries.
    pub fn pop(&mut self, n: usize) -> Vec<QueuedEvent> {
        let mut entries = self.shared.entries.lock();
        let take = n.min(entries.len());
        entries.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least one entry is queued.
    pub async fn wait(&self) {
        loop {
            let notified = self.shared.notify.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
