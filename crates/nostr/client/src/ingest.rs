//! The single writer between the ingest queue and the store.

use crate::config::IngestConfig;
use crate::error::ClientError;
use crate::graph::SocialGraph;
use crate::queue::{IngestDrain, QueuedEvent};
use crate::store::{EventStore, SaveOutcome};
use nostr::{Event, KIND_MUTE_LIST, MuteList, decode_event, verify_event};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

/// Outcome counts for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Newly stored or hydrated events
    pub saved: usize,
    /// Events already stored
    pub duplicates: usize,
    /// Malformed, forged or expired events
    pub rejected: usize,
    /// Valid events the store failed to write
    pub failed: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.saved + self.duplicates + self.rejected + self.failed
    }
}

/// Drains the ingest queue: decode, verify, then persist.
///
/// Owns the queue's only [`IngestDrain`], so store writes from relay input are
/// never interleaved.
pub struct IngestWorker {
    drain: IngestDrain,
    store: Arc<EventStore>,
    graph: SocialGraph,
    batch_size: usize,
    local_pubkey: Option<String>,
    events_tx: broadcast::Sender<Event>,
}

impl IngestWorker {
    pub fn new(
        drain: IngestDrain,
        store: Arc<EventStore>,
        graph: SocialGraph,
        config: &IngestConfig,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(1000);
        Self {
            drain,
            store,
            graph,
            batch_size: config.batch_size.max(1),
            local_pubkey: None,
            events_tx,
        }
    }

    /// Apply mute lists published by `pubkey` from other sessions.
    pub fn with_local_user(mut self, pubkey: impl Into<String>) -> Self {
        self.local_pubkey = Some(pubkey.into());
        self
    }

    /// Receive every newly stored event.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// Process up to one batch of queued events.
    pub fn process_batch(&mut self) -> BatchReport {
        let mut report = BatchReport::default();
        for queued in self.drain.pop(self.batch_size) {
            self.process(queued, &mut report);
        }
        if report.total() > 0 {
            debug!(
                saved = report.saved,
                duplicates = report.duplicates,
                rejected = report.rejected,
                failed = report.failed,
                "processed ingest batch"
            );
        }
        report
    }

    /// Drain until `shutdown` fires, waiting while the queue is empty.
    ///
    /// Batches run on the blocking pool; SQLite calls never stall the async
    /// runtime.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        info!("ingest worker started");
        let mut worker = self;
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = worker.drain.wait() => {}
            }
            worker = match tokio::task::spawn_blocking(move || {
                worker.process_batch();
                worker
            })
            .await
            {
                Ok(worker) => worker,
                Err(e) => {
                    error!("ingest batch panicked: {}", e);
                    return;
                }
            };
        }
        info!(pending = worker.drain.len(), "ingest worker stopped");
    }

    fn process(&self, queued: QueuedEvent, report: &mut BatchReport) {
        let event = match decode_event(queued.raw.as_bytes()).and_then(|event| {
            verify_event(&event)?;
            Ok(event)
        }) {
            Ok(event) => event,
            Err(e) => {
                warn!(relay = %queued.relay, "rejected event: {}", e);
                report.rejected += 1;
                return;
            }
        };

        match self.store.save(&event, Some(&queued.relay)) {
            Ok(SaveOutcome::Duplicate(_)) => report.duplicates += 1,
            Ok(_) => {
                report.saved += 1;
                self.apply_own_mute_list(&event);
                let _ = self.events_tx.send(event);
            }
            Err(ClientError::ExpiredEvent(id)) => {
                debug!(event_id = %id, relay = %queued.relay, "rejected expired event");
                report.rejected += 1;
            }
            Err(e) => {
                error!(event_id = %event.id, "failed to store event: {}", e);
                report.failed += 1;
            }
        }
    }

    fn apply_own_mute_list(&self, event: &Event) {
        if event.kind != KIND_MUTE_LIST
            || self.local_pubkey.as_deref() != Some(event.pubkey.as_str())
        {
            return;
        }
        let list = match MuteList::from_event(event) {
            Ok(list) => list,
            Err(e) => {
                warn!(event_id = %event.id, "unusable mute list: {}", e);
                return;
            }
        };
        match self.graph.apply_mute_list(&event.pubkey, &list) {
            Ok(true) => info!(muted = list.pubkeys.len(), "applied mute list from another session"),
            Ok(false) => {}
            Err(e) => error!(event_id = %event.id, "failed to apply mute list: {}", e),
        }
    }
}
