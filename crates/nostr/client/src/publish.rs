//! Local-first publishing of the local user's events.
//!
//! An event is signed and stored before anything reaches the network, and
//! every write relay it is meant for is recorded. Relays that refuse it, or
//! never acknowledge it, keep it in [`Publisher::pending_sync`] until
//! [`Publisher::retry_pending`] gets it through or the retry window passes.

use crate::config::PublishConfig;
use crate::error::{ClientError, Result};
use crate::message::ClientMessage;
use crate::store::{EventStore, PendingPublish, unix_now};
use crate::transport::{RelaySink, normalize_relay_url};
use nostr::{Event, EventTemplate, Keys};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Signs events on behalf of the local user.
///
/// Key storage is the caller's concern; [`Keys`] is the in-memory signer.
pub trait EventSigner: Send + Sync {
    fn public_key(&self) -> &str;
    fn sign(&self, template: &EventTemplate) -> Result<Event>;
}

impl EventSigner for Keys {
    fn public_key(&self) -> &str {
        Keys::public_key(self)
    }

    fn sign(&self, template: &EventTemplate) -> Result<Event> {
        Ok(Keys::sign(self, template)?)
    }
}

/// A signed, stored event and the relays that refused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub event: Event,
    /// Relays the transport refused; they stay pending
    pub failed_relays: Vec<String>,
}

#[derive(Clone)]
pub struct Publisher {
    store: Arc<EventStore>,
    signer: Arc<dyn EventSigner>,
    sink: Arc<dyn RelaySink>,
    write_relays: Vec<String>,
    retry_window_secs: u64,
}

impl Publisher {
    pub fn new(
        store: Arc<EventStore>,
        signer: Arc<dyn EventSigner>,
        sink: Arc<dyn RelaySink>,
        config: &PublishConfig,
    ) -> Result<Self> {
        let write_relays = normalize_all(&config.write_relays)
            .map_err(|e| ClientError::Config(format!("write relay: {e}")))?;

        Ok(Self {
            store,
            signer,
            sink,
            write_relays,
            retry_window_secs: config.retry_window_secs,
        })
    }

    pub fn public_key(&self) -> &str {
        self.signer.public_key()
    }

    pub fn write_relays(&self) -> &[String] {
        &self.write_relays
    }

    pub(crate) fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Sign `template`, store it and send it to every write relay.
    pub fn publish(&self, template: &EventTemplate) -> Result<Published> {
        let event = self.sign_and_save(template, &self.write_relays)?;
        let failed_relays = self.send(&event, &self.write_relays);
        Ok(Published {
            event,
            failed_relays,
        })
    }

    /// Like [`Publisher::publish`], but to `relays` instead of the write relays.
    pub fn publish_to(&self, template: &EventTemplate, relays: &[String]) -> Result<Published> {
        let relays = normalize_all(relays)?;
        let event = self.sign_and_save(template, &relays)?;
        let failed_relays = self.send(&event, &relays);
        Ok(Published {
            event,
            failed_relays,
        })
    }

    /// The local user's events that some target relay has not acknowledged.
    pub fn pending_sync(&self) -> Result<Vec<PendingPublish>> {
        self.pending_since(unix_now())
    }

    /// Re-send unacknowledged events created within the retry window before
    /// `now`. Returns how many messages the transport accepted.
    pub fn retry_pending(&self, now: u64) -> Result<usize> {
        let mut sent = 0;
        for pending in self.pending_since(now)? {
            let failed = self.send(&pending.event, &pending.relays);
            sent += pending.relays.len() - failed.len();
        }
        if sent > 0 {
            info!(sent, "re-sent pending events");
        }
        Ok(sent)
    }

    /// Sign and store `template`, recording `relays` as publish targets.
    ///
    /// Nothing is sent; a failure here leaves no trace in the store.
    pub(crate) fn sign_and_save(&self, template: &EventTemplate, relays: &[String]) -> Result<Event> {
        let event = self.signer.sign(template)?;
        self.store.upsert(&event, None)?;
        self.store.mark_for_publish(&event.id, relays)?;
        debug!(event_id = %event.id, kind = event.kind, relays = relays.len(), "saved event for publishing");
        Ok(event)
    }

    /// Hand `event` to the transport for each relay. Returns the refusals.
    pub(crate) fn send(&self, event: &Event, relays: &[String]) -> Vec<String> {
        relays
            .iter()
            .filter(|relay| {
                match self.sink.send(relay, ClientMessage::Event(event.clone())) {
                    Ok(()) => false,
                    Err(e) => {
                        warn!(relay = %relay, event_id = %event.id, "publish failed: {}", e);
                        true
                    }
                }
            })
            .cloned()
            .collect()
    }

    fn pending_since(&self, now: u64) -> Result<Vec<PendingPublish>> {
        let owner = self.signer.public_key();
        let since = now.saturating_sub(self.retry_window_secs);
        Ok(self
            .store
            .unpublished_events(since)?
            .into_iter()
            .filter(|pending| pending.event.pubkey == owner)
            .collect())
    }
}

fn normalize_all(relays: &[String]) -> Result<Vec<String>> {
    let mut normalized = Vec::with_capacity(relays.len());
    for relay in relays {
        let relay = normalize_relay_url(relay)?;
        if !normalized.contains(&relay) {
            normalized.push(relay);
        }
    }
    Ok(normalized)
}
