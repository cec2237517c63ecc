//! Fetching what the store only knows by reference.
//!
//! Tags create stub events and bare author rows before the data behind them
//! arrives. [`Hydrator`] turns those into one-shot relay requests; the
//! answers flow through the normal ingest path and fill the rows in place.

use crate::error::Result;
use crate::message::Filter;
use crate::store::EventStore;
use crate::subscription::{FilterSubscription, SubscriptionHandle, SubscriptionRegistry};
use crate::transport::normalize_relay_url;
use nostr::{KIND_CONTACTS, KIND_METADATA};
use std::sync::Arc;
use tracing::debug;

/// Issues one-shot requests for stubs and incomplete authors.
///
/// The returned handles must be kept until they close; dropping one early
/// withdraws the request.
#[derive(Clone)]
pub struct Hydrator {
    registry: SubscriptionRegistry,
    store: Arc<EventStore>,
}

impl Hydrator {
    pub fn new(registry: SubscriptionRegistry, store: Arc<EventStore>) -> Self {
        Self { registry, store }
    }

    /// Ask `relays`, and every relay a reference hinted at, for event `id`.
    pub async fn request_event(
        &self,
        id: &str,
        relays: &[String],
    ) -> Result<Vec<SubscriptionHandle>> {
        let mut targets = relays.to_vec();
        targets.extend(
            self.store
                .reference_hints(id)?
                .iter()
                .filter_map(|hint| normalize_relay_url(hint).ok()),
        );
        let filter = Filter::new().ids(vec![id.to_string()]).limit(1);
        self.request(filter, &targets).await
    }

    /// Ask for `pubkey`'s profile, newer than the one already applied.
    pub async fn request_metadata(
        &self,
        pubkey: &str,
        relays: &[String],
    ) -> Result<Vec<SubscriptionHandle>> {
        let since = self
            .store
            .get_author(pubkey)?
            .and_then(|author| author.metadata_updated_at);
        self.request(latest_of(KIND_METADATA, pubkey, since), relays)
            .await
    }

    /// Ask for `pubkey`'s follow list, newer than the one already applied.
    pub async fn request_contact_list(
        &self,
        pubkey: &str,
        relays: &[String],
    ) -> Result<Vec<SubscriptionHandle>> {
        let since = self
            .store
            .get_author(pubkey)?
            .and_then(|author| author.contacts_updated_at);
        self.request(latest_of(KIND_CONTACTS, pubkey, since), relays)
            .await
    }

    /// Request up to `batch` stub events and `batch` profiles missing
    /// metadata, one REQ of each per relay.
    pub async fn request_missing(
        &self,
        relays: &[String],
        batch: usize,
    ) -> Result<Vec<SubscriptionHandle>> {
        let mut handles = Vec::new();

        let stubs = self.store.stub_ids(batch)?;
        if !stubs.is_empty() {
            debug!(stubs = stubs.len(), "requesting referenced events");
            let limit = stubs.len() as u64;
            handles.extend(
                self.request(Filter::new().ids(stubs).limit(limit), relays)
                    .await?,
            );
        }

        let authors = self.store.authors_missing_metadata(batch)?;
        if !authors.is_empty() {
            debug!(authors = authors.len(), "requesting missing profiles");
            handles.extend(
                self.request(
                    Filter::new().kinds(vec![KIND_METADATA]).authors(authors),
                    relays,
                )
                .await?,
            );
        }

        Ok(handles)
    }

    async fn request(&self, filter: Filter, relays: &[String]) -> Result<Vec<SubscriptionHandle>> {
        let mut subscriptions: Vec<FilterSubscription> = Vec::with_capacity(relays.len());
        for relay in relays {
            let subscription = FilterSubscription::one_shot(filter.clone(), relay)?;
            if !subscriptions.iter().any(|s| s.relay == subscription.relay) {
                subscriptions.push(subscription);
            }
        }

        let mut handles = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            handles.push(self.registry.acquire(subscription).await?);
        }
        Ok(handles)
    }
}

fn latest_of(kind: u16, pubkey: &str, since: Option<u64>) -> Filter {
    let filter = Filter::new()
        .kinds(vec![kind])
        .authors(vec![pubkey.to_string()])
        .limit(1);
    match since {
        Some(since) => filter.since(since),
        None => filter,
    }
}
