//! Reverse-chronological paging over several relays.

use crate::error::Result;
use crate::message::Filter;
use crate::subscription::{FilterSubscription, SubscriptionHandle, SubscriptionRegistry};
use tracing::debug;

/// Walks a filter backwards in time, one page per relay at a time.
///
/// Each page is a one-shot subscription. [`PagedSubscription::load_more`]
/// replaces a relay's page with one bounded by the oldest event that page
/// delivered. Relays whose page delivered nothing keep their page.
///
/// `until` is inclusive on the wire. A full page moves strictly below its
/// oldest timestamp so a page of equal timestamps cannot repeat forever; a
/// short page keeps the bound, since its relay had nothing older to add.
pub struct PagedSubscription {
    registry: SubscriptionRegistry,
    filter: Filter,
    page_size: u64,
    pages: Vec<SubscriptionHandle>,
}

impl PagedSubscription {
    /// Request the newest page from every relay.
    pub async fn start(
        registry: SubscriptionRegistry,
        filter: Filter,
        relays: &[String],
        page_size: u64,
    ) -> Result<Self> {
        let mut pager = Self {
            registry,
            filter,
            page_size,
            pages: Vec::with_capacity(relays.len()),
        };
        for relay in relays {
            let page = pager.page(relay, None).await?;
            pager.pages.push(page);
        }
        Ok(pager)
    }

    /// Request the next older page. Returns how many relays were advanced.
    pub async fn load_more(&mut self) -> Result<usize> {
        let mut advanced = 0;
        for index in 0..self.pages.len() {
            let page = &self.pages[index];
            let (Some(relay), Some(oldest)) =
                (page.relay().map(str::to_string), page.oldest_created_at())
            else {
                continue;
            };
            let until = if page.events_received() >= self.page_size {
                oldest.saturating_sub(1)
            } else {
                oldest
            };
            debug!(relay = %relay, until, "loading older page");
            let next = self.page(&relay, Some(until)).await?;
            std::mem::replace(&mut self.pages[index], next).cancel();
            advanced += 1;
        }
        Ok(advanced)
    }

    pub fn pages(&self) -> &[SubscriptionHandle] {
        &self.pages
    }

    async fn page(&self, relay: &str, until: Option<u64>) -> Result<SubscriptionHandle> {
        let mut filter = self.filter.clone().limit(self.page_size);
        if let Some(until) = until {
            filter = filter.until(until);
        }
        self.registry
            .acquire(FilterSubscription::one_shot(filter, relay)?)
            .await
    }
}
