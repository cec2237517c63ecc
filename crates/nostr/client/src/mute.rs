//! The local user's mute list: local-first, then published.
//!
//! A mute or unmute commits to the store first and is never rolled back.
//! The new kind-10000 list is then handed to the transport for every write
//! relay through the shared [`Publisher`], so unacknowledged lists show up in
//! [`Publisher::pending_sync`] like any other event.

use crate::error::Result;
use crate::graph::SocialGraph;
use crate::publish::Publisher;
use crate::store::unix_now;
use nostr::{Event, KIND_MUTE_LIST, MuteList, mute_list_template};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Result of a mute or unmute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutePublish {
    /// The list as now committed locally
    pub list: Vec<String>,
    /// The signed list event
    pub event: Event,
    /// Write relays the transport refused; they stay pending
    pub failed_relays: Vec<String>,
}

pub struct MuteListManager {
    graph: SocialGraph,
    publisher: Publisher,
    guard: Mutex<()>,
}

impl MuteListManager {
    pub fn new(graph: SocialGraph, publisher: Publisher) -> Self {
        Self {
            graph,
            publisher,
            guard: Mutex::new(()),
        }
    }

    pub fn mute(&self, target: &str) -> Result<MutePublish> {
        self.update(|graph, owner| graph.mute(owner, target))
    }

    /// Unmute `target`. Posts removed when it was muted stay removed.
    pub fn unmute(&self, target: &str) -> Result<MutePublish> {
        self.update(|graph, owner| graph.unmute(owner, target))
    }

    pub fn current_list(&self) -> Result<Vec<String>> {
        self.graph.mute_list(self.publisher.public_key())
    }

    fn update(
        &self,
        change: impl FnOnce(&SocialGraph, &str) -> Result<Vec<String>>,
    ) -> Result<MutePublish> {
        let _guard = self.guard.lock();
        let owner = self.publisher.public_key();
        let store = self.publisher.store();

        // A list from another session may be stored but not yet applied.
        let previous = store.latest_event(owner, KIND_MUTE_LIST)?;
        if let Some(stored) = &previous {
            self.adopt(owner, stored)?;
        }

        let list = change(&self.graph, owner)?;

        let created_at = previous
            .map(|event| event.created_at + 1)
            .unwrap_or_default()
            .max(unix_now());
        let template = mute_list_template(&list, created_at);
        let event = self
            .publisher
            .sign_and_save(&template, self.publisher.write_relays())?;
        self.graph.mark_mute_list_applied(owner, created_at)?;

        let failed_relays = self.publisher.send(&event, self.publisher.write_relays());
        info!(
            event_id = %event.id,
            muted = list.len(),
            relays = self.publisher.write_relays().len(),
            "published mute list"
        );

        Ok(MutePublish {
            list,
            event,
            failed_relays,
        })
    }

    fn adopt(&self, owner: &str, stored: &Event) -> Result<()> {
        match MuteList::from_event(stored) {
            Ok(list) => {
                if self.graph.apply_mute_list(owner, &list)? {
                    info!(event_id = %stored.id, muted = list.pubkeys.len(), "adopted stored mute list");
                }
            }
            Err(e) => warn!(event_id = %stored.id, "unusable mute list: {}", e),
        }
        Ok(())
    }
}
