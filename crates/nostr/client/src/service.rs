//! Inbound side of the relay transport.
//!
//! The transport calls into [`RelayService`] with every text frame and every
//! connection change. Nothing here is fatal: garbage from a relay is logged
//! and dropped.

use crate::error::Result;
use crate::message::RelayMessage;
use crate::store::EventStore;
use crate::subscription::SubscriptionRegistry;
use crate::transport::normalize_relay_url;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Routes relay messages to the registry and to publish tracking.
#[derive(Clone)]
pub struct RelayService {
    registry: SubscriptionRegistry,
    store: Arc<EventStore>,
}

impl RelayService {
    pub fn new(registry: SubscriptionRegistry, store: Arc<EventStore>) -> Self {
        Self { registry, store }
    }

    /// Dispatch one text frame from `relay`.
    ///
    /// Only a stopped registry is reported as an error.
    pub fn handle_message(&self, relay: &str, text: &str) -> Result<()> {
        let relay = canonical(relay);
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(relay = %relay, "dropping unparsable relay message: {}", e);
                return Ok(());
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => self.registry.handle_event(&relay, &subscription_id, event),
            RelayMessage::Eose { subscription_id } => {
                debug!(relay = %relay, subscription = %subscription_id, "end of stored events");
                self.registry.handle_eose(&relay, &subscription_id)
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => self
                .registry
                .handle_closed(&relay, &subscription_id, &message),
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                self.acknowledge(&relay, &event_id, success, &message);
                Ok(())
            }
            RelayMessage::Notice { message } => {
                info!(relay = %relay, "relay notice: {}", message);
                Ok(())
            }
            RelayMessage::Auth { .. } => {
                debug!(relay = %relay, "ignoring auth challenge");
                Ok(())
            }
            RelayMessage::Count {
                subscription_id,
                count,
            } => {
                debug!(relay = %relay, subscription = %subscription_id, count, "ignoring count");
                Ok(())
            }
        }
    }

    /// The transport (re)connected to `relay`.
    pub fn connection_opened(&self, relay: &str) -> Result<()> {
        self.registry.relay_connected(&canonical(relay))
    }

    /// The transport lost `relay`. Subscriptions wait for it to return.
    pub fn connection_lost(&self, relay: &str) -> Result<()> {
        self.registry.relay_disconnected(&canonical(relay))
    }

    fn acknowledge(&self, relay: &str, event_id: &str, success: bool, message: &str) {
        // A relay that already has the event counts as delivered.
        let accepted =
            success || message.starts_with("duplicate:") || message.starts_with("replaced:");
        if !accepted {
            warn!(relay = %relay, event_id = %event_id, "relay refused event: {}", message);
            return;
        }
        if let Err(e) = self.store.mark_published(event_id, relay) {
            warn!(relay = %relay, event_id = %event_id, "failed to record acknowledgement: {}", e);
        }
    }
}

fn canonical(relay: &str) -> String {
    normalize_relay_url(relay).unwrap_or_else(|_| relay.to_string())
}
