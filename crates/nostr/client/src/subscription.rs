//! Reference-counted relay subscriptions.
//!
//! Consumers ask for a [`FilterSubscription`] and get a [`SubscriptionHandle`].
//! Identical criteria against the same relay share one live subscription: the
//! first acquire sends `REQ`, the last release sends `CLOSE`.
//!
//! All bookkeeping lives in a [`SubscriptionTable`] owned by a single task.
//! Callers talk to that task through [`SubscriptionRegistry`], so acquire and
//! release never race on a reference count.

use crate::config::SubscriptionConfig;
use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter};
use crate::queue::IngestQueue;
use crate::transport::{RelaySink, normalize_relay_url};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Wire identifier of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One relay query: criteria, target relay and lifecycle flag.
///
/// Two values with equal normalized criteria and relay have the same
/// [`SubscriptionId`]. `keep_open` never reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSubscription {
    pub filter: Filter,
    pub relay: String,
    pub keep_open: bool,
}

impl FilterSubscription {
    pub fn new(filter: Filter, relay: &str, keep_open: bool) -> Result<Self> {
        Ok(Self {
            filter: filter.normalized(),
            relay: normalize_relay_url(relay)?,
            keep_open,
        })
    }

    /// Closed automatically once the relay sends EOSE.
    pub fn one_shot(filter: Filter, relay: &str) -> Result<Self> {
        Self::new(filter, relay, false)
    }

    /// Stays open for live events until every holder releases it.
    pub fn live(filter: Filter, relay: &str) -> Result<Self> {
        Self::new(filter, relay, true)
    }

    pub fn id(&self) -> SubscriptionId {
        let filter = serde_json::to_string(&self.filter).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(filter.as_bytes());
        hasher.update(b"|");
        hasher.update(self.relay.as_bytes());
        SubscriptionId(hex::encode(hasher.finalize()))
    }
}

/// Counters shared between a live subscription and every handle to it.
#[derive(Debug)]
struct SubscriptionStats {
    events_received: AtomicU64,
    oldest_created_at: AtomicU64,
    eose: AtomicBool,
    closed: AtomicBool,
}

impl Default for SubscriptionStats {
    fn default() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            oldest_created_at: AtomicU64::new(u64::MAX),
            eose: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

impl SubscriptionStats {
    fn record_event(&self, created_at: Option<u64>) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        if let Some(created_at) = created_at {
            self.oldest_created_at.fetch_min(created_at, Ordering::Relaxed);
        }
    }

    fn oldest_created_at(&self) -> Option<u64> {
        let oldest = self.oldest_created_at.load(Ordering::Relaxed);
        (oldest != u64::MAX).then_some(oldest)
    }
}

/// Proof of one holder's interest in one generation of a subscription.
#[derive(Debug, Clone)]
pub(crate) struct Lease {
    id: SubscriptionId,
    relay: String,
    generation: u64,
    token: u64,
    stats: Arc<SubscriptionStats>,
}

/// Point-in-time view of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub id: SubscriptionId,
    pub relay: String,
    pub filter: Filter,
    pub keep_open: bool,
    pub ref_count: usize,
    pub active: bool,
    pub eose: bool,
    pub attempts: u32,
    pub events_received: u64,
    pub oldest_created_at: Option<u64>,
}

struct Live {
    subscription: FilterSubscription,
    generation: u64,
    holders: HashSet<u64>,
    active: bool,
    eose: bool,
    requested_at: Instant,
    attempts: u32,
    stats: Arc<SubscriptionStats>,
}

impl Live {
    fn req(&self, id: &str) -> (String, ClientMessage) {
        (
            self.subscription.relay.clone(),
            ClientMessage::Req {
                subscription_id: id.to_string(),
                filters: vec![self.subscription.filter.clone()],
            },
        )
    }

    fn close(&self, id: &str) -> (String, ClientMessage) {
        (
            self.subscription.relay.clone(),
            ClientMessage::Close {
                subscription_id: id.to_string(),
            },
        )
    }
}

/// Messages a table transition wants sent, in order.
pub(crate) type Outbound = Vec<(String, ClientMessage)>;

/// Synchronous subscription state machine.
///
/// Every transition returns the relay messages it implies instead of sending
/// them, which keeps the table independent of any transport.
pub(crate) struct SubscriptionTable {
    entries: HashMap<String, Live>,
    offline: HashSet<String>,
    next_generation: u64,
    next_token: u64,
    config: SubscriptionConfig,
}

impl SubscriptionTable {
    pub(crate) fn new(config: SubscriptionConfig) -> Self {
        Self {
            entries: HashMap::new(),
            offline: HashSet::new(),
            next_generation: 0,
            next_token: 0,
            config,
        }
    }

    pub(crate) fn acquire(
        &mut self,
        subscription: FilterSubscription,
        now: Instant,
    ) -> (Lease, Outbound) {
        let id = subscription.id();
        let token = self.next_token;
        self.next_token += 1;

        let mut outbound = Vec::new();
        let live = match self.entries.entry(id.as_str().to_string()) {
            Entry::Occupied(occupied) => {
                let live = occupied.into_mut();
                live.subscription.keep_open |= subscription.keep_open;
                debug!(subscription = %id, holders = live.holders.len() + 1, "joined subscription");
                live
            }
            Entry::Vacant(vacant) => {
                let active = !self.offline.contains(&subscription.relay);
                let generation = self.next_generation;
                self.next_generation += 1;
                let live = vacant.insert(Live {
                    subscription,
                    generation,
                    holders: HashSet::new(),
                    active,
                    eose: false,
                    requested_at: now,
                    attempts: u32::from(active),
                    stats: Arc::default(),
                });
                if active {
                    outbound.push(live.req(id.as_str()));
                }
                debug!(subscription = %id, relay = %live.subscription.relay, active, "opened subscription");
                live
            }
        };
        live.holders.insert(token);

        let lease = Lease {
            relay: live.subscription.relay.clone(),
            generation: live.generation,
            stats: live.stats.clone(),
            id,
            token,
        };
        (lease, outbound)
    }

    /// Drop one holder. The last holder of an active subscription closes it.
    ///
    /// Leases of an earlier generation (closed by EOSE or by the relay) are
    /// ignored. Releasing the same lease twice is a programmer error.
    pub(crate) fn release(&mut self, lease: &Lease) -> Outbound {
        let Some(live) = self.entries.get_mut(lease.id.as_str()) else {
            debug!(subscription = %lease.id, "release after close");
            return Vec::new();
        };
        if live.generation != lease.generation {
            debug!(subscription = %lease.id, "release of a previous generation");
            return Vec::new();
        }

        let removed = live.holders.remove(&lease.token);
        debug_assert!(
            removed,
            "subscription {} released more times than acquired",
            lease.id
        );
        if !removed {
            warn!(subscription = %lease.id, "ignoring duplicate release");
            return Vec::new();
        }
        if !live.holders.is_empty() {
            return Vec::new();
        }

        self.remove(lease.id.as_str())
            .filter(|live| live.active)
            .map(|live| vec![live.close(lease.id.as_str())])
            .unwrap_or_default()
    }

    /// Count an event delivered for `id`. Returns false if `id` is not a live
    /// subscription on `relay`, in which case the event must be dropped.
    pub(crate) fn on_event(&mut self, relay: &str, id: &str, created_at: Option<u64>) -> bool {
        match self.entries.get(id) {
            Some(live) if live.subscription.relay == relay => {
                live.stats.record_event(created_at);
                true
            }
            _ => false,
        }
    }

    /// End of stored events. One-shot subscriptions close here regardless of
    /// how many holders remain.
    pub(crate) fn on_eose(&mut self, relay: &str, id: &str) -> Outbound {
        let Some(live) = self.entries.get_mut(id) else {
            return Vec::new();
        };
        if live.subscription.relay != relay {
            return Vec::new();
        }
        live.eose = true;
        live.stats.eose.store(true, Ordering::Relaxed);
        if live.subscription.keep_open {
            return Vec::new();
        }

        self.remove(id)
            .map(|live| vec![live.close(id)])
            .unwrap_or_default()
    }

    /// The relay closed `id` itself; forget it without answering.
    pub(crate) fn on_closed(&mut self, relay: &str, id: &str) -> bool {
        let matches = self
            .entries
            .get(id)
            .is_some_and(|live| live.subscription.relay == relay);
        if matches {
            self.remove(id);
        }
        matches
    }

    /// Re-request every inactive subscription still held on `relay`.
    ///
    /// Active ones already have a REQ with the transport.
    pub(crate) fn relay_connected(&mut self, relay: &str, now: Instant) -> Outbound {
        self.offline.remove(relay);
        let mut outbound = Vec::new();
        for (id, live) in self
            .entries
            .iter_mut()
            .filter(|(_, live)| live.subscription.relay == relay && !live.active)
        {
            live.active = true;
            live.eose = false;
            live.requested_at = now;
            live.attempts = 1;
            outbound.push(live.req(id));
        }
        outbound
    }

    /// Subscriptions on `relay` become inactive but keep their holders.
    pub(crate) fn relay_disconnected(&mut self, relay: &str) {
        self.offline.insert(relay.to_string());
        for live in self
            .entries
            .values_mut()
            .filter(|live| live.subscription.relay == relay)
        {
            live.active = false;
        }
    }

    /// A REQ could not be handed to the transport.
    pub(crate) fn mark_inactive(&mut self, id: &str) {
        if let Some(live) = self.entries.get_mut(id) {
            live.active = false;
        }
    }

    /// Retry one-shot subscriptions that have waited too long for EOSE, and
    /// give up on those out of attempts.
    pub(crate) fn sweep_stale(&mut self, now: Instant) -> Outbound {
        let stale_after = self.config.stale_after();
        let max_attempts = self.config.max_attempts;

        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, live)| {
                !live.subscription.keep_open
                    && live.active
                    && !live.eose
                    && now.saturating_duration_since(live.requested_at) >= stale_after
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut outbound = Vec::new();
        for id in stale {
            let Some(live) = self.entries.get_mut(&id) else {
                continue;
            };
            if live.attempts < max_attempts {
                live.attempts += 1;
                live.requested_at = now;
                info!(subscription = %id, attempt = live.attempts, "retrying stale subscription");
                outbound.push(live.req(&id));
            } else if let Some(live) = self.remove(&id) {
                warn!(subscription = %id, relay = %live.subscription.relay, "giving up on stale subscription");
                outbound.push(live.close(&id));
            }
        }
        outbound
    }

    pub(crate) fn snapshot(&self) -> Vec<SubscriptionSnapshot> {
        let mut snapshots: Vec<_> = self
            .entries
            .iter()
            .map(|(id, live)| SubscriptionSnapshot {
                id: SubscriptionId(id.clone()),
                relay: live.subscription.relay.clone(),
                filter: live.subscription.filter.clone(),
                keep_open: live.subscription.keep_open,
                ref_count: live.holders.len(),
                active: live.active,
                eose: live.eose,
                attempts: live.attempts,
                events_received: live.stats.events_received.load(Ordering::Relaxed),
                oldest_created_at: live.stats.oldest_created_at(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    fn remove(&mut self, id: &str) -> Option<Live> {
        let live = self.entries.remove(id)?;
        live.stats.closed.store(true, Ordering::Relaxed);
        debug!(subscription = %id, "removed subscription");
        Some(live)
    }
}

enum Command {
    Acquire {
        subscription: FilterSubscription,
        reply: oneshot::Sender<Lease>,
    },
    Release(Lease),
    Event {
        relay: String,
        subscription_id: String,
        event: Value,
    },
    Eose {
        relay: String,
        subscription_id: String,
    },
    Closed {
        relay: String,
        subscription_id: String,
        message: String,
    },
    Connected(String),
    Disconnected(String),
    Sweep,
    Snapshot(oneshot::Sender<Vec<SubscriptionSnapshot>>),
}

struct RegistryTask {
    table: SubscriptionTable,
    sink: Arc<dyn RelaySink>,
    queue: IngestQueue,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl RegistryTask {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        debug!("subscription registry stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Acquire {
                subscription,
                reply,
            } => {
                let (lease, outbound) = self.table.acquire(subscription, Instant::now());
                self.dispatch(outbound);
                if let Err(lease) = reply.send(lease) {
                    // Caller went away before receiving its handle.
                    let outbound = self.table.release(&lease);
                    self.dispatch(outbound);
                }
            }
            Command::Release(lease) => {
                let outbound = self.table.release(&lease);
                self.dispatch(outbound);
            }
            Command::Event {
                relay,
                subscription_id,
                event,
            } => {
                let created_at = event.get("created_at").and_then(Value::as_u64);
                if self.table.on_event(&relay, &subscription_id, created_at) {
                    self.queue.push(event.to_string(), relay);
                } else {
                    debug!(subscription = %subscription_id, relay = %relay, "dropping event for unknown subscription");
                }
            }
            Command::Eose {
                relay,
                subscription_id,
            } => {
                let outbound = self.table.on_eose(&relay, &subscription_id);
                self.dispatch(outbound);
            }
            Command::Closed {
                relay,
                subscription_id,
                message,
            } => {
                if self.table.on_closed(&relay, &subscription_id) {
                    info!(subscription = %subscription_id, relay = %relay, "relay closed subscription: {}", message);
                }
            }
            Command::Connected(relay) => {
                let outbound = self.table.relay_connected(&relay, Instant::now());
                info!(relay = %relay, resubscribed = outbound.len(), "relay connected");
                self.dispatch(outbound);
            }
            Command::Disconnected(relay) => {
                info!(relay = %relay, "relay disconnected");
                self.table.relay_disconnected(&relay);
            }
            Command::Sweep => {
                let outbound = self.table.sweep_stale(Instant::now());
                self.dispatch(outbound);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.table.snapshot());
            }
        }
    }

    fn dispatch(&mut self, outbound: Outbound) {
        for (relay, message) in outbound {
            let requested = match &message {
                ClientMessage::Req {
                    subscription_id, ..
                } => Some(subscription_id.clone()),
                _ => None,
            };
            if let Err(e) = self.sink.send(&relay, message) {
                warn!(relay = %relay, "failed to send to relay: {}", e);
                if let Some(id) = requested {
                    self.table.mark_inactive(&id);
                }
            }
        }
    }
}

/// Handle to the task that owns all subscription state. Cheap to clone.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    tx: mpsc::UnboundedSender<Command>,
}

impl SubscriptionRegistry {
    /// Start the registry task on the current tokio runtime.
    ///
    /// Events for live subscriptions are pushed onto `queue`.
    pub fn spawn(sink: Arc<dyn RelaySink>, queue: IngestQueue, config: SubscriptionConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = RegistryTask {
            table: SubscriptionTable::new(config),
            sink,
            queue,
            rx,
        };
        tokio::spawn(task.run());
        Self { tx }
    }

    /// Register interest in `subscription`, sending `REQ` if nobody else holds it.
    pub async fn acquire(&self, subscription: FilterSubscription) -> Result<SubscriptionHandle> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Acquire {
            subscription,
            reply,
        })?;
        let lease = response.await.map_err(|_| ClientError::RegistryClosed)?;
        Ok(SubscriptionHandle {
            lease: Some(lease),
            tx: self.tx.clone(),
        })
    }

    pub fn handle_event(&self, relay: &str, subscription_id: &str, event: Value) -> Result<()> {
        self.send(Command::Event {
            relay: relay.to_string(),
            subscription_id: subscription_id.to_string(),
            event,
        })
    }

    pub fn handle_eose(&self, relay: &str, subscription_id: &str) -> Result<()> {
        self.send(Command::Eose {
            relay: relay.to_string(),
            subscription_id: subscription_id.to_string(),
        })
    }

    pub fn handle_closed(&self, relay: &str, subscription_id: &str, message: &str) -> Result<()> {
        self.send(Command::Closed {
            relay: relay.to_string(),
            subscription_id: subscription_id.to_string(),
            message: message.to_string(),
        })
    }

    pub fn relay_connected(&self, relay: &str) -> Result<()> {
        self.send(Command::Connected(relay.to_string()))
    }

    pub fn relay_disconnected(&self, relay: &str) -> Result<()> {
        self.send(Command::Disconnected(relay.to_string()))
    }

    /// Run one stale-subscription pass now.
    pub fn sweep_stale(&self) -> Result<()> {
        self.send(Command::Sweep)
    }

    pub async fn snapshot(&self) -> Result<Vec<SubscriptionSnapshot>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        response.await.map_err(|_| ClientError::RegistryClosed)
    }

    /// Sweep stale subscriptions every `period` until the registry stops.
    pub fn spawn_stale_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let tx = self.tx.downgrade();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(tx) = tx.upgrade() else {
                    break;
                };
                if tx.send(Command::Sweep).is_err() {
                    break;
                }
            }
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| ClientError::RegistryClosed)
    }
}

/// One consumer's interest in a subscription.
///
/// Released on [`SubscriptionHandle::cancel`] or drop. Release is
/// fire-and-forget: it never waits for the relay.
pub struct SubscriptionHandle {
    lease: Option<Lease>,
    tx: mpsc::UnboundedSender<Command>,
}

impl SubscriptionHandle {
    fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn id(&self) -> Option<&SubscriptionId> {
        self.lease().map(|lease| &lease.id)
    }

    pub fn relay(&self) -> Option<&str> {
        self.lease().map(|lease| lease.relay.as_str())
    }

    /// Events delivered to the subscription so far, across all holders.
    pub fn events_received(&self) -> u64 {
        self.lease()
            .map(|lease| lease.stats.events_received.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Oldest `created_at` among delivered events.
    pub fn oldest_created_at(&self) -> Option<u64> {
        self.lease().and_then(|lease| lease.stats.oldest_created_at())
    }

    /// Whether the relay has sent all stored events.
    pub fn is_eose(&self) -> bool {
        self.lease()
            .is_some_and(|lease| lease.stats.eose.load(Ordering::Relaxed))
    }

    /// Whether the subscription ended (EOSE on a one-shot, closed by the
    /// relay, or abandoned as stale) while this handle was held.
    pub fn is_closed(&self) -> bool {
        self.lease()
            .is_none_or(|lease| lease.stats.closed.load(Ordering::Relaxed))
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(lease) = self.lease.take() {
            let _ = self.tx.send(Command::Release(lease));
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id())
            .field("relay", &self.relay())
            .finish()
    }
}
