//! Nostr client core: ingestion, storage, social graph and relay subscriptions.
//!
//! This crate provides:
//! - An ingest pipeline: relay frames are queued, decoded, verified and stored
//!   by a single writer
//! - A SQLite event store with stubs, tombstones and publish tracking
//! - A social graph over follows and mutes
//! - Reference-counted relay subscriptions shared between consumers
//! - Local-first publishing through [`Publisher`], mute lists included
//! - Fetching of stubbed events and missing profiles, and a periodic cleanup
//!
//! The socket layer is not part of this crate. It implements [`RelaySink`] for
//! outbound messages and feeds inbound frames to [`RelayService`].
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_client::{
//!     ChannelSink, ClientConfig, EventStore, Filter, FilterSubscription, IngestWorker,
//!     RelayService, SocialGraph, SubscriptionRegistry, ingest_queue,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> nostr_client::Result<()> {
//! let config = ClientConfig::default();
//! let store = Arc::new(EventStore::open(&config.database)?);
//! let graph = SocialGraph::new(store.clone());
//!
//! let (sink, mut outbound) = ChannelSink::new();
//! let (queue, drain) = ingest_queue();
//! let registry = SubscriptionRegistry::spawn(Arc::new(sink), queue, config.subscriptions.clone());
//! let relays = RelayService::new(registry.clone(), store.clone());
//!
//! let (_stop, shutdown) = tokio::sync::oneshot::channel();
//! let worker = IngestWorker::new(drain, store.clone(), graph, &config.ingest);
//! tokio::spawn(worker.run(shutdown));
//!
//! let notes = registry
//!     .acquire(FilterSubscription::live(
//!         Filter::new().kinds(vec![1]).limit(50),
//!         "wss://relay.damus.io",
//!     )?)
//!     .await?;
//!
//! // The transport delivers `outbound` to sockets and calls back:
//! relays.connection_opened("wss://relay.damus.io")?;
//! relays.handle_message("wss://relay.damus.io", r#"["EOSE","..."]"#)?;
//! # let _ = outbound.recv().await;
//! notes.cancel();
//! # Ok(())
//! # }
//! ```

mod cleanup;
pub mod config;
mod error;
mod graph;
mod hydrate;
mod ingest;
mod message;
mod mute;
mod pager;
mod publish;
mod queue;
mod service;
mod store;
mod subscription;
mod transport;

pub use cleanup::CleanupReport;
pub use config::{
    ClientConfig, DatabaseConfig, IngestConfig, PublishConfig, SubscriptionConfig, load_config,
    save_config,
};
pub use error::{ClientError, Result};
pub use graph::SocialGraph;
pub use hydrate::Hydrator;
pub use ingest::{BatchReport, IngestWorker};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use mute::{MuteListManager, MutePublish};
pub use pager::PagedSubscription;
pub use publish::{EventSigner, Published, Publisher};
pub use queue::{IngestDrain, IngestQueue, QueuedEvent, ingest_queue};
pub use service::RelayService;
pub use store::{
    Author, ConnectionPool, EventStore, Follow, PendingPublish, SaveOutcome, StoredEvent, unix_now,
};
pub use subscription::{
    FilterSubscription, SubscriptionHandle, SubscriptionId, SubscriptionRegistry,
    SubscriptionSnapshot,
};
pub use transport::{ChannelSink, RelaySink, normalize_relay_url};
