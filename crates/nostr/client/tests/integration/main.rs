//! Integration tests for the client core
//!
//! These tests wire the store, graph, registry, ingest worker, publisher and
//! mute manager together the way an application does, with a recording sink in
//! place of relay sockets.

mod pipeline;
mod social;
mod subscriptions;

use nostr::{Event, EventTemplate, Keys};
use nostr_client::{
    ClientConfig, ClientMessage, EventStore, Hydrator, IngestWorker, MuteListManager,
    PublishConfig, Publisher, RelayService, RelaySink, SocialGraph, SubscriptionRegistry,
    ingest_queue, unix_now,
};
use parking_lot::Mutex;
use std::sync::{Arc, Once};

pub const RELAY_A: &str = "wss://relay-a.example";
pub const RELAY_B: &str = "wss://relay-b.example";

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Records every outbound message instead of sending it.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(String, ClientMessage)>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<(String, ClientMessage)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl RelaySink for RecordingSink {
    fn send(&self, relay_url: &str, message: ClientMessage) -> nostr_client::Result<()> {
        self.sent.lock().push((relay_url.to_string(), message));
        Ok(())
    }
}

pub fn count_reqs(sent: &[(String, ClientMessage)]) -> usize {
    sent.iter()
        .filter(|(_, m)| matches!(m, ClientMessage::Req { .. }))
        .count()
}

pub fn count_closes(sent: &[(String, ClientMessage)]) -> usize {
    sent.iter()
        .filter(|(_, m)| matches!(m, ClientMessage::Close { .. }))
        .count()
}

/// A fully wired client with a recording transport.
pub struct TestClient {
    pub keys: Arc<Keys>,
    pub store: Arc<EventStore>,
    pub graph: SocialGraph,
    pub registry: SubscriptionRegistry,
    pub relays: RelayService,
    pub worker: IngestWorker,
    pub publisher: Publisher,
    pub mutes: MuteListManager,
    pub hydrator: Hydrator,
    pub sink: Arc<RecordingSink>,
    _temp_dir: tempfile::TempDir,
}

impl TestClient {
    pub fn new() -> Self {
        init_tracing();
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = ClientConfig::default();
        config.database.path = temp_dir.path().join("client.db");
        config.publishing = PublishConfig {
            write_relays: vec![RELAY_A.to_string(), RELAY_B.to_string()],
            ..PublishConfig::default()
        };

        let keys = Arc::new(Keys::generate().unwrap());
        let store = Arc::new(EventStore::open(&config.database).unwrap());
        let graph = SocialGraph::new(store.clone());
        let sink = Arc::new(RecordingSink::default());
        let (queue, drain) = ingest_queue();
        let registry =
            SubscriptionRegistry::spawn(sink.clone(), queue, config.subscriptions.clone());
        let relays = RelayService::new(registry.clone(), store.clone());
        let worker = IngestWorker::new(drain, store.clone(), graph.clone(), &config.ingest)
            .with_local_user(keys.public_key());
        let publisher =
            Publisher::new(store.clone(), keys.clone(), sink.clone(), &config.publishing).unwrap();
        let mutes = MuteListManager::new(graph.clone(), publisher.clone());
        let hydrator = Hydrator::new(registry.clone(), store.clone());

        Self {
            keys,
            store,
            graph,
            registry,
            relays,
            worker,
            publisher,
            mutes,
            hydrator,
            sink,
            _temp_dir: temp_dir,
        }
    }

    /// Deliver `event` as a relay frame for `subscription_id`.
    pub fn deliver(&self, relay: &str, subscription_id: &str, event: &Event) {
        let frame = serde_json::json!(["EVENT", subscription_id, event]).to_string();
        self.relays.handle_message(relay, &frame).unwrap();
    }

    /// Wait until the registry has handled everything sent so far.
    pub async fn settle(&self) {
        self.registry.snapshot().await.unwrap();
    }
}

pub fn sign(keys: &Keys, kind: u16, tags: Vec<Vec<String>>, content: &str) -> Event {
    sign_at(keys, kind, unix_now(), tags, content)
}

pub fn sign_at(
    keys: &Keys,
    kind: u16,
    created_at: u64,
    tags: Vec<Vec<String>>,
    content: &str,
) -> Event {
    keys.sign(&EventTemplate {
        created_at,
        kind,
        tags,
        content: content.to_string(),
    })
    .unwrap()
}

pub fn tag(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
