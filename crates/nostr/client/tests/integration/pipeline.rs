//! Relay frames through the queue into the store

use super::*;
use nostr::{KIND_DELETION, KIND_METADATA};
use nostr_client::{BatchReport, Filter, FilterSubscription};
use pretty_assertions::assert_eq;
use tokio::time::{Duration, sleep};

async fn live_notes(client: &TestClient, relay: &str) -> nostr_client::SubscriptionHandle {
    client
        .registry
        .acquire(FilterSubscription::live(Filter::new().kinds(vec![0, 1, 5]), relay).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_same_event_from_two_relays_is_stored_once() {
    let mut client = TestClient::new();
    let author = Keys::generate().unwrap();
    let event = sign(&author, 1, vec![], "hello from two relays");

    let on_a = live_notes(&client, RELAY_A).await;
    let on_b = live_notes(&client, RELAY_B).await;

    client.deliver(RELAY_A, on_a.id().unwrap().as_str(), &event);
    sleep(Duration::from_millis(50)).await;
    client.deliver(RELAY_B, on_b.id().unwrap().as_str(), &event);
    client.settle().await;

    let report = client.worker.process_batch();
    assert_eq!(
        report,
        BatchReport {
            saved: 1,
            duplicates: 1,
            rejected: 0,
            failed: 0
        }
    );
    assert_eq!(client.store.count_events().unwrap(), 1);
    assert_eq!(client.store.count_authors().unwrap(), 1);
    assert_eq!(
        client.store.seen_on(&event.id).unwrap(),
        vec![RELAY_A.to_string(), RELAY_B.to_string()]
    );
}

#[tokio::test]
async fn test_forged_events_never_reach_the_store() {
    let mut client = TestClient::new();
    let author = Keys::generate().unwrap();
    let sub = live_notes(&client, RELAY_A).await;
    let id = sub.id().unwrap().as_str().to_string();

    let mut tampered = sign(&author, 1, vec![], "original");
    tampered.content.push('!');
    let mut stolen = sign(&author, 1, vec![], "someone else's words");
    stolen.pubkey = Keys::generate().unwrap().public_key().to_string();

    client.deliver(RELAY_A, &id, &tampered);
    client.deliver(RELAY_A, &id, &stolen);
    client.settle().await;

    let report = client.worker.process_batch();
    assert_eq!(report.rejected, 2);
    assert_eq!(client.store.count_events().unwrap(), 0);
    assert_eq!(client.store.count_authors().unwrap(), 0);
}

#[tokio::test]
async fn test_reply_before_parent_hydrates_stub() {
    let mut client = TestClient::new();
    let author = Keys::generate().unwrap();
    let sub = live_notes(&client, RELAY_A).await;
    let id = sub.id().unwrap().as_str().to_string();

    let parent = sign(&author, 1, vec![], "parent");
    let reply = sign(
        &author,
        1,
        vec![tag(&["e", &parent.id, "", "reply"])],
        "reply",
    );

    client.deliver(RELAY_A, &id, &reply);
    client.settle().await;
    client.worker.process_batch();
    assert!(client.store.get_event(&parent.id).unwrap().unwrap().is_stub());

    client.deliver(RELAY_A, &id, &parent);
    client.settle().await;
    client.worker.process_batch();

    let stored = client.store.get_event(&parent.id).unwrap().unwrap();
    assert!(!stored.is_stub());
    assert_eq!(client.store.count_events().unwrap(), 2);
    assert_eq!(
        client
            .store
            .events_referencing(&parent.id)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect::<Vec<_>>(),
        vec![reply.id.clone()]
    );
}

#[tokio::test]
async fn test_stale_copy_cannot_resurrect_deleted_event() {
    let mut client = TestClient::new();
    let author = Keys::generate().unwrap();
    let on_a = live_notes(&client, RELAY_A).await;
    let on_b = live_notes(&client, RELAY_B).await;

    let note = sign(&author, 1, vec![], "regrettable");
    let deletion = sign(&author, KIND_DELETION, vec![tag(&["e", &note.id])], "");

    // Relay A has the deletion, relay B still serves the note.
    client.deliver(RELAY_A, on_a.id().unwrap().as_str(), &deletion);
    client.deliver(RELAY_B, on_b.id().unwrap().as_str(), &note);
    client.settle().await;
    client.worker.process_batch();

    let stored = client.store.get_event(&note.id).unwrap().unwrap();
    assert!(stored.deleted);
    assert!(
        client
            .store
            .events_by_author(author.public_key(), Some(1), 10)
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_metadata_is_last_write_wins() {
    let mut client = TestClient::new();
    let author = Keys::generate().unwrap();
    let sub = live_notes(&client, RELAY_A).await;
    let id = sub.id().unwrap().as_str().to_string();

    let newer = sign_at(&author, KIND_METADATA, 2_000, vec![], r#"{"name":"new"}"#);
    let older = sign_at(&author, KIND_METADATA, 1_000, vec![], r#"{"name":"old"}"#);
    client.deliver(RELAY_A, &id, &newer);
    client.deliver(RELAY_A, &id, &older);
    client.settle().await;
    client.worker.process_batch();

    let profile = client.store.get_author(author.public_key()).unwrap().unwrap();
    assert_eq!(profile.name.as_deref(), Some("new"));
}

#[tokio::test]
async fn test_worker_task_drains_concurrent_relays() {
    let client = TestClient::new();
    let author = Keys::generate().unwrap();
    let on_a = live_notes(&client, RELAY_A).await;
    let on_b = live_notes(&client, RELAY_B).await;
    let (id_a, id_b) = (
        on_a.id().unwrap().as_str().to_string(),
        on_b.id().unwrap().as_str().to_string(),
    );

    let events: Vec<_> = (0..40)
        .map(|i| sign(&author, 1, vec![], &format!("note {i}")))
        .collect();

    let TestClient {
        worker,
        relays,
        store,
        registry,
        ..
    } = client;
    let mut saved = worker.subscribe();
    let (stop, shutdown) = tokio::sync::oneshot::channel();
    let running = tokio::spawn(worker.run(shutdown));

    let feeds: Vec<_> = [(RELAY_A, id_a), (RELAY_B, id_b)]
        .into_iter()
        .map(|(relay, id)| {
            let relays = relays.clone();
            let events = events.clone();
            tokio::spawn(async move {
                for event in &events {
                    let frame = serde_json::json!(["EVENT", id, event]).to_string();
                    relays.handle_message(relay, &frame).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for feed in feeds {
        feed.await.unwrap();
    }
    registry.snapshot().await.unwrap();

    for _ in 0..events.len() {
        tokio::time::timeout(Duration::from_secs(5), saved.recv())
            .await
            .unwrap()
            .unwrap();
    }
    stop.send(()).unwrap();
    running.await.unwrap();

    assert_eq!(store.count_events().unwrap(), 40);
    assert_eq!(store.count_authors().unwrap(), 1);
    drop((on_a, on_b));
}

#[tokio::test]
async fn test_referenced_stub_is_fetched_by_id() {
    let mut client = TestClient::new();
    let author = Keys::generate().unwrap();
    let parent = sign(&author, 1, vec![], "the original");
    let reply = sign(
        &author,
        1,
        vec![tag(&["e", &parent.id, "", "reply"])],
        "a reply",
    );

    let notes = live_notes(&client, RELAY_A).await;
    client.deliver(RELAY_A, notes.id().unwrap().as_str(), &reply);
    client.settle().await;
    client.worker.process_batch();
    assert!(client.store.get_event(&parent.id).unwrap().unwrap().is_stub());
    client.sink.take();

    let handles = client
        .hydrator
        .request_missing(&[RELAY_A.to_string()], 10)
        .await
        .unwrap();
    client.settle().await;
    let by_id: Vec<_> = client
        .sink
        .take()
        .into_iter()
        .filter_map(|(_, message)| match message {
            ClientMessage::Req {
                subscription_id,
                filters,
            } if filters[0].ids.is_some() => Some((subscription_id, filters[0].ids.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].1, Some(vec![parent.id.clone()]));

    let fetch = &by_id[0].0;
    client.deliver(RELAY_A, fetch, &parent);
    client
        .relays
        .handle_message(RELAY_A, &format!(r#"["EOSE","{fetch}"]"#))
        .unwrap();
    client.settle().await;
    client.worker.process_batch();

    let stored = client.store.get_event(&parent.id).unwrap().unwrap();
    assert_eq!(stored.event, Some(parent));
    assert!(count_closes(&client.sink.take()) >= 1);
    drop((notes, handles));
}
