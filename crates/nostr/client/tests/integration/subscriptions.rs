//! Subscription sharing, lifecycle and recovery

use super::*;
use nostr_client::{Filter, FilterSubscription, PagedSubscription};
use pretty_assertions::assert_eq;

fn notes_by_pk1() -> Filter {
    Filter::new().kinds(vec![1]).authors(vec!["pk1".to_string()])
}

#[tokio::test]
async fn test_two_consumers_share_one_req() {
    let mut client = TestClient::new();
    let author = Keys::generate().unwrap();

    let first = client
        .registry
        .acquire(FilterSubscription::live(notes_by_pk1(), RELAY_A).unwrap())
        .await
        .unwrap();
    let second = client
        .registry
        .acquire(FilterSubscription::live(notes_by_pk1(), RELAY_A).unwrap())
        .await
        .unwrap();
    assert_eq!(first.id(), second.id());
    client.settle().await;

    let sent = client.sink.take();
    assert_eq!(count_reqs(&sent), 1);

    let id = second.id().unwrap().as_str().to_string();
    first.cancel();
    client.settle().await;
    assert_eq!(count_closes(&client.sink.take()), 0);

    // Still delivering to the remaining consumer.
    client.deliver(RELAY_A, &id, &sign(&author, 1, vec![], "still here"));
    client.settle().await;
    assert_eq!(client.worker.process_batch().saved, 1);
    assert_eq!(second.events_received(), 1);

    second.cancel();
    client.settle().await;
    let sent = client.sink.take();
    assert_eq!(count_closes(&sent), 1);
    assert!(client.registry.snapshot().await.unwrap().is_empty());

    // Nothing more is closed afterwards, and late events are dropped.
    client.deliver(RELAY_A, &id, &sign(&author, 1, vec![], "too late"));
    client.settle().await;
    assert!(client.sink.take().is_empty());
    assert_eq!(client.worker.process_batch().total(), 0);
}

#[tokio::test]
async fn test_one_shot_closes_on_eose_even_when_shared() {
    let client = TestClient::new();
    let sub = FilterSubscription::one_shot(notes_by_pk1(), RELAY_A).unwrap();
    let first = client.registry.acquire(sub.clone()).await.unwrap();
    let second = client.registry.acquire(sub).await.unwrap();
    let id = first.id().unwrap().as_str().to_string();

    client
        .relays
        .handle_message(RELAY_A, &format!(r#"["EOSE","{id}"]"#))
        .unwrap();
    client.settle().await;
    assert!(first.is_closed() && second.is_closed());

    drop(first);
    drop(second);
    client.settle().await;
    let sent = client.sink.take();
    assert_eq!(count_reqs(&sent), 1);
    assert_eq!(count_closes(&sent), 1);
}

#[tokio::test]
async fn test_relay_closed_subscription_is_forgotten_without_close() {
    let client = TestClient::new();
    let handle = client
        .registry
        .acquire(FilterSubscription::live(notes_by_pk1(), RELAY_A).unwrap())
        .await
        .unwrap();
    let id = handle.id().unwrap().as_str().to_string();

    client
        .relays
        .handle_message(RELAY_A, &format!(r#"["CLOSED","{id}","error: shutting down"]"#))
        .unwrap();
    client.settle().await;
    assert!(handle.is_closed());

    // A fresh consumer gets a new subscription; the old handle cannot close it.
    let fresh = client
        .registry
        .acquire(FilterSubscription::live(notes_by_pk1(), RELAY_A).unwrap())
        .await
        .unwrap();
    handle.cancel();
    client.settle().await;

    let snapshot = client.registry.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].ref_count, 1);
    let sent = client.sink.take();
    assert_eq!(count_reqs(&sent), 2);
    assert_eq!(count_closes(&sent), 0);
    drop(fresh);
}

#[tokio::test]
async fn test_interest_survives_reconnect() {
    let client = TestClient::new();
    let kept = client
        .registry
        .acquire(FilterSubscription::live(notes_by_pk1(), RELAY_A).unwrap())
        .await
        .unwrap();
    let elsewhere = client
        .registry
        .acquire(FilterSubscription::live(notes_by_pk1(), RELAY_B).unwrap())
        .await
        .unwrap();
    client.settle().await;
    client.sink.take();

    client.relays.connection_lost(RELAY_A).unwrap();
    let while_offline = client
        .registry
        .acquire(
            FilterSubscription::live(Filter::new().kinds(vec![0]), RELAY_A).unwrap(),
        )
        .await
        .unwrap();
    client.settle().await;
    assert!(client.sink.take().is_empty());

    client.relays.connection_opened(RELAY_A).unwrap();
    client.settle().await;
    let sent = client.sink.take();
    assert_eq!(count_reqs(&sent), 2);
    assert!(sent.iter().all(|(relay, _)| relay == RELAY_A));

    drop((kept, elsewhere, while_offline));
}

#[tokio::test]
async fn test_pager_walks_backwards() {
    let mut client = TestClient::new();
    let author = Keys::generate().unwrap();
    let mut pager = PagedSubscription::start(
        client.registry.clone(),
        Filter::new().kinds(vec![1]),
        &[RELAY_A.to_string()],
        2,
    )
    .await
    .unwrap();
    let first_page = pager.pages()[0].id().unwrap().as_str().to_string();

    for created_at in [3_000, 2_000] {
        client.deliver(
            RELAY_A,
            &first_page,
            &sign_at(&author, 1, created_at, vec![], &created_at.to_string()),
        );
    }
    client
        .relays
        .handle_message(RELAY_A, &format!(r#"["EOSE","{first_page}"]"#))
        .unwrap();
    client.settle().await;
    assert_eq!(client.worker.process_batch().saved, 2);

    assert_eq!(pager.load_more().await.unwrap(), 1);
    client.settle().await;

    let requested: Vec<_> = client
        .sink
        .take()
        .into_iter()
        .filter_map(|(_, message)| match message {
            ClientMessage::Req { filters, .. } => Some(filters[0].until),
            _ => None,
        })
        .collect();
    // A full page moves strictly below its oldest timestamp.
    assert_eq!(requested, vec![None, Some(1_999)]);
}

#[tokio::test]
async fn test_first_connection_does_not_repeat_req() {
    let client = TestClient::new();
    let notes = client
        .registry
        .acquire(FilterSubscription::live(notes_by_pk1(), RELAY_A).unwrap())
        .await
        .unwrap();
    client.settle().await;
    assert_eq!(count_reqs(&client.sink.take()), 1);

    client.relays.connection_opened(RELAY_A).unwrap();
    client.settle().await;
    assert!(client.sink.take().is_empty());

    let snapshot = client.registry.snapshot().await.unwrap();
    assert!(snapshot[0].active);
    assert_eq!(snapshot[0].attempts, 1);
    drop(notes);
}
