//! Follows, network distance and mutes end to end

use super::*;
use nostr::{KIND_CONTACTS, KIND_MUTE_LIST, MuteList, mute_list_template};
use nostr_client::{Filter, FilterSubscription};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

fn contacts(keys: &Keys, follows: &[&str]) -> Event {
    let tags = follows.iter().map(|pk| tag(&["p", pk])).collect();
    sign(keys, KIND_CONTACTS, tags, "")
}

#[tokio::test]
async fn test_network_partitions_known_authors() {
    let client = TestClient::new();
    let me = client.keys.public_key().to_string();
    let friend = Keys::generate().unwrap();
    let friend_of_friend = "c".repeat(64);
    let stranger = Keys::generate().unwrap();
    let troll = Keys::generate().unwrap();

    for event in [
        contacts(&client.keys, &[friend.public_key()]),
        contacts(&friend, &[&friend_of_friend]),
        sign(&stranger, 1, vec![], "hi"),
        sign(&troll, 1, vec![], "spam"),
    ] {
        client.store.upsert(&event, Some(RELAY_A)).unwrap();
    }
    client.mutes.mute(troll.public_key()).unwrap();

    let network = client.graph.in_network(&me).unwrap();
    let outside = client.graph.out_of_network(&me).unwrap();
    assert_eq!(
        network,
        BTreeSet::from([
            me.clone(),
            friend.public_key().to_string(),
            friend_of_friend.clone()
        ])
    );
    assert_eq!(outside, BTreeSet::from([stranger.public_key().to_string()]));
    assert!(network.is_disjoint(&outside));
}

#[tokio::test]
async fn test_mute_then_unmute_does_not_restore_posts() {
    let client = TestClient::new();
    let author = Keys::generate().unwrap();
    let posts: Vec<_> = (0..3)
        .map(|i| sign(&author, 1, vec![], &format!("post {i}")))
        .collect();
    for post in &posts {
        client.store.upsert(post, Some(RELAY_A)).unwrap();
    }

    let muted = client.mutes.mute(author.public_key()).unwrap();
    assert_eq!(muted.list, vec![author.public_key().to_string()]);
    let unmuted = client.mutes.unmute(author.public_key()).unwrap();
    assert!(unmuted.list.is_empty());

    let record = client.store.get_author(author.public_key()).unwrap().unwrap();
    assert!(!record.muted);
    for post in &posts {
        assert!(client.store.get_event(&post.id).unwrap().is_none());
    }

    let published: Vec<_> = client
        .sink
        .take()
        .into_iter()
        .filter_map(|(_, message)| match message {
            ClientMessage::Event(event) => Some(event),
            _ => None,
        })
        .collect();
    // Each change goes to both write relays.
    assert_eq!(published.len(), 4);
    assert!(published.iter().all(|e| e.kind == KIND_MUTE_LIST));
    assert!(MuteList::from_event(&published[3]).unwrap().pubkeys.is_empty());
}

#[tokio::test]
async fn test_concurrent_mutes_of_same_author_list_it_once() {
    let client = Arc::new(TestClient::new());
    let target = "d".repeat(64);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            let target = target.clone();
            std::thread::spawn(move || client.mutes.mute(&target).unwrap())
        })
        .collect();
    for task in tasks {
        task.join().unwrap();
    }

    assert_eq!(client.mutes.current_list().unwrap(), vec![target.clone()]);
    let latest = client
        .store
        .latest_event(client.keys.public_key(), KIND_MUTE_LIST)
        .unwrap()
        .unwrap();
    assert_eq!(MuteList::from_event(&latest).unwrap().pubkeys, vec![target]);
}

#[tokio::test]
async fn test_mute_list_from_another_device_is_applied() {
    let mut client = TestClient::new();
    let sub = client
        .registry
        .acquire(
            FilterSubscription::live(
                Filter::new()
                    .kinds(vec![KIND_MUTE_LIST])
                    .authors(vec![client.keys.public_key().to_string()]),
                RELAY_A,
            )
            .unwrap(),
        )
        .await
        .unwrap();
    let id = sub.id().unwrap().as_str().to_string();

    let (x, y) = ("e".repeat(64), "f".repeat(64));
    let local = client.mutes.mute(&x).unwrap();

    let remote = client
        .keys
        .sign(&mute_list_template(&[y.clone()], local.event.created_at + 10))
        .unwrap();
    client.deliver(RELAY_A, &id, &remote);
    // The relay echoes our own, older list too.
    client.deliver(RELAY_A, &id, &local.event);
    client.settle().await;
    client.worker.process_batch();

    assert_eq!(client.mutes.current_list().unwrap(), vec![y.clone()]);
    assert!(client.graph.is_muted(&y).unwrap());
    assert!(!client.graph.is_muted(&x).unwrap());
}

#[tokio::test]
async fn test_ok_from_relays_clears_pending_sync() {
    let client = TestClient::new();
    let published = client.mutes.mute(&"a".repeat(64)).unwrap();
    assert_eq!(client.publisher.pending_sync().unwrap().len(), 1);

    let id = &published.event.id;
    client
        .relays
        .handle_message(RELAY_A, &format!(r#"["OK","{id}",true,""]"#))
        .unwrap();
    let pending = client.publisher.pending_sync().unwrap();
    assert_eq!(pending[0].relays, vec![RELAY_B.to_string()]);

    client
        .relays
        .handle_message(RELAY_B, &format!(r#"["OK","{id}",false,"duplicate: have it"]"#))
        .unwrap();
    assert!(client.publisher.pending_sync().unwrap().is_empty());
}

#[tokio::test]
async fn test_published_note_is_stored_and_acknowledged() {
    let client = TestClient::new();
    let published = client
        .publisher
        .publish(&EventTemplate {
            created_at: unix_now(),
            kind: 1,
            tags: vec![],
            content: "local first".to_string(),
        })
        .unwrap();
    assert!(published.failed_relays.is_empty());

    let sent = client.sink.take();
    let relays: BTreeSet<_> = sent
        .iter()
        .filter(|(_, m)| matches!(m, ClientMessage::Event(e) if e.id == published.event.id))
        .map(|(relay, _)| relay.as_str())
        .collect();
    assert_eq!(relays, BTreeSet::from([RELAY_A, RELAY_B]));
    assert!(client.store.get_event(&published.event.id).unwrap().is_some());

    for relay in [RELAY_A, RELAY_B] {
        let id = &published.event.id;
        client
            .relays
            .handle_message(relay, &format!(r#"["OK","{id}",true,""]"#))
            .unwrap();
    }
    assert!(client.publisher.pending_sync().unwrap().is_empty());
}
