//! NIP-40: Expiration Timestamp
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/40.md>

use crate::Event;

pub const EXPIRATION_TAG: &str = "expiration";

/// Unix timestamp after which the event should be discarded, if tagged.
pub fn expiration(event: &Event) -> Option<u64> {
    event
        .first_tag_value(EXPIRATION_TAG)
        .and_then(|value| value.parse().ok())
}

/// True once `now` has reached the event's expiration.
pub fn is_expired(event: &Event, now: u64) -> bool {
    expiration(event).is_some_and(|expires_at| expires_at <= now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_expiration(value: &str) -> Event {
        Event {
            id: "0".repeat(64),
            pubkey: "f".repeat(64),
            created_at: 1,
            kind: 1,
            tags: vec![vec![EXPIRATION_TAG.to_string(), value.to_string()]],
            content: String::new(),
            sig: "0".repeat(128),
        }
    }

    #[test]
    fn test_expiration_parsing() {
        assert_eq!(expiration(&event_with_expiration("1700000000")), Some(1_700_000_000));
        assert_eq!(expiration(&event_with_expiration("tomorrow")), None);
    }

    #[test]
    fn test_is_expired() {
        let event = event_with_expiration("100");
        assert!(!is_expired(&event, 99));
        assert!(is_expired(&event, 100));
        assert!(is_expired(&event, 101));
    }
}
