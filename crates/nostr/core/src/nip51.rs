//! NIP-51: Lists
//!
//! Only the public part of the mute list (kind 10000) is handled: muted
//! accounts are `p` tags. The list is replaceable, so the newest event per
//! author wins.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/51.md>

use crate::nip02::is_hex_pubkey;
use crate::{Event, EventTemplate, KIND_MUTE_LIST, tag_value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Nip51Error {
    #[error("invalid event kind: expected 10000, got {0}")]
    InvalidKind(u16),
}

/// The public keys muted by `owner` as of `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuteList {
    pub owner: String,
    pub created_at: u64,
    pub pubkeys: Vec<String>,
}

impl MuteList {
    /// Parse a mute list, keeping the first occurrence of each key.
    pub fn from_event(event: &Event) -> Result<Self, Nip51Error> {
        if event.kind != KIND_MUTE_LIST {
            return Err(Nip51Error::InvalidKind(event.kind));
        }

        let mut pubkeys: Vec<String> = Vec::new();
        for tag in event.tags_named("p") {
            let pubkey = tag_value(tag, 1).to_lowercase();
            if is_hex_pubkey(&pubkey) && !pubkeys.contains(&pubkey) {
                pubkeys.push(pubkey);
            }
        }

        Ok(Self {
            owner: event.pubkey.clone(),
            created_at: event.created_at,
            pubkeys,
        })
    }

    pub fn contains(&self, pubkey: &str) -> bool {
        self.pubkeys.iter().any(|pk| pk == pubkey)
    }
}

/// Template for a mute list carrying `pubkeys` as p-tags.
pub fn mute_list_template(pubkeys: &[String], created_at: u64) -> EventTemplate {
    EventTemplate {
        created_at,
        kind: KIND_MUTE_LIST,
        tags: pubkeys
            .iter()
            .map(|pk| vec!["p".to_string(), pk.clone()])
            .collect(),
        content: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keys;

    #[test]
    fn test_template_round_trips_through_signed_event() {
        let keys = Keys::generate().unwrap();
        let muted = vec!["a".repeat(64), "b".repeat(64)];
        let event = keys.sign(&mute_list_template(&muted, 42)).unwrap();

        let list = MuteList::from_event(&event).unwrap();
        assert_eq!(list.owner, keys.public_key());
        assert_eq!(list.created_at, 42);
        assert_eq!(list.pubkeys, muted);
    }

    #[test]
    fn test_from_event_dedups_and_skips_junk() {
        let event = Event {
            id: "0".repeat(64),
            pubkey: "f".repeat(64),
            created_at: 1,
            kind: KIND_MUTE_LIST,
            tags: vec![
                vec!["p".to_string(), "A".repeat(64)],
                vec!["p".to_string(), "a".repeat(64)],
                vec!["p".to_string()],
                vec!["t".to_string(), "spam".to_string()],
            ],
            content: String::new(),
            sig: "0".repeat(128),
        };
        let list = MuteList::from_event(&event).unwrap();
        assert_eq!(list.pubkeys, vec!["a".repeat(64)]);
        assert!(list.contains(&"a".repeat(64)));
    }
}
