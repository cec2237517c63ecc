//! NIP-02: Follow List (Contact List and Petnames)
//!
//! Kind 3 events publish the author's follows as `p` tags with an optional
//! relay hint and petname. Some clients also put a JSON object of relay
//! addresses in the content.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/02.md>

use crate::{Event, KIND_CONTACTS, tag_value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during NIP-02 operations
#[derive(Debug, Error)]
pub enum Nip02Error {
    #[error("invalid event kind: expected 3, got {0}")]
    InvalidKind(u16),

    #[error("invalid p-tag format: {0}")]
    InvalidPTag(String),
}

/// A single contact in a follow list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// The public key of the followed profile (32-byte hex)
    pub pubkey: String,

    /// Optional relay URL where this profile can be found
    pub relay_url: Option<String>,

    /// Optional local petname for this contact
    pub petname: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub(crate) fn is_hex_pubkey(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

impl Contact {
    /// Create a new contact with just a public key
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            relay_url: None,
            petname: None,
        }
    }

    /// Convert contact to a p-tag array
    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec!["p".to_string(), self.pubkey.clone()];
        tag.push(self.relay_url.clone().unwrap_or_default());
        if let Some(ref petname) = self.petname {
            tag.push(petname.clone());
        }
        tag
    }

    /// Parse a contact from a p-tag array
    pub fn from_tag(tag: &[String]) -> Result<Self, Nip02Error> {
        if tag_value(tag, 0) != "p" {
            return Err(Nip02Error::InvalidPTag(
                "tag must start with 'p'".to_string(),
            ));
        }

        let pubkey = tag_value(tag, 1);
        if !is_hex_pubkey(pubkey) {
            return Err(Nip02Error::InvalidPTag(format!(
                "pubkey must be 64-character hex, got: {}",
                pubkey
            )));
        }

        Ok(Self {
            pubkey: pubkey.to_lowercase(),
            relay_url: non_empty(tag_value(tag, 2)),
            petname: non_empty(tag_value(tag, 3)),
        })
    }
}

/// Contact list (follow list) parsed from a kind 3 event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactList {
    pub owner: String,
    pub created_at: u64,
    pub contacts: Vec<Contact>,
    /// Relay addresses listed in the content JSON, if any.
    pub relays: Vec<String>,
}

impl ContactList {
    /// Parse a contact list from an event.
    ///
    /// Malformed p-tags are skipped so one bad entry does not drop the whole
    /// follow set. A repeated pubkey keeps its first occurrence.
    pub fn from_event(event: &Event) -> Result<Self, Nip02Error> {
        if event.kind != KIND_CONTACTS {
            return Err(Nip02Error::InvalidKind(event.kind));
        }

        let mut contacts: Vec<Contact> = Vec::new();
        for tag in event.tags_named("p") {
            match Contact::from_tag(tag) {
                Ok(contact) if !contacts.iter().any(|c| c.pubkey == contact.pubkey) => {
                    contacts.push(contact)
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(event_id = %event.id, "skipping contact: {}", e),
            }
        }

        Ok(Self {
            owner: event.pubkey.clone(),
            created_at: event.created_at,
            contacts,
            relays: relays_from_content(&event.content),
        })
    }

    /// Check if a public key is in the contact list
    pub fn contains(&self, pubkey: &str) -> bool {
        self.contacts.iter().any(|c| c.pubkey == pubkey)
    }

    /// Get all public keys in the contact list
    pub fn pubkeys(&self) -> Vec<String> {
        self.contacts.iter().map(|c| c.pubkey.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

/// Keys of the `{"wss://relay": {"read": true, "write": true}}` object some
/// clients store in the contact list content. Anything else yields nothing.
pub fn relays_from_content(content: &str) -> Vec<String> {
    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(content) {
        Ok(map) => map.keys().cloned().collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PK_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const PK_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn create_test_event(tags: Vec<Vec<String>>, content: &str) -> Event {
        Event {
            id: "0".repeat(64),
            pubkey: "f".repeat(64),
            created_at: 1_700_000_000,
            kind: KIND_CONTACTS,
            tags,
            content: content.to_string(),
            sig: "0".repeat(128),
        }
    }

    fn tag(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_contact_from_tag_with_hint_and_petname() {
        let contact = Contact::from_tag(&tag(&["p", PK_A, "wss://relay.example", "alice"])).unwrap();
        assert_eq!(contact.pubkey, PK_A);
        assert_eq!(contact.relay_url.as_deref(), Some("wss://relay.example"));
        assert_eq!(contact.petname.as_deref(), Some("alice"));
        assert_eq!(contact.to_tag(), tag(&["p", PK_A, "wss://relay.example", "alice"]));
    }

    #[test]
    fn test_contact_from_short_tag() {
        let contact = Contact::from_tag(&tag(&["p", PK_A])).unwrap();
        assert_eq!(contact.relay_url, None);
        assert_eq!(contact.petname, None);
    }

    #[test]
    fn test_contact_rejects_bad_pubkey() {
        assert!(Contact::from_tag(&tag(&["p", "npub1xyz"])).is_err());
        assert!(Contact::from_tag(&tag(&["e", PK_A])).is_err());
    }

    #[test]
    fn test_contact_list_skips_bad_and_duplicate_tags() {
        let event = create_test_event(
            vec![
                tag(&["p", PK_A]),
                tag(&["p", "nope"]),
                tag(&["p", PK_B, "", "bob"]),
                tag(&["p", PK_A, "wss://dup"]),
                tag(&["t", "nostr"]),
            ],
            "",
        );
        let list = ContactList::from_event(&event).unwrap();
        assert_eq!(list.pubkeys(), vec![PK_A.to_string(), PK_B.to_string()]);
        assert!(list.contains(PK_B));
        assert_eq!(list.contacts[0].relay_url, None);
    }

    #[test]
    fn test_contact_list_wrong_kind() {
        let mut event = create_test_event(vec![], "");
        event.kind = 1;
        assert!(matches!(
            ContactList::from_event(&event),
            Err(Nip02Error::InvalidKind(1))
        ));
    }

    #[test]
    fn test_relays_from_content() {
        let relays = relays_from_content(
            r#"{"wss://a.example":{"read":true,"write":true},"wss://b.example":{"read":true,"write":false}}"#,
        );
        assert_eq!(relays, vec!["wss://a.example", "wss://b.example"]);
        assert!(relays_from_content("").is_empty());
        assert!(relays_from_content("[1,2]").is_empty());
    }
}
