//! NIP-09: Event Deletion Request
//!
//! A kind 5 event lists the events its author wants retracted, either by id
//! (`e` tags) or by replaceable coordinate (`a` tags, `kind:pubkey:d`).
//! Only events signed by the same key may be affected.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/09.md>

use crate::{Event, KIND_DELETION, tag_value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Nip09Error {
    #[error("invalid event kind: expected 5, got {0}")]
    InvalidKind(u16),

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

/// Address of a replaceable or addressable event: `kind:pubkey:d-identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub kind: u16,
    pub pubkey: String,
    pub identifier: String,
}

impl Coordinate {
    pub fn parse(value: &str) -> Result<Self, Nip09Error> {
        let mut parts = value.splitn(3, ':');
        let kind = parts
            .next()
            .and_then(|k| k.parse::<u16>().ok())
            .ok_or_else(|| Nip09Error::InvalidCoordinate(value.to_string()))?;
        let pubkey = parts
            .next()
            .filter(|pk| !pk.is_empty())
            .ok_or_else(|| Nip09Error::InvalidCoordinate(value.to_string()))?;
        Ok(Self {
            kind,
            pubkey: pubkey.to_string(),
            identifier: parts.next().unwrap_or("").to_string(),
        })
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.pubkey, self.identifier)
    }
}

/// The targets of a deletion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRequest {
    pub author: String,
    pub created_at: u64,
    pub event_ids: Vec<String>,
    /// Coordinates owned by `author`; foreign coordinates are dropped.
    pub coordinates: Vec<Coordinate>,
    pub reason: String,
}

impl DeletionRequest {
    pub fn from_event(event: &Event) -> Result<Self, Nip09Error> {
        if event.kind != KIND_DELETION {
            return Err(Nip09Error::InvalidKind(event.kind));
        }

        let event_ids = event
            .tags_named("e")
            .map(|tag| tag_value(tag, 1))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        let coordinates = event
            .tags_named("a")
            .filter_map(|tag| Coordinate::parse(tag_value(tag, 1)).ok())
            .filter(|coordinate| coordinate.pubkey == event.pubkey)
            .collect();

        Ok(Self {
            author: event.pubkey.clone(),
            created_at: event.created_at,
            event_ids,
            coordinates,
            reason: event.content.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_coordinate_parse() {
        let coordinate = Coordinate::parse("30023:abcd:my-article").unwrap();
        assert_eq!(coordinate.kind, 30023);
        assert_eq!(coordinate.pubkey, "abcd");
        assert_eq!(coordinate.identifier, "my-article");
        assert_eq!(coordinate.to_string(), "30023:abcd:my-article");

        let no_d = Coordinate::parse("10000:abcd").unwrap();
        assert_eq!(no_d.identifier, "");

        assert!(Coordinate::parse("note:abcd:x").is_err());
        assert!(Coordinate::parse("1").is_err());
    }

    #[test]
    fn test_deletion_request_targets() {
        let author = "a".repeat(64);
        let other = "b".repeat(64);
        let event = Event {
            id: "0".repeat(64),
            pubkey: author.clone(),
            created_at: 50,
            kind: KIND_DELETION,
            tags: vec![
                tag(&["e", "id-1"]),
                tag(&["e"]),
                tag(&["a", &format!("30023:{author}:post")]),
                tag(&["a", &format!("30023:{other}:post")]),
            ],
            content: "oops".to_string(),
            sig: "0".repeat(128),
        };

        let request = DeletionRequest::from_event(&event).unwrap();
        assert_eq!(request.event_ids, vec!["id-1"]);
        assert_eq!(request.coordinates.len(), 1);
        assert_eq!(request.coordinates[0].pubkey, author);
        assert_eq!(request.reason, "oops");
    }
}
