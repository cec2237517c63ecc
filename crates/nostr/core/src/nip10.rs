//! NIP-10: Text Notes and Threads
//!
//! `e` tags reference other events with an optional relay hint and marker
//! (root, reply, mention); `p` tags reference participants.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/10.md>

use crate::{Event, tag_value};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during NIP-10 operations
#[derive(Debug, Error)]
pub enum Nip10Error {
    #[error("invalid e-tag format: {0}")]
    InvalidETag(String),

    #[error("invalid p-tag format: {0}")]
    InvalidPTag(String),
}

/// E-tag marker types for thread structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ETagMarker {
    /// The root event of a thread
    Root,

    /// The immediate parent event being replied to
    Reply,

    /// A mentioned event (not part of reply chain)
    Mention,
}

impl ETagMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            ETagMarker::Root => "root",
            ETagMarker::Reply => "reply",
            ETagMarker::Mention => "mention",
        }
    }
}

impl FromStr for ETagMarker {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(ETagMarker::Root),
            "reply" => Ok(ETagMarker::Reply),
            "mention" => Ok(ETagMarker::Mention),
            _ => Err(()),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// An e-tag reference to another event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReference {
    /// Event ID being referenced
    pub event_id: String,

    /// Recommended relay URL (optional)
    pub relay_url: Option<String>,

    /// Marker indicating role in thread (optional)
    pub marker: Option<ETagMarker>,
}

impl EventReference {
    /// Parse an event reference from an e-tag.
    ///
    /// Unknown markers are dropped rather than rejected.
    pub fn from_tag(tag: &[String]) -> Result<Self, Nip10Error> {
        if tag_value(tag, 0) != "e" {
            return Err(Nip10Error::InvalidETag(
                "tag must start with 'e'".to_string(),
            ));
        }

        let event_id = tag_value(tag, 1);
        if event_id.is_empty() {
            return Err(Nip10Error::InvalidETag(
                "e-tag must have at least event ID".to_string(),
            ));
        }

        Ok(Self {
            event_id: event_id.to_string(),
            relay_url: non_empty(tag_value(tag, 2)),
            marker: ETagMarker::from_str(tag_value(tag, 3)).ok(),
        })
    }

    /// Convert to an e-tag array
    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec!["e".to_string(), self.event_id.clone()];
        tag.push(self.relay_url.clone().unwrap_or_default());
        if let Some(marker) = self.marker {
            tag.push(marker.as_str().to_string());
        }
        tag
    }
}

/// A p-tag reference to an author
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorReference {
    pub pubkey: String,
    pub relay_url: Option<String>,
}

impl AuthorReference {
    pub fn from_tag(tag: &[String]) -> Result<Self, Nip10Error> {
        if tag_value(tag, 0) != "p" {
            return Err(Nip10Error::InvalidPTag(
                "tag must start with 'p'".to_string(),
            ));
        }
        let pubkey = tag_value(tag, 1);
        if !crate::nip02::is_hex_pubkey(pubkey) {
            return Err(Nip10Error::InvalidPTag(format!(
                "pubkey must be 64-character hex, got: {}",
                pubkey
            )));
        }
        Ok(Self {
            pubkey: pubkey.to_lowercase(),
            relay_url: non_empty(tag_value(tag, 2)),
        })
    }
}

/// All well-formed e-tag references of an event, in tag order.
pub fn event_references(event: &Event) -> Vec<EventReference> {
    event
        .tags_named("e")
        .filter_map(|tag| EventReference::from_tag(tag).ok())
        .collect()
}

/// All well-formed p-tag references of an event, in tag order.
pub fn author_references(event: &Event) -> Vec<AuthorReference> {
    event
        .tags_named("p")
        .filter_map(|tag| AuthorReference::from_tag(tag).ok())
        .collect()
}
