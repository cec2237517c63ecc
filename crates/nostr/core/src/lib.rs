//! Nostr protocol types.
//!
//! This crate provides:
//! - NIP-01: Event structure, codec (decode, canonical id, verify) and signing
//! - NIP-02: Follow List (Contact List and Petnames)
//! - NIP-09: Event Deletion Request
//! - NIP-10: Event and author references carried by `e`/`p` tags
//! - NIP-40: Expiration Timestamp
//! - NIP-51: Mute lists
//!
//! Nothing here performs I/O. Decoding never trusts an event; callers must run
//! [`verify_event`] before acting on any field.
//!
//! # Example
//!
//! ```
//! use nostr::{EventTemplate, Keys, decode_event, verify_event};
//!
//! let keys = Keys::generate().unwrap();
//! let event = keys
//!     .sign(&EventTemplate {
//!         created_at: 1_700_000_000,
//!         kind: 1,
//!         tags: vec![],
//!         content: "hello".to_string(),
//!     })
//!     .unwrap();
//!
//! let wire = serde_json::to_vec(&event).unwrap();
//! let decoded = decode_event(&wire).unwrap();
//! assert!(verify_event(&decoded).is_ok());
//! ```

pub mod nip01;
pub mod nip02;
pub mod nip09;
pub mod nip10;
pub mod nip40;
pub mod nip51;


pub use nip01::{
    Event, EventTemplate, KIND_CONTACTS, KIND_DELETION, KIND_METADATA, KIND_MUTE_LIST,
    KIND_REACTION, KIND_SHORT_TEXT_NOTE, KindClassification, Keys, Nip01Error, UnsignedEvent,
    classify_kind, decode_event, finalize_event, generate_secret_key, get_event_hash,
    get_public_key, get_public_key_hex, is_addressable_kind, is_replaceable_kind, is_valid_event,
    serialize_event, sort_events, tag_value, validate_event, validate_unsigned_event,
    verify_event,
};
pub use nip02::{Contact, ContactList, Nip02Error, relays_from_content};
pub use nip09::{Coordinate, DeletionRequest, Nip09Error};
pub use nip10::{
    AuthorReference, ETagMarker, EventReference, Nip10Error, author_references, event_references,
};
pub use nip40::{expiration, is_expired};
pub use nip51::{MuteList, Nip51Error, mute_list_template};
