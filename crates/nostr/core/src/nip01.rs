//! NIP-01: Basic protocol flow description.
//!
//! This module implements the core Nostr event structure and the event codec:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Decoding untrusted wire bytes into an [`Event`]
//! - Canonical serialization and id hashing
//! - Event signing with Schnorr signatures
//! - Event verification (id recomputation, then signature)
//! - Kind classification (regular, replaceable, ephemeral, addressable)

use bitcoin::hashes::{Hash, sha256};
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, schnorr};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    /// The bytes are not a structurally valid event object.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// The declared id does not match the canonical serialization.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The signature does not verify against the declared pubkey.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

impl Event {
    /// Iterate the tags whose name (position 0) equals `name`.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag_value(tag, 0) == name)
            .map(Vec::as_slice)
    }

    /// First value (position 1) of the first tag named `name`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .filter(|tag| tag_value(tag, 0) == name)
            .map(|tag| tag_value(tag, 1))
            .find(|value| !value.is_empty())
    }

    /// The unsigned portion of this event, used to recompute its id.
    pub fn to_unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }
}

/// `"tags": null` decodes like a missing `tags` field.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Vec<String>>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Read position `index` of a tag, treating missing positions as empty.
///
/// Relays forward tags of irregular shape; a short tag must never fail the
/// whole event.
pub fn tag_value(tag: &[String], index: usize) -> &str {
    tag.get(index).map(String::as_str).unwrap_or("")
}

/// An unsigned event (before signing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

/// A template for creating events (without pubkey, which comes from the signing key).
///
/// # Examples
///
/// ```
/// use nostr::nip01::EventTemplate;
///
/// let template = EventTemplate {
///     created_at: 1_700_000_000,
///     kind: 1,
///     tags: vec![
///         vec!["e".to_string(), "event_id_to_reply_to".to_string()],
///         vec!["p".to_string(), "pubkey_to_mention".to_string()],
///     ],
///     content: "This is a reply with a mention".to_string(),
/// };
/// assert_eq!(template.kind, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

/// Event kind classification according to NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    /// Events expected to be stored by relays
    Regular,
    /// Only latest event per pubkey+kind is stored
    Replaceable,
    /// Not expected to be stored by relays
    Ephemeral,
    /// Only latest event per pubkey+kind+d-tag is stored
    Addressable,
    /// Unknown classification
    Unknown,
}

// Standard event kinds
pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_CONTACTS: u16 = 3;
pub const KIND_DELETION: u16 = 5;
pub const KIND_REACTION: u16 = 7;
pub const KIND_MUTE_LIST: u16 = 10000;

/// Generate a random 32-byte secret key.
pub fn generate_secret_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Get the public key (x-only, 32 bytes) from a secret key.
pub fn get_public_key(secret_key: &[u8; 32]) -> Result<[u8; 32], Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| Nip01Error::InvalidPublicKey(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(xonly.serialize())
}

/// Get the public key as a hex string from a secret key.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    Ok(hex::encode(get_public_key(secret_key)?))
}

/// A secret key paired with its hex x-only public key.
#[derive(Clone)]
pub struct Keys {
    secret_key: [u8; 32],
    public_key: String,
}

impl Keys {
    /// Build keys from an existing secret key.
    pub fn new(secret_key: [u8; 32]) -> Result<Self, Nip01Error> {
        let public_key = get_public_key_hex(&secret_key)?;
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Generate a fresh random key pair.
    pub fn generate() -> Result<Self, Nip01Error> {
        Self::new(generate_secret_key())
    }

    /// Parse a 64-character hex secret key.
    pub fn from_hex(secret_hex: &str) -> Result<Self, Nip01Error> {
        let bytes = hex::decode(secret_hex)
            .map_err(|e| Nip01Error::InvalidPublicKey(format!("invalid secret key hex: {e}")))?;
        let secret_key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Nip01Error::InvalidPublicKey("secret key must be 32 bytes".into()))?;
        Self::new(secret_key)
    }

    /// Hex x-only public key.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign a template with these keys.
    pub fn sign(&self, template: &EventTemplate) -> Result<Event, Nip01Error> {
        finalize_event(template, &self.secret_key)
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Decode untrusted wire bytes into an event.
///
/// Only the structure is checked here; nothing about the event is trusted
/// until [`verify_event`] succeeds.
pub fn decode_event(bytes: &[u8]) -> Result<Event, Nip01Error> {
    serde_json::from_slice(bytes).map_err(|e| Nip01Error::MalformedEvent(e.to_string()))
}

/// Serialize an unsigned event for hashing.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`. serde_json never
/// escapes forward slashes, which matches the canonical form.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Get the event hash (id) from an unsigned event.
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.as_byte_array()))
}

fn is_hex_of_len(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate an unsigned event structure.
pub fn validate_unsigned_event(event: &UnsignedEvent) -> bool {
    is_hex_of_len(&event.pubkey, 64) && event.pubkey == event.pubkey.to_lowercase()
}

/// Validate a signed event structure (not including signature verification).
pub fn validate_event(event: &Event) -> bool {
    is_hex_of_len(&event.id, 64)
        && is_hex_of_len(&event.pubkey, 64)
        && event.pubkey == event.pubkey.to_lowercase()
        && is_hex_of_len(&event.sig, 128)
}

/// Sign an event template with a secret key, producing a complete signed event.
pub fn finalize_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::new();

    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Signing(e.to_string()))?;
    let (xonly_pk, _parity) = sk.x_only_public_key(&secp);
    let pubkey = hex::encode(xonly_pk.serialize());

    let unsigned = UnsignedEvent {
        pubkey: pubkey.clone(),
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
    };
    let id = get_event_hash(&unsigned)?;

    let id_bytes =
        hex::decode(&id).map_err(|e| Nip01Error::Signing(format!("invalid id hex: {}", e)))?;
    let message = Message::from_digest_slice(&id_bytes)
        .map_err(|e| Nip01Error::Signing(format!("invalid message: {}", e)))?;

    let keypair = Keypair::from_secret_key(&secp, &sk);
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);

    Ok(Event {
        id,
        pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
        sig: hex::encode(sig.serialize()),
    })
}

/// Verify an event's id and signature.
///
/// The id is recomputed from the canonical serialization first; a mismatch
/// is [`Nip01Error::InvalidIdentifier`]. The Schnorr signature over the id
/// bytes is then checked against the x-only `pubkey`; a mismatch is
/// [`Nip01Error::InvalidSignature`].
pub fn verify_event(event: &Event) -> Result<(), Nip01Error> {
    if !is_hex_of_len(&event.id, 64) {
        return Err(Nip01Error::InvalidIdentifier(format!(
            "id must be 64 hex characters, got {:?}",
            event.id
        )));
    }
    if !validate_event(event) {
        return Err(Nip01Error::InvalidSignature(
            "pubkey or sig has the wrong shape".to_string(),
        ));
    }

    let computed_id = get_event_hash(&event.to_unsigned())?;
    if computed_id != event.id {
        return Err(Nip01Error::InvalidIdentifier(format!(
            "declared {} but content hashes to {}",
            event.id, computed_id
        )));
    }

    let secp = Secp256k1::verification_only();

    let id_bytes = hex::decode(&event.id)
        .map_err(|e| Nip01Error::InvalidIdentifier(format!("invalid id hex: {}", e)))?;
    let message = Message::from_digest_slice(&id_bytes)
        .map_err(|e| Nip01Error::InvalidIdentifier(format!("invalid message: {}", e)))?;

    let sig_bytes = hex::decode(&event.sig)
        .map_err(|e| Nip01Error::InvalidSignature(format!("invalid sig hex: {}", e)))?;
    let sig = schnorr::Signature::from_slice(&sig_bytes)
        .map_err(|e| Nip01Error::InvalidSignature(e.to_string()))?;

    let pubkey_bytes = hex::decode(&event.pubkey)
        .map_err(|e| Nip01Error::InvalidSignature(format!("invalid pubkey hex: {}", e)))?;
    let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| Nip01Error::InvalidSignature(format!("invalid pubkey: {}", e)))?;

    secp.verify_schnorr(&sig, &message, &pubkey)
        .map_err(|e| Nip01Error::InvalidSignature(e.to_string()))
}

/// Boolean form of [`verify_event`].
pub fn is_valid_event(event: &Event) -> bool {
    verify_event(event).is_ok()
}

/// Classify an event kind according to NIP-01 rules.
pub fn classify_kind(kind: u16) -> KindClassification {
    let k = kind as u32;

    if (1000..10000).contains(&k) || (4..45).contains(&k) || k == 1 || k == 2 {
        return KindClassification::Regular;
    }

    if (10000..20000).contains(&k) || k == 0 || k == 3 {
        return KindClassification::Replaceable;
    }

    if (20000..30000).contains(&k) {
        return KindClassification::Ephemeral;
    }

    if (30000..40000).contains(&k) {
        return KindClassification::Addressable;
    }

    KindClassification::Unknown
}

/// Check if a kind is replaceable.
pub fn is_replaceable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Replaceable)
}

/// Check if a kind is addressable.
pub fn is_addressable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Addressable)
}

/// Sort events in reverse-chronological order by created_at,
/// then by id (lexicographically) in case of ties.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| match b.created_at.cmp(&a.created_at) {
        std::cmp::Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
}
