//! Nostr note model, canonical serialization and id derivation.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result as AnyResult};
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Kind number of a plain text note.
pub const KIND_TEXT_NOTE: u32 = 1;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// The first element names the tag and the rest carry data, e.g.
/// `["t", "news"]` becomes `Tag(vec!["t".into(), "news".into()])`. Notes
/// produced by the bridge never carry tags, but the shape is kept so the
/// canonical form matches what other implementations hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

/// Fields of a note before its id is known.
///
/// Nothing here can be changed after [`crate::signer::Signer::sign`] consumes
/// it, so the id is always computed over the final values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// Author public key (x-only, hex).
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

impl UnsignedEvent {
    /// Build a kind-1 note stamped with the current wall-clock time.
    pub fn text_note(pubkey: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            created_at: unix_now(),
            kind: KIND_TEXT_NOTE,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Override the creation timestamp.
    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Encode `[0, pubkey, created_at, kind, tags, content]` as compact JSON.
    ///
    /// Element order is fixed and serde_json emits no whitespace, so equal
    /// fields always yield identical bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let form = (
            0u8,
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );
        Ok(serde_json::to_vec(&form)?)
    }

    /// SHA-256 of the canonical bytes.
    pub fn id(&self) -> Result<EventId> {
        Ok(EventId::derive(&self.canonical_bytes()?))
    }
}

/// 32-byte content hash that doubles as the note's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId([u8; 32]);

impl EventId {
    /// Hash arbitrary canonical bytes.
    pub fn derive(canonical: &[u8]) -> Self {
        Self(Sha256::digest(canonical).into())
    }

    /// Parse a 64-character hex id.
    pub fn from_hex(s: &str) -> AnyResult<Self> {
        let bytes = hex::decode(s).with_context(|| format!("note id {s:?}"))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| anyhow!("note id: expected 32 bytes, got {}", v.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Signed note as sent to relays.
///
/// ```json
/// {
///   "id": "4f3c...",
///   "pubkey": "abab...",
///   "created_at": 1700000000,
///   "kind": 1,
///   "tags": [],
///   "content": "hi",
///   "sig": "9e1a..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Unix timestamp of creation.
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
    /// Schnorr signature over the raw id bytes (hex).
    pub sig: String,
}

impl Event {
    pub(crate) fn from_parts(unsigned: UnsignedEvent, id: EventId, sig: String) -> Self {
        Self {
            id: id.to_hex(),
            pubkey: unsigned.pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig,
        }
    }

    /// Fields covered by the id, detached from `id` and `sig`.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// Relay envelope `["EVENT", {...}]` as a text frame payload.
    pub fn to_envelope(&self) -> Result<String> {
        Ok(serde_json::to_string(&("EVENT", self))?)
    }

    /// Recompute the id and check the Schnorr signature against `pubkey`.
    pub fn verify(&self) -> AnyResult<()> {
        let claimed = EventId::from_hex(&self.id)?;
        let id = self.unsigned().id()?;
        if id != claimed {
            return Err(anyhow!("id mismatch: expected {}", id.to_hex()));
        }
        let sig = Signature::from_slice(&hex::decode(&self.sig)?)?;
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&self.pubkey)?)?;
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest(*id.as_bytes());
        secp.verify_schnorr(&sig, &msg, &pk)?;
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
