//! Identifiers and the finalised message type shared across the engine.
//!
//! [`MessageKey`] correlates the fragments of one logical message and
//! [`FragmentIndex`] optionally places a fragment within it. A
//! [`CompletedMessage`] is what leaves the engine once every fragment has
//! arrived and the digest has been verified.

use bincode::{Decode, Encode};
use bytes::Bytes;
use derive_more::{Display, From, Into};

use crate::digest::MessageDigest;

/// Opaque identifier correlating all fragments of one logical message.
///
/// The engine never interprets the key's structure.
///
/// # Examples
///
/// ```
/// use udp_reassembler::MessageKey;
///
/// let key = MessageKey::from("session-7");
/// assert_eq!(key.as_str(), "session-7");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into)]
#[display("{_0}")]
pub struct MessageKey(String);

impl MessageKey {
    /// Create a key from any string-like value.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self { Self(key.into()) }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for MessageKey {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

/// Zero-based position of a fragment within its message.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Display, From, Into,
)]
#[display("{_0}")]
pub struct FragmentIndex(u32);

impl FragmentIndex {
    /// Create an index from its numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Return the numeric index.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }
}

/// A fully assembled message whose digest matched the announced value.
///
/// Instances are immutable; the payload is reference counted so clones are
/// cheap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedMessage {
    key: MessageKey,
    payload: Bytes,
    digest: MessageDigest,
}

impl CompletedMessage {
    pub(crate) fn new(key: MessageKey, payload: Bytes, digest: MessageDigest) -> Self {
        Self {
            key,
            payload,
            digest,
        }
    }

    /// Key shared by the fragments that formed this message.
    #[must_use]
    pub fn key(&self) -> &MessageKey { &self.key }

    /// Borrow the assembled bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Verified SHA-256 digest of [`payload`](Self::payload).
    #[must_use]
    pub const fn digest(&self) -> MessageDigest { self.digest }

    /// Consume the message, returning the assembled bytes.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }
}
