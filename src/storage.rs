//! Keyed store for fully assembled, validated messages.
//!
//! `CompletedStorage` is deliberately separate from the in-flight table so
//! completed messages are never touched by the stale sweep. It has no
//! expiry; retention is the consumer's decision.

use dashmap::DashMap;

use crate::message::{CompletedMessage, MessageKey};

/// Concurrent map of completed messages keyed by [`MessageKey`].
///
/// `DashMap` shards its locks, so readers of one key do not contend with
/// writers of another.
#[derive(Debug, Default)]
pub struct CompletedStorage(DashMap<MessageKey, CompletedMessage>);

impl CompletedStorage {
    /// Store `message` under its own key, returning any message it replaced.
    pub fn put(&self, message: CompletedMessage) -> Option<CompletedMessage> {
        self.0.insert(message.key().clone(), message)
    }

    /// Fetch a copy of the message stored under `key`.
    #[must_use]
    pub fn get(&self, key: &MessageKey) -> Option<CompletedMessage> {
        self.0.get(key).map(|entry| entry.value().clone())
    }

    /// Whether a message is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &MessageKey) -> bool { self.0.contains_key(key) }

    /// Remove the message stored under `key`. Absent keys are a no-op.
    pub fn remove(&self, key: &MessageKey) -> Option<CompletedMessage> {
        self.0.remove(key).map(|(_, message)| message)
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}
