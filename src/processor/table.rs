//! Lock-free core of the in-flight table.
//!
//! `InFlightTable` holds every partial [`Message`] plus completion
//! tombstones. It performs no locking and no logging of its own;
//! [`MessageProcessor`](super::MessageProcessor) wraps it in a single
//! reader/writer lock so ingestion and sweeps share one exclusivity
//! discipline.

use std::{
    collections::{HashMap, hash_map::Entry},
    num::NonZeroU32,
    time::Duration,
};

use bytes::Bytes;
use tokio::time::Instant;

use super::{FragmentMeta, IngestError, MessageStatus, message::Message};
use crate::{
    digest::MessageDigest,
    message::{CompletedMessage, MessageKey},
};

/// Result of applying a fragment that was accepted.
#[derive(Debug)]
pub(crate) enum Ingested {
    Buffered { received: u32, expected: NonZeroU32 },
    Completed(CompletedMessage),
}

#[derive(Debug, Default)]
pub(crate) struct InFlightTable {
    messages: HashMap<MessageKey, Message>,
    tombstones: HashMap<MessageKey, Instant>,
}

impl InFlightTable {
    /// Record a fragment and, if it completes its message, validate and
    /// remove the message in the same call.
    pub(crate) fn ingest(
        &mut self,
        key: MessageKey,
        payload: Bytes,
        meta: &FragmentMeta,
        now: Instant,
    ) -> Result<Ingested, IngestError> {
        if self.tombstones.contains_key(&key) {
            return Err(IngestError::AlreadyCompleted { key });
        }
        if let Some(index) = meta.index()
            && index.get() >= meta.expected_count().get()
        {
            return Err(IngestError::IndexOutOfRange {
                key,
                index,
                expected_count: meta.expected_count(),
            });
        }

        let mut entry = match self.messages.entry(key) {
            Entry::Occupied(occupied) => {
                let message = occupied.get();
                if message.conflicts_with(meta) {
                    return Err(IngestError::MetadataConflict {
                        key: occupied.key().clone(),
                        expected_count: message.expected_count(),
                        expected_digest: message.expected_digest(),
                        found_count: meta.expected_count(),
                        found_digest: meta.expected_digest(),
                    });
                }
                if let Some(index) = meta.index()
                    && message.holds_index(index)
                {
                    return Err(IngestError::DuplicateFragment {
                        key: occupied.key().clone(),
                        index,
                    });
                }
                occupied
            }
            Entry::Vacant(vacant) => {
                let message = Message::new(vacant.key().clone(), meta, now);
                vacant.insert_entry(message)
            }
        };

        let message = entry.get_mut();
        message.push(meta.index(), payload);
        if !message.mark_ready_if_complete() {
            return Ok(Ingested::Buffered {
                received: message.received_count(),
                expected: message.expected_count(),
            });
        }

        // Ready messages leave the table within this call, so the sweeper
        // never observes one.
        let message = entry.remove();
        let payload = message.assemble();
        let actual = MessageDigest::compute(&payload);
        let key = message.key().clone();
        if actual != message.expected_digest() {
            return Err(IngestError::DigestMismatch {
                key,
                expected: message.expected_digest(),
                actual,
            });
        }

        self.tombstones.insert(key.clone(), now);
        Ok(Ingested::Completed(CompletedMessage::new(
            key, payload, actual,
        )))
    }

    /// Evict incomplete messages older than `grace` and expire tombstones
    /// of the same age.
    ///
    /// Returns the keys of evicted messages.
    pub(crate) fn sweep_at(&mut self, now: Instant, grace: Duration) -> Vec<MessageKey> {
        let mut evicted = Vec::new();
        self.messages.retain(|key, message| {
            let stale = !message.is_ready() && message.age_at(now) > grace;
            if stale {
                evicted.push(key.clone());
            }
            !stale
        });
        self.tombstones
            .retain(|_, completed_at| now.saturating_duration_since(*completed_at) <= grace);
        evicted
    }

    /// Status as far as the in-flight table knows; `None` means unknown here.
    pub(crate) fn status(&self, key: &MessageKey) -> Option<MessageStatus> {
        if self.tombstones.contains_key(key) {
            return Some(MessageStatus::Completed);
        }
        self.messages
            .get(key)
            .map(|message| MessageStatus::InFlight {
                received: message.received_count(),
                expected: message.expected_count(),
            })
    }

    pub(crate) fn len(&self) -> usize { self.messages.len() }

    pub(crate) fn tombstone_count(&self) -> usize { self.tombstones.len() }
}
