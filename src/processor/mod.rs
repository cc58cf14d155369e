//! Fragment ingestion, completeness evaluation, and hand-off.
//!
//! [`MessageProcessor`] owns the in-flight table mapping each
//! [`MessageKey`] to its partial state. Every mutation, including the
//! periodic stale sweep, happens under one exclusive lock; status queries
//! take the shared side. A fragment that completes its message is
//! validated inside that critical section. The lock is released before the
//! validated message is written to [`CompletedStorage`] and the
//! [`CompletionSink`] is notified, so the engine never holds two locks at
//! once.
//!
//! Ingestion never fails from the caller's point of view. Rejections are
//! logged and returned as a [`FragmentOutcome`] for inspection only.

pub mod error;
mod message;
pub mod sink;
mod table;

use std::{
    num::NonZeroU32,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use bytes::Bytes;
pub use error::{FragmentOutcome, IngestError};
pub use message::FragmentMeta;
pub use sink::{ChannelSink, CompletionSink, NoopSink};
use table::{InFlightTable, Ingested};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{message::MessageKey, metrics, storage::CompletedStorage};

/// Where a message key currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageStatus {
    /// Nothing is known about the key.
    Absent,
    /// Fragments are still being collected.
    InFlight {
        /// Fragments recorded so far.
        received: u32,
        /// Fragments required for completeness.
        expected: NonZeroU32,
    },
    /// The message completed and validated.
    Completed,
}

/// Concurrent owner of all in-flight messages.
///
/// # Examples
///
/// ```
/// use std::{num::NonZeroU32, sync::Arc, time::Duration};
///
/// use udp_reassembler::{
///     CompletedStorage,
///     FragmentMeta,
///     FragmentOutcome,
///     MessageDigest,
///     MessageKey,
///     MessageProcessor,
/// };
///
/// let storage = Arc::new(CompletedStorage::default());
/// let processor = MessageProcessor::new(Duration::from_secs(30), Arc::clone(&storage));
/// let meta = FragmentMeta::new(
///     NonZeroU32::new(2).expect("non-zero"),
///     MessageDigest::compute(b"hello world"),
/// );
///
/// let key = MessageKey::from("greeting");
/// processor.process_fragment(key.clone(), &b"hello "[..], meta);
/// let outcome = processor.process_fragment(key.clone(), &b"world"[..], meta);
///
/// assert_eq!(outcome, FragmentOutcome::Completed);
/// let stored = storage.get(&key).expect("message stored");
/// assert_eq!(stored.payload(), b"hello world");
/// ```
pub struct MessageProcessor {
    table: RwLock<InFlightTable>,
    storage: Arc<CompletedStorage>,
    sink: Arc<dyn CompletionSink>,
    grace_period: Duration,
}

impl std::fmt::Debug for MessageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProcessor")
            .field("in_flight", &self.in_flight_len())
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

impl MessageProcessor {
    /// Create a processor that evicts incomplete messages older than
    /// `grace_period` and stores completed ones in `storage`.
    #[must_use]
    pub fn new(grace_period: Duration, storage: Arc<CompletedStorage>) -> Self {
        Self {
            table: RwLock::new(InFlightTable::default()),
            storage,
            sink: Arc::new(NoopSink),
            grace_period,
        }
    }

    /// Notify `sink` of every completed message.
    #[must_use]
    pub fn with_sink(mut self, sink: impl CompletionSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Grace period after which incomplete messages are considered stale.
    #[must_use]
    pub const fn grace_period(&self) -> Duration { self.grace_period }

    /// Storage receiving validated messages.
    #[must_use]
    pub fn storage(&self) -> &Arc<CompletedStorage> { &self.storage }

    /// Ingest one fragment using the current time.
    pub fn process_fragment(
        &self,
        key: MessageKey,
        payload: impl Into<Bytes>,
        meta: FragmentMeta,
    ) -> FragmentOutcome {
        self.process_fragment_at(key, payload, meta, Instant::now())
    }

    /// Ingest one fragment using an explicit clock reading.
    ///
    /// The first fragment seen for a key fixes its expected count and
    /// digest. When the fragment completes the message, the assembled bytes
    /// are hashed and either handed off or discarded before the lock is
    /// released. Fragments for a key still held in [`CompletedStorage`] are
    /// rejected until that entry is removed.
    pub fn process_fragment_at(
        &self,
        key: MessageKey,
        payload: impl Into<Bytes>,
        meta: FragmentMeta,
        now: Instant,
    ) -> FragmentOutcome {
        metrics::inc_fragments();
        // The table lock and storage are never held together.
        let result = if self.storage.contains(&key) {
            Err(IngestError::AlreadyCompleted { key })
        } else {
            let (result, in_flight) = {
                let mut table = self.write_table();
                let result = table.ingest(key, payload.into(), &meta, now);
                (result, table.len())
            };
            metrics::set_in_flight(in_flight);
            result
        };

        match result {
            Ok(Ingested::Buffered { received, expected }) => {
                FragmentOutcome::Buffered { received, expected }
            }
            Ok(Ingested::Completed(message)) => {
                info!(
                    key = %message.key(),
                    bytes = message.payload().len(),
                    digest = %message.digest(),
                    "message completed"
                );
                metrics::inc_completed();
                self.storage.put(message.clone());
                self.sink.deliver(&message);
                FragmentOutcome::Completed
            }
            Err(err) => {
                Self::log_rejection(&err);
                FragmentOutcome::Rejected(err)
            }
        }
    }

    /// Evict stale incomplete messages using the current time.
    pub fn sweep_stale(&self) -> Vec<MessageKey> { self.sweep_stale_at(Instant::now()) }

    /// Evict every message that is not ready and has been in flight longer
    /// than the grace period, measured at `now`.
    ///
    /// Completion tombstones older than the grace period are dropped in the
    /// same pass. Returns the evicted keys.
    pub fn sweep_stale_at(&self, now: Instant) -> Vec<MessageKey> {
        let (evicted, in_flight) = {
            let mut table = self.write_table();
            let evicted = table.sweep_at(now, self.grace_period);
            (evicted, table.len())
        };
        metrics::set_in_flight(in_flight);
        for key in &evicted {
            info!(key = %key, "evicted stale incomplete message");
            metrics::inc_stale_evictions();
        }
        evicted
    }

    /// Report where `key` stands.
    #[must_use]
    pub fn status(&self, key: &MessageKey) -> MessageStatus {
        let known = self.read_table().status(key);
        match known {
            Some(status) => status,
            None if self.storage.contains(key) => MessageStatus::Completed,
            None => MessageStatus::Absent,
        }
    }

    /// Number of messages currently in flight.
    #[must_use]
    pub fn in_flight_len(&self) -> usize { self.read_table().len() }

    /// Number of live completion tombstones.
    #[must_use]
    pub fn tombstone_len(&self) -> usize { self.read_table().tombstone_count() }

    fn log_rejection(err: &IngestError) {
        metrics::inc_rejected(err);
        match err {
            IngestError::MetadataConflict { key, .. } => {
                warn!(key = %key, error = %err, "fragment rejected");
            }
            IngestError::DigestMismatch { key, .. } => {
                warn!(key = %key, error = %err, "message failed validation; discarded");
            }
            IngestError::IndexOutOfRange { key, .. } => {
                warn!(key = %key, error = %err, "fragment rejected");
            }
            IngestError::AlreadyCompleted { key } | IngestError::DuplicateFragment { key, .. } => {
                debug!(key = %key, error = %err, "duplicate fragment ignored");
            }
        }
    }

    // Poisoning is ignored; table methods never leave partial updates.
    fn write_table(&self) -> RwLockWriteGuard<'_, InFlightTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_table(&self) -> RwLockReadGuard<'_, InFlightTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests;
