//! In-flight message state and the metadata carried by each fragment.

use std::{num::NonZeroU32, time::Duration};

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::{
    digest::MessageDigest,
    message::{FragmentIndex, MessageKey},
};

/// Metadata accompanying every fragment.
///
/// Only the values carried by the first fragment of a message are binding;
/// later fragments must repeat them exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentMeta {
    expected_count: NonZeroU32,
    expected_digest: MessageDigest,
    index: Option<FragmentIndex>,
}

impl FragmentMeta {
    /// Metadata for an un-indexed fragment; payloads assemble in arrival order.
    #[must_use]
    pub const fn new(expected_count: NonZeroU32, expected_digest: MessageDigest) -> Self {
        Self {
            expected_count,
            expected_digest,
            index: None,
        }
    }

    /// Attach the fragment's position within its message.
    #[must_use]
    pub const fn with_index(mut self, index: FragmentIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// Number of fragments that make up the message.
    #[must_use]
    pub const fn expected_count(&self) -> NonZeroU32 { self.expected_count }

    /// Digest the assembled message must match.
    #[must_use]
    pub const fn expected_digest(&self) -> MessageDigest { self.expected_digest }

    /// Position of the fragment, when the sender supplied one.
    #[must_use]
    pub const fn index(&self) -> Option<FragmentIndex> { self.index }
}

#[derive(Debug)]
struct Fragment {
    index: Option<FragmentIndex>,
    payload: Bytes,
}

/// Partial state for one message key.
///
/// `received_count` is derived from `fragments`, so the two cannot drift.
#[derive(Debug)]
pub(crate) struct Message {
    key: MessageKey,
    fragments: Vec<Fragment>,
    expected_count: NonZeroU32,
    expected_digest: MessageDigest,
    ready: bool,
    created_at: Instant,
}

impl Message {
    pub(crate) fn new(key: MessageKey, meta: &FragmentMeta, created_at: Instant) -> Self {
        Self {
            key,
            fragments: Vec::new(),
            expected_count: meta.expected_count,
            expected_digest: meta.expected_digest,
            ready: false,
            created_at,
        }
    }

    pub(crate) fn key(&self) -> &MessageKey { &self.key }

    pub(crate) fn expected_count(&self) -> NonZeroU32 { self.expected_count }

    pub(crate) fn expected_digest(&self) -> MessageDigest { self.expected_digest }

    pub(crate) fn received_count(&self) -> u32 {
        u32::try_from(self.fragments.len()).unwrap_or(u32::MAX)
    }

    pub(crate) fn is_ready(&self) -> bool { self.ready }

    pub(crate) fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Whether `meta` disagrees with the values fixed by the first fragment.
    pub(crate) fn conflicts_with(&self, meta: &FragmentMeta) -> bool {
        self.expected_count != meta.expected_count || self.expected_digest != meta.expected_digest
    }

    pub(crate) fn holds_index(&self, index: FragmentIndex) -> bool {
        self.fragments
            .iter()
            .any(|fragment| fragment.index == Some(index))
    }

    pub(crate) fn push(&mut self, index: Option<FragmentIndex>, payload: Bytes) {
        self.fragments.push(Fragment { index, payload });
    }

    /// Flip `ready` once the count threshold is met.
    ///
    /// Returns `true` only on the transition, so completion runs once.
    pub(crate) fn mark_ready_if_complete(&mut self) -> bool {
        if self.ready || self.received_count() < self.expected_count.get() {
            return false;
        }
        self.ready = true;
        true
    }

    /// Concatenate the fragments into the final byte sequence.
    ///
    /// Fragments are placed by index when every one of them carries an
    /// index; otherwise arrival order is used.
    pub(crate) fn assemble(&self) -> Bytes {
        let total = self.fragments.iter().map(|f| f.payload.len()).sum();
        let mut buffer = BytesMut::with_capacity(total);
        let mut ordered: Vec<&Fragment> = self.fragments.iter().collect();
        if ordered.iter().all(|fragment| fragment.index.is_some()) {
            ordered.sort_by_key(|fragment| fragment.index);
        }
        for fragment in ordered {
            buffer.extend_from_slice(&fragment.payload);
        }
        buffer.freeze()
    }
}
