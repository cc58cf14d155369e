//! Rejection reasons and outcomes reported by fragment ingestion.
//!
//! None of these propagate to the datagram source as failures. They are
//! logged where they occur and handed back to the caller purely for
//! inspection.

use std::num::NonZeroU32;

use thiserror::Error;

use crate::{
    digest::MessageDigest,
    message::{FragmentIndex, MessageKey},
};

/// Why a fragment was not applied, or why a message was discarded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    /// A later fragment disagreed with the metadata fixed by the first one.
    #[error(
        "metadata conflict for key {key}: expected count {expected_count} and digest \
         {expected_digest}, found count {found_count} and digest {found_digest}"
    )]
    MetadataConflict {
        /// Key of the in-flight message.
        key: MessageKey,
        /// Count fixed by the first fragment.
        expected_count: NonZeroU32,
        /// Digest fixed by the first fragment.
        expected_digest: MessageDigest,
        /// Count carried by the rejected fragment.
        found_count: NonZeroU32,
        /// Digest carried by the rejected fragment.
        found_digest: MessageDigest,
    },
    /// The key already completed and is still tombstoned or held in storage.
    #[error("fragment for already completed key {key}")]
    AlreadyCompleted {
        /// Key of the completed message.
        key: MessageKey,
    },
    /// A fragment with this index was already recorded.
    #[error("duplicate fragment {index} for key {key}")]
    DuplicateFragment {
        /// Key of the in-flight message.
        key: MessageKey,
        /// Index carried twice.
        index: FragmentIndex,
    },
    /// The fragment index lies outside `0..expected_count`.
    #[error("fragment index {index} out of range for key {key} expecting {expected_count}")]
    IndexOutOfRange {
        /// Key of the message.
        key: MessageKey,
        /// Offending index.
        index: FragmentIndex,
        /// Count the index was checked against.
        expected_count: NonZeroU32,
    },
    /// The assembled bytes did not hash to the announced digest.
    #[error("digest mismatch for key {key}: expected {expected}, computed {actual}")]
    DigestMismatch {
        /// Key of the discarded message.
        key: MessageKey,
        /// Digest announced by the sender.
        expected: MessageDigest,
        /// Digest of the assembled bytes.
        actual: MessageDigest,
    },
}

impl IngestError {
    /// Whether the error discarded an in-flight message rather than
    /// rejecting a single fragment.
    #[must_use]
    pub const fn discarded_message(&self) -> bool { matches!(self, Self::DigestMismatch { .. }) }
}

/// What happened to a fragment handed to
/// [`MessageProcessor::process_fragment`](super::MessageProcessor::process_fragment).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// The fragment was recorded and more are required.
    Buffered {
        /// Fragments recorded so far.
        received: u32,
        /// Fragments required for completeness.
        expected: NonZeroU32,
    },
    /// The fragment completed the message, which validated and was handed off.
    Completed,
    /// The fragment was rejected or the message was discarded.
    Rejected(IngestError),
}
