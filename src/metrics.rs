//! Metric helpers for the reassembly engine.
//!
//! This module defines metric names and thin helpers wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::processor::IngestError;

/// Name of the counter tracking fragments handed to the processor.
pub const FRAGMENTS_RECEIVED: &str = "udp_reassembler_fragments_received_total";
/// Name of the counter tracking messages that completed and validated.
pub const MESSAGES_COMPLETED: &str = "udp_reassembler_messages_completed_total";
/// Name of the counter tracking rejected fragments and discarded messages.
pub const FRAGMENTS_REJECTED: &str = "udp_reassembler_fragments_rejected_total";
/// Name of the counter tracking incomplete messages evicted by the sweeper.
pub const STALE_EVICTIONS: &str = "udp_reassembler_stale_evictions_total";
/// Name of the counter tracking datagrams dropped as retransmitted duplicates.
pub const DUPLICATE_DATAGRAMS: &str = "udp_reassembler_duplicate_datagrams_total";
/// Name of the counter tracking datagrams whose header failed to decode.
pub const MALFORMED_DATAGRAMS: &str = "udp_reassembler_malformed_datagrams_total";
/// Name of the gauge tracking messages currently in flight.
pub const MESSAGES_IN_FLIGHT: &str = "udp_reassembler_messages_in_flight";

/// Short label describing why a fragment was rejected.
#[must_use]
pub fn rejection_reason(error: &IngestError) -> &'static str {
    match error {
        IngestError::MetadataConflict { .. } => "metadata_conflict",
        IngestError::AlreadyCompleted { .. } => "already_completed",
        IngestError::DuplicateFragment { .. } => "duplicate_fragment",
        IngestError::IndexOutOfRange { .. } => "index_out_of_range",
        IngestError::DigestMismatch { .. } => "digest_mismatch",
    }
}

/// Record a fragment handed to the processor.
pub fn inc_fragments() {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_RECEIVED).increment(1);
}

/// Record a completed, validated message.
pub fn inc_completed() {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_COMPLETED).increment(1);
}

/// Record a rejection, labelled by reason.
pub fn inc_rejected(error: &IngestError) {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_REJECTED, "reason" => rejection_reason(error)).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = error;
}

/// Record a stale eviction.
pub fn inc_stale_evictions() {
    #[cfg(feature = "metrics")]
    counter!(STALE_EVICTIONS).increment(1);
}

/// Record a datagram dropped as a duplicate.
pub fn inc_duplicate_datagrams() {
    #[cfg(feature = "metrics")]
    counter!(DUPLICATE_DATAGRAMS).increment(1);
}

/// Record a datagram whose header could not be decoded.
pub fn inc_malformed_datagrams() {
    #[cfg(feature = "metrics")]
    counter!(MALFORMED_DATAGRAMS).increment(1);
}

/// Publish the current number of in-flight messages.
#[cfg_attr(
    feature = "metrics",
    expect(
        clippy::cast_precision_loss,
        reason = "gauge values are f64; in-flight counts stay far below 2^52"
    )
)]
pub fn set_in_flight(count: usize) {
    #[cfg(feature = "metrics")]
    gauge!(MESSAGES_IN_FLIGHT).set(count as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}
