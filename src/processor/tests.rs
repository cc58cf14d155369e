//! Unit tests for `MessageProcessor` ingestion, validation, and sweeping.

use std::{
    num::NonZeroU32,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use bytes::Bytes;
use proptest::prelude::*;
use rstest::{fixture, rstest};
use tokio::time::Instant;
use tracing_test::traced_test;

use super::{FragmentMeta, FragmentOutcome, IngestError, MessageProcessor, MessageStatus};
use crate::{
    digest::MessageDigest,
    message::{CompletedMessage, FragmentIndex, MessageKey},
    storage::CompletedStorage,
};

const GRACE: Duration = Duration::from_secs(30);

#[fixture]
fn processor() -> MessageProcessor {
    MessageProcessor::new(GRACE, Arc::new(CompletedStorage::default()))
}

fn meta_for(count: u32, message: &[u8]) -> FragmentMeta {
    FragmentMeta::new(
        NonZeroU32::new(count).expect("non-zero"),
        MessageDigest::compute(message),
    )
}

/// Processor whose sink records every completion it sees.
fn recording_processor() -> (MessageProcessor, Arc<Mutex<Vec<CompletedMessage>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let processor = MessageProcessor::new(GRACE, Arc::new(CompletedStorage::default()))
        .with_sink(move |message: &CompletedMessage| {
            sink_seen.lock().expect("lock").push(message.clone());
        });
    (processor, seen)
}

#[test]
fn three_fragments_with_correct_digest_complete_once() {
    let (processor, seen) = recording_processor();
    let key = MessageKey::from("m1");
    let meta = meta_for(3, b"abcdef");

    let outcomes: Vec<_> = ["ab", "cd", "ef"]
        .into_iter()
        .map(|part| processor.process_fragment(key.clone(), Bytes::from(part), meta))
        .collect();

    assert_eq!(
        outcomes[..2],
        [
            FragmentOutcome::Buffered {
                received: 1,
                expected: meta.expected_count()
            },
            FragmentOutcome::Buffered {
                received: 2,
                expected: meta.expected_count()
            },
        ]
    );
    assert_eq!(outcomes[2], FragmentOutcome::Completed);

    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload(), b"abcdef");
    assert_eq!(seen[0].digest(), MessageDigest::compute(b"abcdef"));
    assert_eq!(processor.status(&key), MessageStatus::Completed);
    assert_eq!(processor.in_flight_len(), 0);
    assert_eq!(
        processor
            .storage()
            .get(&key)
            .expect("stored")
            .payload(),
        b"abcdef"
    );
}

#[traced_test]
#[test]
fn wrong_digest_discards_message() {
    let (processor, seen) = recording_processor();
    let key = MessageKey::from("m1");
    let meta = meta_for(3, b"something else");

    processor.process_fragment(key.clone(), Bytes::from_static(b"ab"), meta);
    processor.process_fragment(key.clone(), Bytes::from_static(b"cd"), meta);
    let outcome = processor.process_fragment(key.clone(), Bytes::from_static(b"ef"), meta);

    assert!(matches!(
        outcome,
        FragmentOutcome::Rejected(IngestError::DigestMismatch { .. })
    ));
    assert!(seen.lock().expect("lock").is_empty());
    assert_eq!(processor.status(&key), MessageStatus::Absent);
    assert!(processor.storage().is_empty());
    assert!(logs_contain("message failed validation"));
}

#[rstest]
fn status_reports_progress(processor: MessageProcessor) {
    let key = MessageKey::from("m1");
    assert_eq!(processor.status(&key), MessageStatus::Absent);

    processor.process_fragment(key.clone(), Bytes::from_static(b"ab"), meta_for(3, b"abcdef"));

    assert_eq!(
        processor.status(&key),
        MessageStatus::InFlight {
            received: 1,
            expected: NonZeroU32::new(3).expect("non-zero"),
        }
    );
}

#[rstest]
#[traced_test]
fn conflicting_metadata_is_rejected_without_state_change(processor: MessageProcessor) {
    let key = MessageKey::from("m1");
    processor.process_fragment(key.clone(), Bytes::from_static(b"ab"), meta_for(3, b"abcdef"));

    let outcome =
        processor.process_fragment(key.clone(), Bytes::from_static(b"cd"), meta_for(2, b"abcd"));

    assert!(matches!(
        outcome,
        FragmentOutcome::Rejected(IngestError::MetadataConflict { .. })
    ));
    assert_eq!(
        processor.status(&key),
        MessageStatus::InFlight {
            received: 1,
            expected: NonZeroU32::new(3).expect("non-zero"),
        }
    );
    assert!(logs_contain("fragment rejected"));
}

#[rstest]
fn late_fragment_for_completed_key_is_rejected(processor: MessageProcessor) {
    let key = MessageKey::from("m1");
    let meta = meta_for(1, b"abc");
    assert_eq!(
        processor.process_fragment(key.clone(), Bytes::from_static(b"abc"), meta),
        FragmentOutcome::Completed
    );

    let outcome = processor.process_fragment(key.clone(), Bytes::from_static(b"abc"), meta);

    assert_eq!(
        outcome,
        FragmentOutcome::Rejected(IngestError::AlreadyCompleted { key: key.clone() })
    );
    assert_eq!(processor.in_flight_len(), 0);
    assert_eq!(processor.storage().len(), 1);
}

#[rstest]
fn tombstone_expires_with_the_grace_period(processor: MessageProcessor) {
    let start = Instant::now();
    let key = MessageKey::from("m1");
    let meta = meta_for(1, b"abc");
    processor.process_fragment_at(key.clone(), Bytes::from_static(b"abc"), meta, start);
    assert_eq!(processor.tombstone_len(), 1);

    processor.sweep_stale_at(start + GRACE + Duration::from_millis(1));
    assert_eq!(processor.tombstone_len(), 0);
    // Storage still answers for the key once the tombstone is gone.
    assert_eq!(processor.status(&key), MessageStatus::Completed);

    processor.storage().remove(&key);
    let outcome = processor.process_fragment_at(
        key.clone(),
        Bytes::from_static(b"abc"),
        meta,
        start + GRACE + Duration::from_millis(2),
    );
    assert_eq!(outcome, FragmentOutcome::Completed);
}

#[rstest]
fn stored_key_rejects_fragments_after_tombstone_expires(processor: MessageProcessor) {
    let start = Instant::now();
    let key = MessageKey::from("m1");
    let meta = meta_for(2, b"abcd");
    processor.process_fragment_at(key.clone(), Bytes::from_static(b"ab"), meta, start);
    processor.process_fragment_at(key.clone(), Bytes::from_static(b"cd"), meta, start);
    processor.sweep_stale_at(start + GRACE + Duration::from_millis(1));
    assert_eq!(processor.tombstone_len(), 0);

    let outcome = processor.process_fragment_at(
        key.clone(),
        Bytes::from_static(b"ab"),
        meta,
        start + GRACE + Duration::from_millis(2),
    );

    assert_eq!(
        outcome,
        FragmentOutcome::Rejected(IngestError::AlreadyCompleted { key: key.clone() })
    );
    assert_eq!(processor.in_flight_len(), 0);
    assert_eq!(processor.status(&key), MessageStatus::Completed);
    let stored = processor.storage().get(&key).expect("original kept");
    assert_eq!(stored.payload(), b"abcd");
}

#[rstest]
fn indexed_fragments_assemble_in_logical_order(processor: MessageProcessor) {
    let key = MessageKey::from("m1");
    let meta = meta_for(3, b"abcdef");

    for (index, part) in [(2, "ef"), (0, "ab"), (1, "cd")] {
        processor.process_fragment(
            key.clone(),
            Bytes::from(part),
            meta.with_index(FragmentIndex::new(index)),
        );
    }

    let stored = processor.storage().get(&key).expect("completed");
    assert_eq!(stored.payload(), b"abcdef");
}

#[rstest]
fn duplicate_index_does_not_inflate_the_count(processor: MessageProcessor) {
    let key = MessageKey::from("m1");
    let meta = meta_for(2, b"abcd").with_index(FragmentIndex::new(0));

    processor.process_fragment(key.clone(), Bytes::from_static(b"ab"), meta);
    let outcome = processor.process_fragment(key.clone(), Bytes::from_static(b"ab"), meta);

    assert_eq!(
        outcome,
        FragmentOutcome::Rejected(IngestError::DuplicateFragment {
            key: key.clone(),
            index: FragmentIndex::new(0),
        })
    );
    assert!(matches!(
        processor.status(&key),
        MessageStatus::InFlight { received: 1, .. }
    ));
}

#[rstest]
fn out_of_range_index_is_rejected(processor: MessageProcessor) {
    let key = MessageKey::from("m1");
    let meta = meta_for(2, b"abcd").with_index(FragmentIndex::new(2));

    let outcome = processor.process_fragment(key.clone(), Bytes::from_static(b"ab"), meta);

    assert!(matches!(
        outcome,
        FragmentOutcome::Rejected(IngestError::IndexOutOfRange { .. })
    ));
    assert_eq!(processor.status(&key), MessageStatus::Absent);
}

#[rstest]
#[traced_test]
fn sweep_evicts_only_stale_messages(processor: MessageProcessor) {
    let start = Instant::now();
    let old = MessageKey::from("old");
    let fresh = MessageKey::from("fresh");
    let meta = meta_for(2, b"abcd");
    processor.process_fragment_at(old.clone(), Bytes::from_static(b"ab"), meta, start);
    processor.process_fragment_at(
        fresh.clone(),
        Bytes::from_static(b"ab"),
        meta,
        start + Duration::from_secs(10),
    );

    let evicted = processor.sweep_stale_at(start + GRACE + Duration::from_secs(1));

    assert_eq!(evicted, vec![old.clone()]);
    assert_eq!(processor.status(&old), MessageStatus::Absent);
    assert!(matches!(
        processor.status(&fresh),
        MessageStatus::InFlight { .. }
    ));
    assert!(logs_contain("evicted stale incomplete message"));
}

#[rstest]
fn sweep_at_exact_grace_boundary_keeps_message(processor: MessageProcessor) {
    let start = Instant::now();
    let key = MessageKey::from("m1");
    processor.process_fragment_at(key.clone(), Bytes::from_static(b"ab"), meta_for(2, b"abcd"), start);

    assert!(processor.sweep_stale_at(start + GRACE).is_empty());
    assert_eq!(processor.in_flight_len(), 1);
}

#[rstest]
fn evicted_key_starts_fresh_on_late_fragment(processor: MessageProcessor) {
    let start = Instant::now();
    let key = MessageKey::from("m1");
    let meta = meta_for(2, b"abcd");
    processor.process_fragment_at(key.clone(), Bytes::from_static(b"ab"), meta, start);
    processor.sweep_stale_at(start + GRACE + Duration::from_secs(1));

    let outcome = processor.process_fragment_at(
        key.clone(),
        Bytes::from_static(b"cd"),
        meta,
        start + GRACE + Duration::from_secs(2),
    );

    assert_eq!(
        outcome,
        FragmentOutcome::Buffered {
            received: 1,
            expected: meta.expected_count(),
        }
    );
}

#[rstest]
fn stale_message_completing_before_the_sweep_is_kept(processor: MessageProcessor) {
    let start = Instant::now();
    let key = MessageKey::from("m1");
    let meta = meta_for(2, b"abcd");
    let late = start + GRACE + Duration::from_secs(5);
    processor.process_fragment_at(key.clone(), Bytes::from_static(b"ab"), meta, start);
    processor.process_fragment_at(key.clone(), Bytes::from_static(b"cd"), meta, late);

    let evicted = processor.sweep_stale_at(late);

    assert!(evicted.is_empty());
    assert_eq!(processor.status(&key), MessageStatus::Completed);
}

/// Completion and staleness eviction are mutually exclusive per key even
/// when a sweeper runs continuously alongside the producers.
#[test]
fn completion_and_sweep_never_claim_the_same_key() {
    const KEYS: usize = 64;
    let storage = Arc::new(CompletedStorage::default());
    let processor = Arc::new(MessageProcessor::new(Duration::ZERO, Arc::clone(&storage)));
    let meta = meta_for(2, b"abcd");
    let start = Instant::now();

    for i in 0..KEYS {
        processor.process_fragment_at(
            MessageKey::new(format!("k{i}")),
            Bytes::from_static(b"ab"),
            meta,
            start,
        );
    }

    let sweeper = {
        let processor = Arc::clone(&processor);
        thread::spawn(move || {
            let mut evicted = Vec::new();
            while processor.in_flight_len() > 0 {
                evicted.extend(processor.sweep_stale_at(start + Duration::from_millis(1)));
                thread::yield_now();
            }
            evicted
        })
    };
    let producers: Vec<_> = (0..4)
        .map(|worker| {
            let processor = Arc::clone(&processor);
            thread::spawn(move || {
                for i in (worker..KEYS).step_by(4) {
                    processor.process_fragment_at(
                        MessageKey::new(format!("k{i}")),
                        Bytes::from_static(b"cd"),
                        meta,
                        start,
                    );
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("producer thread");
    }
    // Late fragments for evicted keys start fresh messages; clear them.
    processor.sweep_stale_at(start + Duration::from_millis(1));
    let evicted = sweeper.join().expect("sweeper thread");

    for key in &evicted {
        assert!(!storage.contains(key), "{key} both evicted and completed");
    }
    assert!(storage.len() + evicted.len() >= KEYS);
    assert_eq!(processor.in_flight_len(), 0);
}

#[test]
fn concurrent_producers_on_distinct_keys_do_not_interfere() {
    const KEYS: usize = 32;
    const PARTS: u32 = 8;
    let completions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completions);
    let processor = Arc::new(
        MessageProcessor::new(GRACE, Arc::new(CompletedStorage::default())).with_sink(
            move |_: &CompletedMessage| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ),
    );

    let handles: Vec<_> = (0..KEYS)
        .map(|k| {
            let processor = Arc::clone(&processor);
            thread::spawn(move || {
                let parts: Vec<String> = (0..PARTS).map(|p| format!("{k}:{p};")).collect();
                let whole = parts.concat();
                let meta = meta_for(PARTS, whole.as_bytes());
                for part in parts {
                    processor.process_fragment(MessageKey::new(format!("key-{k}")), part, meta);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("producer thread");
    }

    assert_eq!(completions.load(Ordering::SeqCst), KEYS);
    for k in 0..KEYS {
        let expected: String = (0..PARTS).map(|p| format!("{k}:{p};")).collect();
        let stored = processor
            .storage()
            .get(&MessageKey::new(format!("key-{k}")))
            .expect("completed");
        assert_eq!(stored.payload(), expected.as_bytes());
    }
}

proptest! {
    #[test]
    fn indexed_arrival_order_never_changes_the_result(
        (parts, order) in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 1..8)
            .prop_flat_map(|parts| {
                let order: Vec<usize> = (0..parts.len()).collect();
                (Just(parts), Just(order).prop_shuffle())
            }),
    ) {
        let whole: Vec<u8> = parts.concat();
        let count = u32::try_from(parts.len()).expect("small count");
        let meta = meta_for(count, &whole);

        let (processor, seen) = recording_processor();
        let key = MessageKey::from("prop");
        for i in order {
            let index = FragmentIndex::new(u32::try_from(i).expect("small index"));
            processor.process_fragment(key.clone(), parts[i].clone(), meta.with_index(index));
        }

        let seen = seen.lock().expect("lock");
        prop_assert_eq!(seen.len(), 1);
        prop_assert_eq!(seen[0].payload(), whole.as_slice());
    }
}
