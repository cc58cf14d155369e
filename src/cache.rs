//! Fixed-horizon keyed store for short-lived fragment blobs.
//!
//! Every entry carries its own TTL, fixed at insertion and never refreshed
//! by reads. Expired entries are invisible to [`FragmentCache::get`] the
//! moment their horizon passes; physical removal happens in
//! [`FragmentCache::purge_expired_at`], which pops from a single sorted
//! expiry index instead of running one timer per entry.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use bytes::Bytes;
use tokio::time::Instant;

/// A blob staged in a [`FragmentCache`].
#[derive(Clone, Debug)]
pub struct CachedFragment {
    blob: Bytes,
    created_at: Instant,
    ttl: Duration,
    seq: u64,
}

impl CachedFragment {
    /// Borrow the staged bytes.
    #[must_use]
    pub fn blob(&self) -> &Bytes { &self.blob }

    /// Instant the entry was inserted.
    #[must_use]
    pub const fn created_at(&self) -> Instant { self.created_at }

    /// Lifetime granted at insertion.
    #[must_use]
    pub const fn ttl(&self) -> Duration { self.ttl }

    /// Instant from which the entry is no longer visible.
    #[must_use]
    pub fn expires_at(&self) -> Instant { self.created_at + self.ttl }

    fn is_expired_at(&self, now: Instant) -> bool { now >= self.expires_at() }
}

// `seq` disambiguates entries sharing an expiry instant.
type ExpiryKey = (Instant, u64);

#[derive(Debug)]
struct CacheState<K> {
    entries: HashMap<K, CachedFragment>,
    expiries: BTreeMap<ExpiryKey, K>,
    next_seq: u64,
}

impl<K> Default for CacheState<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            expiries: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

/// Thread-safe blob cache with per-entry expiry.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bytes::Bytes;
/// use udp_reassembler::FragmentCache;
///
/// let cache: FragmentCache<String> = FragmentCache::new();
/// cache.put("frag".to_owned(), Bytes::from_static(b"data"), Duration::from_secs(5));
/// assert_eq!(cache.get(&"frag".to_owned()).as_deref(), Some(&b"data"[..]));
///
/// cache.remove(&"frag".to_owned());
/// cache.remove(&"frag".to_owned());
/// assert!(cache.get(&"frag".to_owned()).is_none());
/// ```
#[derive(Debug)]
pub struct FragmentCache<K = String> {
    state: RwLock<CacheState<K>>,
}

impl<K> Default for FragmentCache<K> {
    fn default() -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
        }
    }
}

impl<K> FragmentCache<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Stage `blob` under `key` for `ttl`, measured from now.
    pub fn put(&self, key: K, blob: Bytes, ttl: Duration) {
        self.put_at(key, blob, ttl, Instant::now());
    }

    /// Stage `blob` under `key` for `ttl`, measured from `now`.
    ///
    /// Replacing an existing key replaces both its blob and its horizon.
    pub fn put_at(&self, key: K, blob: Bytes, ttl: Duration, now: Instant) {
        let mut guard = self.write_state();
        let state = &mut *guard;
        let seq = state.next_seq;
        state.next_seq = state.next_seq.wrapping_add(1);
        let entry = CachedFragment {
            blob,
            created_at: now,
            ttl,
            seq,
        };
        state.expiries.insert((entry.expires_at(), seq), key.clone());
        if let Some(previous) = state.entries.insert(key, entry) {
            state.expiries.remove(&(previous.expires_at(), previous.seq));
        }
    }

    /// Look up `key` without extending its lifetime.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Bytes> { self.get_at(key, Instant::now()) }

    /// Look up `key` as of `now`; expired entries read as absent.
    #[must_use]
    pub fn get_at(&self, key: &K, now: Instant) -> Option<Bytes> {
        self.entry_at(key, now).map(|entry| entry.blob)
    }

    /// Fetch the full cache entry for `key` as of `now`.
    #[must_use]
    pub fn entry_at(&self, key: &K, now: Instant) -> Option<CachedFragment> {
        self.read_state()
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
    }

    /// Evict `key`. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) {
        let mut guard = self.write_state();
        let state = &mut *guard;
        if let Some(entry) = state.entries.remove(key) {
            state.expiries.remove(&(entry.expires_at(), entry.seq));
        }
    }

    /// Reclaim every entry whose horizon has passed, using the current time.
    pub fn purge_expired(&self) -> usize { self.purge_expired_at(Instant::now()) }

    /// Reclaim every entry whose horizon is at or before `now`.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut guard = self.write_state();
        let state = &mut *guard;
        let mut purged = 0;
        while let Some(first) = state.expiries.first_entry() {
            if first.key().0 > now {
                break;
            }
            let key = first.remove();
            state.entries.remove(&key);
            purged += 1;
        }
        purged
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize { self.read_state().entries.len() }

    /// Whether the cache stores no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.read_state().entries.is_empty() }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState<K>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState<K>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}
