#![forbid(unsafe_code)]
//! Sharded page cache with a global LRU and dirty write-back.
//!
//! Pages are keyed by their byte offset in the swap image. The key space is
//! split across [`MUTEX_GROUPS`] shard locks (16 groups over
//! [`HASH_SIZE`] logical buckets); recency is tracked in one process-wide
//! LRU behind its own lock. The lock order is strictly shard → lru, and no
//! path ever holds two shard locks, which is why eviction is deferred: a
//! miss that pushes the cache over capacity only records that an eviction
//! is owed, and the eviction step reacquires locks from scratch in
//! victim-shard → lru order.

pub mod device;
pub mod lru;
pub mod ring;

pub use device::{FileSwapDevice, MemSwapDevice, SwapDevice};
pub use ring::{RingLog, RingMetrics};

use lru::LruList;
use pagecore_error::{PcError, Result};
use pagecore_types::{ConfigError, PageOffset, HASH_SIZE, MUTEX_GROUPS, PAGE_SIZE};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{trace, warn};

/// Retries for the deferred eviction step when the tail moves under us.
const EVICT_RETRIES: usize = 8;

#[derive(Debug)]
struct PageEntry {
    data: Box<[u8]>,
    dirty: bool,
    last_access: Instant,
}

#[derive(Debug, Default)]
struct Shard {
    pages: HashMap<PageOffset, PageEntry>,
}

/// Owned copy of a cached page, handed out by [`PageCache::get`].
///
/// The cache keeps exclusive ownership of the resident page; callers work
/// on this copy so no reference outlives the shard lock.
#[derive(Debug, Clone)]
pub struct PageRead {
    offset: PageOffset,
    data: Vec<u8>,
}

impl PageRead {
    #[must_use]
    pub fn offset(&self) -> PageOffset {
        self.offset
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Snapshot of cache counters.
///
/// All counters are monotonic for the lifetime of the cache; `resident` and
/// `capacity` describe the moment of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writebacks: u64,
    pub writeback_errors: u64,
    pub partial_reads: u64,
    pub resident: usize,
    pub capacity: usize,
}

impl CacheMetrics {
    /// Hit ratio in `[0.0, 1.0]`; `0.0` before any access.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Shared, sharded page cache over a [`SwapDevice`].
#[derive(Debug)]
pub struct PageCache<D> {
    device: Arc<D>,
    shards: Vec<Mutex<Shard>>,
    lru: Mutex<LruList>,
    max_entries: usize,
    entry_count: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writebacks: AtomicU64,
    writeback_errors: AtomicU64,
    partial_reads: AtomicU64,
}

fn bucket_of(offset: PageOffset) -> usize {
    usize::try_from(offset.page_index() % HASH_SIZE as u64).unwrap_or(0)
}

fn shard_of(offset: PageOffset) -> usize {
    bucket_of(offset) % MUTEX_GROUPS
}

impl<D: SwapDevice> PageCache<D> {
    /// Create a cache holding at most `max_entries` resident pages.
    pub fn new(device: Arc<D>, max_entries: usize) -> Result<Self> {
        if max_entries == 0 {
            return Err(PcError::Config(ConfigError::InvalidField {
                field: "max_cache_entries",
                reason: "must be > 0",
            }));
        }
        let shards = (0..MUTEX_GROUPS).map(|_| Mutex::new(Shard::default())).collect();
        Ok(Self {
            device,
            shards,
            lru: Mutex::new(LruList::new()),
            max_entries,
            entry_count: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            writebacks: AtomicU64::new(0),
            writeback_errors: AtomicU64::new(0),
            partial_reads: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Resident page count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    /// Whether `offset` is resident. Does not touch recency.
    #[must_use]
    pub fn contains(&self, offset: PageOffset) -> bool {
        self.shards[shard_of(offset)].lock().pages.contains_key(&offset)
    }

    /// Most recently used offset (diagnostics).
    #[must_use]
    pub fn lru_head(&self) -> Option<PageOffset> {
        self.lru.lock().head_offset()
    }

    /// Next eviction victim (diagnostics).
    #[must_use]
    pub fn lru_tail(&self) -> Option<PageOffset> {
        self.lru.lock().tail_offset()
    }

    /// Look up `offset`, loading it from the device on a miss.
    ///
    /// Hits refresh recency and, with `write_intent`, mark the page dirty.
    /// Misses read the page under the shard lock (concurrent misses to the
    /// same shard serialise instead of duplicating the load), zero-fill a
    /// short read, and link the new entry at the LRU head. If that pushes
    /// the cache over capacity the owed eviction runs after every lock is
    /// released, before this call returns.
    pub fn get(&self, offset: PageOffset, write_intent: bool) -> Result<PageRead> {
        if !offset.is_aligned() {
            return Err(PcError::Unaligned(offset));
        }

        let shard = &self.shards[shard_of(offset)];
        let mut guard = shard.lock();
        if let Some(entry) = guard.pages.get_mut(&offset) {
            entry.last_access = Instant::now();
            if write_intent {
                entry.dirty = true;
            }
            let data = entry.data.to_vec();
            self.lru.lock().promote(offset);
            drop(guard);
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(
                target: "pagecore::cache",
                event = "cache_hit",
                offset = offset.0,
                write_intent
            );
            return Ok(PageRead { offset, data });
        }

        // Miss: the shard lock stays held across the read on purpose.
        let mut buf = Vec::new();
        buf.try_reserve_exact(PAGE_SIZE).map_err(|_| PcError::Alloc)?;
        buf.resize(PAGE_SIZE, 0);
        let filled = self.device.read_at(offset, &mut buf)?;
        if filled < PAGE_SIZE {
            self.partial_reads.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "pagecore::cache",
                event = "partial_read",
                offset = offset.0,
                filled,
                "short read zero-filled to a full page"
            );
        }

        let data = buf.clone();
        guard.pages.insert(
            offset,
            PageEntry {
                data: buf.into_boxed_slice(),
                dirty: write_intent,
                last_access: Instant::now(),
            },
        );
        let eviction_owed = {
            let mut lru = self.lru.lock();
            lru.push_head(offset);
            let count = self.entry_count.fetch_add(1, Ordering::Relaxed) + 1;
            count > self.max_entries
        };
        drop(guard);
        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(
            target: "pagecore::cache",
            event = "cache_miss",
            offset = offset.0,
            write_intent,
            filled
        );

        if eviction_owed {
            self.enforce_capacity();
        }
        Ok(PageRead { offset, data })
    }

    /// Evict the LRU tail. No-op on an empty cache; returns whether a page
    /// was evicted.
    ///
    /// The victim is read under the LRU lock alone, then the locks are
    /// reacquired in the canonical victim-shard → lru order and the tail is
    /// re-verified; a promotion racing in between just means a retry.
    pub fn evict(&self) -> bool {
        for _ in 0..EVICT_RETRIES {
            let Some(victim) = self.lru.lock().tail_offset() else {
                return false;
            };

            let shard = &self.shards[shard_of(victim)];
            let mut guard = shard.lock();
            {
                let mut lru = self.lru.lock();
                if lru.tail_offset() != Some(victim) {
                    continue;
                }
                lru.remove(victim);
                self.entry_count.fetch_sub(1, Ordering::Relaxed);
            }

            let Some(entry) = guard.pages.remove(&victim) else {
                // Hash/LRU disagreement would break L1; recover loudly.
                warn!(
                    target: "pagecore::cache",
                    event = "evict_missing_entry",
                    offset = victim.0
                );
                return false;
            };
            if entry.dirty {
                self.write_back(victim, &entry.data);
            }
            drop(guard);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(
                target: "pagecore::cache",
                event = "cache_evict",
                offset = victim.0,
                dirty = entry.dirty
            );
            return true;
        }
        false
    }

    /// Write back every dirty page in place, keeping it resident.
    ///
    /// Pages whose write-back fails stay dirty for a later retry. Returns
    /// the number of pages cleaned.
    pub fn flush(&self) -> usize {
        let mut cleaned = 0_usize;
        for shard in &self.shards {
            let mut guard = shard.lock();
            for (offset, entry) in guard.pages.iter_mut() {
                if !entry.dirty {
                    continue;
                }
                if self.write_back(*offset, &entry.data) {
                    entry.dirty = false;
                    cleaned += 1;
                }
            }
        }
        cleaned
    }

    /// Tear the cache down: write back every dirty page (errors logged,
    /// never propagated), then drop all entries. Returns the number of
    /// write-back attempts issued.
    pub fn flush_and_clear(&self) -> usize {
        let mut attempted = 0_usize;
        for shard in &self.shards {
            let mut guard = shard.lock();
            for (offset, entry) in guard.pages.drain() {
                if entry.dirty {
                    attempted += 1;
                    let _ = self.write_back(offset, &entry.data);
                }
            }
        }
        self.lru.lock().clear();
        self.entry_count.store(0, Ordering::Relaxed);
        trace!(
            target: "pagecore::cache",
            event = "cache_cleared",
            writeback_attempts = attempted
        );
        attempted
    }

    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            writebacks: self.writebacks.load(Ordering::Relaxed),
            writeback_errors: self.writeback_errors.load(Ordering::Relaxed),
            partial_reads: self.partial_reads.load(Ordering::Relaxed),
            resident: self.len(),
            capacity: self.max_entries,
        }
    }

    /// Check the hash/LRU agreement and capacity bound.
    ///
    /// Diagnostic for tests on a quiescent cache; shard locks are taken one
    /// at a time, so the comparison is not atomic under concurrent traffic.
    pub fn assert_invariants(&self) {
        let mut shard_offsets = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock();
            shard_offsets.extend(guard.pages.keys().copied());
        }
        let lru_offsets = self.lru.lock().offsets_head_to_tail();
        assert!(
            shard_offsets.len() <= self.max_entries,
            "capacity bound violated: {} > {}",
            shard_offsets.len(),
            self.max_entries
        );
        assert_eq!(
            shard_offsets.len(),
            lru_offsets.len(),
            "hash table and LRU disagree on cardinality"
        );
        let mut sorted_shard = shard_offsets.clone();
        sorted_shard.sort_unstable();
        sorted_shard.dedup();
        assert_eq!(sorted_shard.len(), shard_offsets.len(), "duplicate key in shards");
        let mut sorted_lru = lru_offsets;
        sorted_lru.sort_unstable();
        assert_eq!(sorted_shard, sorted_lru, "hash table and LRU disagree on membership");
        for offset in &sorted_shard {
            assert!(offset.is_aligned(), "unaligned cache key {offset}");
        }
    }

    fn enforce_capacity(&self) {
        while self.entry_count.load(Ordering::Relaxed) > self.max_entries {
            if !self.evict() {
                break;
            }
        }
    }

    /// One write-back attempt; failures are logged, never propagated.
    fn write_back(&self, offset: PageOffset, data: &[u8]) -> bool {
        match self.device.write_at(offset, data) {
            Ok(()) => {
                self.writebacks.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                self.writeback_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "pagecore::cache",
                    event = "writeback_failed",
                    offset = offset.0,
                    errno = err.raw_os_error().unwrap_or(0),
                    error = %err
                );
                false
            }
        }
    }
}
