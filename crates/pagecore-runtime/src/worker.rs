//! The per-core loop: pick a block, load it through the cache, mutate,
//! compress, write back, log.
//!
//! Each worker walks its own segment with a monotone cursor, reports every
//! access to the scheduler, and may be handed a migrated hot offset
//! instead. All recoverable failures are logged and skipped; only the
//! termination flags end the loop.

use pagecore_cache::{PageCache, RingLog, SwapDevice};
use pagecore_compress::{compress_page, AdaptiveLevel};
use pagecore_sched::{AccessScheduler, Anticipator};
use pagecore_types::{PageOffset, WorkerId, BASE_THROTTLE, LOAD_THRESHOLD, MUTATE_PASSES, PAGE_SIZE};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Monotonic per-worker counters, shared with the supervisor.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    pub iterations: AtomicU64,
    pub migrations_taken: AtomicU64,
    pub pages_compressed: AtomicU64,
    pub compressed_bytes: AtomicU64,
    pub recoverable_errors: AtomicU64,
}

/// Frozen view of one worker's counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WorkerSnapshot {
    pub worker: u32,
    pub iterations: u64,
    pub migrations_taken: u64,
    pub pages_compressed: u64,
    pub compressed_bytes: u64,
    pub recoverable_errors: u64,
}

impl WorkerCounters {
    #[must_use]
    pub fn snapshot(&self, worker: WorkerId) -> WorkerSnapshot {
        WorkerSnapshot {
            worker: worker.0,
            iterations: self.iterations.load(Ordering::Relaxed),
            migrations_taken: self.migrations_taken.load(Ordering::Relaxed),
            pages_compressed: self.pages_compressed.load(Ordering::Relaxed),
            compressed_bytes: self.compressed_bytes.load(Ordering::Relaxed),
            recoverable_errors: self.recoverable_errors.load(Ordering::Relaxed),
        }
    }
}

/// One worker thread's state and collaborators.
pub struct Worker<D> {
    id: WorkerId,
    segment_base: PageOffset,
    pages_per_segment: u64,
    cursor: u64,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    cache: Arc<PageCache<D>>,
    scheduler: Arc<AccessScheduler>,
    anticipator: Arc<Anticipator>,
    ring: Arc<RingLog>,
    device: Arc<D>,
    adaptive: AdaptiveLevel,
    counters: Arc<WorkerCounters>,
    base_throttle: Duration,
}

impl<D: SwapDevice> Worker<D> {
    #[expect(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: WorkerId,
        segment_base: PageOffset,
        pages_per_segment: u64,
        running: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
        cache: Arc<PageCache<D>>,
        scheduler: Arc<AccessScheduler>,
        anticipator: Arc<Anticipator>,
        ring: Arc<RingLog>,
        adaptive: AdaptiveLevel,
        counters: Arc<WorkerCounters>,
        base_throttle: Duration,
    ) -> Self {
        let device = Arc::clone(cache.device());
        Self {
            id,
            segment_base,
            pages_per_segment,
            cursor: 0,
            running,
            stop,
            cache,
            scheduler,
            anticipator,
            ring,
            device,
            adaptive,
            counters,
            base_throttle,
        }
    }

    fn keep_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.stop.load(Ordering::Acquire)
    }

    /// Run the loop until either termination flag clears this worker.
    pub fn run(mut self) {
        info!(
            target: "pagecore::worker",
            event = "worker_started",
            worker = self.id.0,
            segment_base = self.segment_base.0,
            pages = self.pages_per_segment
        );

        while self.keep_running() {
            self.step();
        }

        info!(
            target: "pagecore::worker",
            event = "worker_stopped",
            worker = self.id.0,
            iterations = self.counters.iterations.load(Ordering::Relaxed)
        );
    }

    fn step(&mut self) {
        self.counters.iterations.fetch_add(1, Ordering::Relaxed);

        // 1. Circular block selection inside the segment.
        let slot = self.cursor % self.pages_per_segment;
        self.cursor = self.cursor.wrapping_add(1);
        let mut offset = PageOffset(self.segment_base.0 + slot * PAGE_SIZE as u64);

        // 2. Record the access.
        self.scheduler.report_access(self.id, offset);

        // 3. Pull migrated work when under-loaded.
        if self.scheduler.should_migrate(self.id) {
            if let Some(migrated) = self.scheduler.get_migrated_task(self.id) {
                debug!(
                    target: "pagecore::worker",
                    event = "migration_taken",
                    worker = self.id.0,
                    offset = migrated.0
                );
                self.counters.migrations_taken.fetch_add(1, Ordering::Relaxed);
                offset = migrated;
            }
        }

        // 4–5. Load through the cache into a private scratch buffer.
        let mut scratch = match self.cache.get(offset, true) {
            Ok(page) => page.into_bytes(),
            Err(err) => {
                self.counters.recoverable_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "pagecore::worker",
                    event = "page_load_failed",
                    worker = self.id.0,
                    offset = offset.0,
                    errno = err.raw_os_error().unwrap_or(0),
                    error = %err
                );
                std::thread::sleep(self.base_throttle * 2);
                return;
            }
        };

        // 6. Warm the neighbouring page when the pattern table approves.
        self.anticipator.learn(offset);
        if let Some(next) = offset.next_page() {
            if self.anticipator.prefetch_ok(next) {
                let _ = self.cache.get(next, false);
            }
        }

        // 7. Simulated CPU work over the scratch copy.
        let mask = (self.id.0 & 0xFF) as u8;
        for _ in 0..MUTATE_PASSES {
            for byte in &mut scratch {
                *byte ^= mask;
            }
        }

        // 8. Compress and write the compressed payload back in place.
        let level = self.adaptive.level();
        match compress_page(&scratch, level) {
            Ok(packed) => {
                if let Err(err) = self.device.write_at(offset, &packed) {
                    self.counters.recoverable_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        target: "pagecore::worker",
                        event = "compressed_write_failed",
                        worker = self.id.0,
                        offset = offset.0,
                        errno = err.raw_os_error().unwrap_or(0),
                        error = %err
                    );
                } else {
                    self.counters.pages_compressed.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .compressed_bytes
                        .fetch_add(packed.len() as u64, Ordering::Relaxed);
                }
                self.adaptive.record(packed.len());
            }
            Err(err) => {
                self.counters.recoverable_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: "pagecore::worker",
                    event = "compress_failed",
                    worker = self.id.0,
                    offset = offset.0,
                    level,
                    error = %err
                );
            }
        }

        // 9. Tap the mutated (uncompressed) page into the ring.
        self.ring.append(offset, &scratch);

        // 10. Throttle, twice as long under load.
        let mut delay = self.base_throttle;
        if self.scheduler.queue_len(self.id) > LOAD_THRESHOLD {
            delay *= 2;
        }
        std::thread::sleep(delay);
    }
}

/// Default throttle used by the supervisor.
#[must_use]
pub fn default_throttle() -> Duration {
    BASE_THROTTLE
}
