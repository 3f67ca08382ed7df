#![forbid(unsafe_code)]
//! Per-worker access queues and the cross-worker migration policy.
//!
//! Every worker reports each block access to its own bounded queue; an
//! under-loaded worker may pull the hottest recent unit out of the fullest
//! foreign queue. Imbalance is measured in unit counts (queue lengths), and
//! a donor victim must additionally be hot and recently seen.
//!
//! Locking: one lock per queue, held for the minimum span. The migration
//! path inspects foreign queues one at a time and never holds two foreign
//! locks at once. Scheduler locks are never taken under a cache lock.

pub mod anticipator;

pub use anticipator::Anticipator;

use pagecore_types::{PageOffset, WorkerId, HOT_RECENCY, WORK_QUEUE_CAP};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// One recorded hot block inside a worker queue.
#[derive(Debug, Clone, Copy)]
pub struct WorkUnit {
    pub offset: PageOffset,
    pub hot: u32,
    pub last_seen: Instant,
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    pub queue_lens: Vec<usize>,
    pub migrations: u64,
}

/// Hot-block tracker with one bounded queue per worker.
#[derive(Debug)]
pub struct AccessScheduler {
    queues: Vec<Mutex<Vec<WorkUnit>>>,
    queue_cap: usize,
    migration_threshold: usize,
    hot_recency: Duration,
    migrations: AtomicU64,
}

impl AccessScheduler {
    #[must_use]
    pub fn new(workers: u32, migration_threshold: usize) -> Self {
        Self::with_tuning(workers, migration_threshold, WORK_QUEUE_CAP, HOT_RECENCY)
    }

    /// Constructor with explicit queue capacity and recency window.
    #[must_use]
    pub fn with_tuning(
        workers: u32,
        migration_threshold: usize,
        queue_cap: usize,
        hot_recency: Duration,
    ) -> Self {
        let queues = (0..workers)
            .map(|_| Mutex::new(Vec::with_capacity(queue_cap)))
            .collect();
        Self {
            queues,
            queue_cap,
            migration_threshold,
            hot_recency,
            migrations: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.queues.len()
    }

    /// Record an access by `worker` to `offset`.
    ///
    /// A known offset gets its `hot` counter bumped and `last_seen`
    /// refreshed. A new offset is appended while there is room; a full
    /// queue replaces the coldest unit (smallest `hot`, oldest slot on a
    /// tie).
    pub fn report_access(&self, worker: WorkerId, offset: PageOffset) {
        let mut queue = self.queues[worker.0 as usize].lock();
        let now = Instant::now();
        if let Some(unit) = queue.iter_mut().find(|unit| unit.offset == offset) {
            unit.hot = unit.hot.saturating_add(1);
            unit.last_seen = now;
            return;
        }
        let unit = WorkUnit {
            offset,
            hot: 1,
            last_seen: now,
        };
        if queue.len() < self.queue_cap {
            queue.push(unit);
            return;
        }
        if queue.is_empty() {
            return;
        }
        // Strict < keeps the oldest slot among equally cold units.
        let mut victim = 0_usize;
        let mut coldest = u32::MAX;
        for (index, unit) in queue.iter().enumerate() {
            if unit.hot < coldest {
                coldest = unit.hot;
                victim = index;
            }
        }
        trace!(
            target: "pagecore::sched",
            event = "queue_replace",
            worker = worker.0,
            evicted = queue[victim].offset.0,
            inserted = offset.0
        );
        queue[victim] = unit;
    }

    /// Length of `worker`'s queue.
    #[must_use]
    pub fn queue_len(&self, worker: WorkerId) -> usize {
        self.queues[worker.0 as usize].lock().len()
    }

    /// Whether `worker` is under-loaded enough to pull migrated work.
    ///
    /// True iff its unit count sits more than the migration threshold below
    /// the average of all other workers. A lone worker never migrates.
    #[must_use]
    pub fn should_migrate(&self, worker: WorkerId) -> bool {
        let others = self.queues.len().saturating_sub(1);
        if others == 0 {
            return false;
        }
        let mut total = 0_usize;
        for (index, queue) in self.queues.iter().enumerate() {
            if index != worker.0 as usize {
                total += queue.lock().len();
            }
        }
        let avg = total / others;
        let own = self.queue_len(worker);
        own + self.migration_threshold < avg
    }

    /// Pull the hottest recent unit out of the fullest foreign queue.
    ///
    /// The donor must hold more than the migration threshold of units, and
    /// the victim must have been seen within the recency window. The unit
    /// is removed from the donor; `None` when no donor qualifies.
    pub fn get_migrated_task(&self, worker: WorkerId) -> Option<PageOffset> {
        let mut donor: Option<(usize, usize)> = None;
        for (index, queue) in self.queues.iter().enumerate() {
            if index == worker.0 as usize {
                continue;
            }
            let len = queue.lock().len();
            if donor.map_or(true, |(_, best)| len > best) {
                donor = Some((index, len));
            }
        }
        let (donor_index, _) = donor?;

        let mut queue = self.queues[donor_index].lock();
        // Re-check under the donor lock; the summary above was unlocked.
        if queue.len() <= self.migration_threshold {
            return None;
        }
        let now = Instant::now();
        let victim = queue
            .iter()
            .enumerate()
            .filter(|(_, unit)| now.duration_since(unit.last_seen) < self.hot_recency)
            .max_by_key(|(_, unit)| unit.hot)
            .map(|(index, _)| index)?;
        let unit = queue.remove(victim);
        drop(queue);

        self.migrations.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "pagecore::sched",
            event = "task_migrated",
            to_worker = worker.0,
            from_worker = donor_index,
            offset = unit.offset.0,
            hot = unit.hot
        );
        Some(unit.offset)
    }

    #[must_use]
    pub fn migrations(&self) -> u64 {
        self.migrations.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn metrics(&self) -> SchedulerMetrics {
        SchedulerMetrics {
            queue_lens: self.queues.iter().map(|queue| queue.lock().len()).collect(),
            migrations: self.migrations(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn off(page: u64) -> PageOffset {
        PageOffset(page * 4096)
    }

    #[test]
    fn repeated_reports_heat_up_monotonically() {
        let sched = AccessScheduler::new(2, 5);
        for _ in 0..4 {
            sched.report_access(WorkerId(0), off(3));
        }
        assert_eq!(sched.queue_len(WorkerId(0)), 1);
        let queue = sched.queues[0].lock();
        assert_eq!(queue[0].hot, 4);
    }

    #[test]
    fn full_queue_replaces_coldest_unit() {
        let sched = AccessScheduler::with_tuning(1, 5, 4, HOT_RECENCY);
        for page in 0..4 {
            sched.report_access(WorkerId(0), off(page));
        }
        // Heat everything except page 1.
        for page in [0, 2, 3] {
            sched.report_access(WorkerId(0), off(page));
        }
        sched.report_access(WorkerId(0), off(9));
        let queue = sched.queues[0].lock();
        assert_eq!(queue.len(), 4);
        assert!(queue.iter().all(|unit| unit.offset != off(1)));
        assert!(queue.iter().any(|unit| unit.offset == off(9)));
    }

    #[test]
    fn tie_break_replaces_oldest_slot() {
        let sched = AccessScheduler::with_tuning(1, 5, 3, HOT_RECENCY);
        for page in 0..3 {
            sched.report_access(WorkerId(0), off(page));
        }
        sched.report_access(WorkerId(0), off(7));
        let queue = sched.queues[0].lock();
        // All units tied at hot=1; the first slot went first.
        assert!(queue.iter().all(|unit| unit.offset != off(0)));
    }

    #[test]
    fn lone_worker_never_migrates() {
        let sched = AccessScheduler::new(1, 5);
        for page in 0..30 {
            sched.report_access(WorkerId(0), off(page));
        }
        assert!(!sched.should_migrate(WorkerId(0)));
        assert_eq!(sched.get_migrated_task(WorkerId(0)), None);
    }

    #[test]
    fn imbalance_triggers_migration_from_fullest_queue() {
        let sched = AccessScheduler::new(4, 5);
        for worker in 1..4_u32 {
            for page in 0..20_u64 {
                sched.report_access(WorkerId(worker), off(u64::from(worker) * 100 + page));
            }
        }
        // Make worker 1's queue the hottest donor.
        sched.report_access(WorkerId(1), off(100));
        sched.report_access(WorkerId(1), off(100));

        assert!(sched.should_migrate(WorkerId(0)));
        assert!(!sched.should_migrate(WorkerId(2)));

        let migrated = sched.get_migrated_task(WorkerId(0)).unwrap();
        assert_eq!(migrated, off(100));
        assert_eq!(sched.queue_len(WorkerId(1)), 20);
        assert_eq!(sched.migrations(), 1);
    }

    #[test]
    fn cold_donor_declines() {
        let sched = AccessScheduler::new(2, 5);
        for page in 0..5 {
            sched.report_access(WorkerId(1), off(page));
        }
        // Five units is not above the threshold.
        assert_eq!(sched.get_migrated_task(WorkerId(0)), None);
    }

    #[test]
    fn stale_units_are_not_migrated() {
        let sched = AccessScheduler::with_tuning(2, 5, WORK_QUEUE_CAP, Duration::ZERO);
        for page in 0..10 {
            sched.report_access(WorkerId(1), off(page));
        }
        // Zero recency window: every unit is already stale.
        assert_eq!(sched.get_migrated_task(WorkerId(0)), None);
        assert_eq!(sched.queue_len(WorkerId(1)), 10);
    }

    #[test]
    fn metrics_reflect_queue_lengths() {
        let sched = AccessScheduler::new(3, 5);
        sched.report_access(WorkerId(2), off(1));
        sched.report_access(WorkerId(2), off(2));
        let metrics = sched.metrics();
        assert_eq!(metrics.queue_lens, vec![0, 0, 2]);
        assert_eq!(metrics.migrations, 0);
    }
}
