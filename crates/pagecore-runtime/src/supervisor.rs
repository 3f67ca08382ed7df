//! Owns the swap image, the shared subsystems and the worker pool.
//!
//! The supervisor validates the configuration, opens the backing file,
//! builds one shared cache/scheduler/ring/anticipator, spawns the workers
//! and joins them on shutdown. Termination is cooperative: INT/TERM (or a
//! caller) raise a process-wide stop flag that every worker polls each
//! iteration. Shutdown flushes every dirty page still resident.

use crate::worker::{Worker, WorkerCounters, WorkerSnapshot};
use pagecore_cache::{
    CacheMetrics, FileSwapDevice, PageCache, RingLog, RingMetrics, SwapDevice,
};
use pagecore_compress::AdaptiveLevel;
use pagecore_error::{PcError, Result};
use pagecore_sched::{AccessScheduler, Anticipator, SchedulerMetrics};
use pagecore_types::{RuntimeConfig, WorkerId};
use serde::Serialize;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

/// How often the foreground wait loop checks the stop flag.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Final runtime statistics reported at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub cache: CacheMetrics,
    pub scheduler: SchedulerMetrics,
    pub ring: RingMetrics,
    pub workers: Vec<WorkerSnapshot>,
    pub shutdown_writebacks: usize,
}

/// Running worker pool over a shared cache and scheduler.
pub struct Supervisor<D> {
    config: RuntimeConfig,
    cache: Arc<PageCache<D>>,
    scheduler: Arc<AccessScheduler>,
    ring: Arc<RingLog>,
    stop: Arc<AtomicBool>,
    worker_flags: Vec<Arc<AtomicBool>>,
    worker_counters: Vec<Arc<WorkerCounters>>,
    handles: Vec<JoinHandle<()>>,
}

impl<D> std::fmt::Debug for Supervisor<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("workers", &self.handles.len())
            .finish()
    }
}

impl Supervisor<FileSwapDevice> {
    /// Validate `config`, open the swap image and start the worker pool.
    pub fn open(config: RuntimeConfig) -> Result<Self> {
        let config = config.validate()?;
        let device = Arc::new(FileSwapDevice::open(&config.image_path)?);
        Self::start(config, device)
    }
}

impl<D: SwapDevice + 'static> Supervisor<D> {
    /// Start the worker pool over an already-open device.
    pub fn start(config: RuntimeConfig, device: Arc<D>) -> Result<Self> {
        let config = config.validate()?;
        let cache = Arc::new(PageCache::new(device, config.max_cache_entries)?);
        let ring = Arc::new(RingLog::new(config.ring_capacity())?);
        let scheduler = Arc::new(AccessScheduler::new(
            config.cores,
            config.migration_threshold,
        ));
        let anticipator = Arc::new(Anticipator::new());
        let stop = Arc::new(AtomicBool::new(false));

        info!(
            target: "pagecore::supervisor",
            event = "runtime_starting",
            cores = config.cores,
            segment_mb = config.segment_mb,
            cache_mb = config.cache_mb,
            max_cache_entries = config.max_cache_entries,
            image = %config.image_path.display()
        );

        let mut supervisor = Self {
            config,
            cache,
            scheduler,
            ring,
            stop,
            worker_flags: Vec::new(),
            worker_counters: Vec::new(),
            handles: Vec::new(),
        };

        for id in 0..supervisor.config.cores {
            let worker_id = WorkerId(id);
            let running = Arc::new(AtomicBool::new(true));
            let counters = Arc::new(WorkerCounters::default());
            let worker = Worker::new(
                worker_id,
                supervisor.config.segment_base(worker_id),
                supervisor.config.pages_per_segment(),
                Arc::clone(&running),
                Arc::clone(&supervisor.stop),
                Arc::clone(&supervisor.cache),
                Arc::clone(&supervisor.scheduler),
                Arc::clone(&anticipator),
                Arc::clone(&supervisor.ring),
                AdaptiveLevel::new(
                    supervisor.config.compression_min_level,
                    supervisor.config.compression_max_level,
                    supervisor.config.adaptive_threshold,
                ),
                Arc::clone(&counters),
                crate::worker::default_throttle(),
            );

            let spawn = std::thread::Builder::new()
                .name(format!("pagecore-worker-{id}"))
                .spawn(move || worker.run());
            match spawn {
                Ok(handle) => {
                    supervisor.worker_flags.push(running);
                    supervisor.worker_counters.push(counters);
                    supervisor.handles.push(handle);
                }
                Err(source) => {
                    error!(
                        target: "pagecore::supervisor",
                        event = "worker_spawn_failed",
                        worker = id,
                        error = %source
                    );
                    // Roll back the workers that did start before failing.
                    supervisor.stop.store(true, Ordering::Release);
                    for flag in &supervisor.worker_flags {
                        flag.store(false, Ordering::Release);
                    }
                    for handle in supervisor.handles.drain(..) {
                        let _ = handle.join();
                    }
                    return Err(PcError::Io(source));
                }
            }
        }

        Ok(supervisor)
    }

    /// Route INT/TERM to the stop flag. Install once, before [`Self::wait`].
    pub fn register_signals(&self) -> Result<()> {
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.stop)).map_err(PcError::Io)?;
        }
        Ok(())
    }

    /// Handle that makes [`Self::wait`] return from another thread.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<PageCache<D>> {
        &self.cache
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Block until the stop flag is raised (by a signal or another thread).
    pub fn wait(&self) {
        while !self.stop.load(Ordering::Acquire) {
            std::thread::sleep(WAIT_POLL);
        }
    }

    /// Stop and join every worker, flush the cache, report final stats.
    pub fn shutdown(mut self) -> RuntimeStats {
        self.stop.store(true, Ordering::Release);
        for flag in &self.worker_flags {
            flag.store(false, Ordering::Release);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }

        let shutdown_writebacks = self.cache.flush_and_clear();
        let stats = RuntimeStats {
            cache: self.cache.metrics(),
            scheduler: self.scheduler.metrics(),
            ring: self.ring.metrics(),
            workers: self
                .worker_counters
                .iter()
                .enumerate()
                .map(|(id, counters)| counters.snapshot(WorkerId(id as u32)))
                .collect(),
            shutdown_writebacks,
        };

        info!(
            target: "pagecore::supervisor",
            event = "runtime_stopped",
            iterations = stats.workers.iter().map(|w| w.iterations).sum::<u64>(),
            migrations = stats.scheduler.migrations,
            cache_hits = stats.cache.hits,
            cache_misses = stats.cache.misses,
            shutdown_writebacks
        );
        stats
    }
}
