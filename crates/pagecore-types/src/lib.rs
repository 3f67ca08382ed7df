#![forbid(unsafe_code)]
//! Core newtypes and runtime configuration for pagecore.
//!
//! Defines the unit-carrying wrappers shared by every crate in the
//! workspace and the validated [`RuntimeConfig`] the supervisor is built
//! from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Page size in bytes. Every cache key and every transfer is one page.
pub const PAGE_SIZE: usize = 4096;

/// Number of logical hash buckets in the page cache.
pub const HASH_SIZE: usize = 2048;

/// Number of shard groups; bucket `b` is guarded by group `b % MUTEX_GROUPS`.
pub const MUTEX_GROUPS: usize = 16;

/// Default worker count.
pub const DEFAULT_CORES: u32 = 4;

/// Default per-worker segment of the swap image, in MiB.
pub const DEFAULT_SEGMENT_MB: u64 = 512;

/// Default ring-log capacity, in MiB.
pub const DEFAULT_CACHE_MB: u64 = 128;

/// Default resident-page ceiling for the shared cache.
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 8192;

/// Queue-length gap below the cross-worker average that makes a worker
/// eligible to pull migrated work.
pub const DEFAULT_MIGRATION_THRESHOLD: usize = 5;

/// Bounded capacity of one worker's access queue.
pub const WORK_QUEUE_CAP: usize = 64;

/// A donor unit must have been seen within this window to migrate.
pub const HOT_RECENCY: Duration = Duration::from_secs(10);

/// Lowest zstd level used by the adaptive policy.
pub const COMPRESSION_MIN_LVL: i32 = 1;

/// Highest zstd level used by the adaptive policy.
pub const COMPRESSION_MAX_LVL: i32 = 9;

/// Compressed/original ratio above which a page counts as poorly
/// compressible and the level is raised.
pub const COMPRESSION_ADAPTIVE_THRESHOLD: f64 = 0.8;

/// XOR passes over the scratch buffer per iteration (models CPU work).
pub const MUTATE_PASSES: usize = 125;

/// Worker throttle between iterations.
pub const BASE_THROTTLE: Duration = Duration::from_millis(10);

/// Own-queue length above which the worker doubles its throttle.
pub const LOAD_THRESHOLD: usize = 48;

/// Default swap image path.
pub const DEFAULT_IMAGE_PATH: &str = "./storage_swap.img";

/// Byte offset of a page inside the swap image.
///
/// Cache keys are always multiples of [`PAGE_SIZE`]; the constructor on the
/// cache rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageOffset(pub u64);

impl PageOffset {
    pub const ZERO: Self = Self(0);

    /// True when the offset sits on a page boundary.
    #[must_use]
    pub fn is_aligned(self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }

    /// Page-granular index (`offset / PAGE_SIZE`).
    #[must_use]
    pub fn page_index(self) -> u64 {
        self.0 / PAGE_SIZE as u64
    }

    /// Offset of the page immediately after this one, `None` on overflow.
    #[must_use]
    pub fn next_page(self) -> Option<Self> {
        self.0.checked_add(PAGE_SIZE as u64).map(Self)
    }

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Display for PageOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one worker thread (0-based, dense).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration rejected at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// Validated runtime configuration.
///
/// Defaults mirror the compile-time constants; the CLI may override the
/// image path and worker count. Construction goes through [`RuntimeConfig::validate`],
/// so a held value is always internally consistent.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    /// Number of worker threads, each owning one segment.
    pub cores: u32,
    /// Per-worker segment size in MiB.
    pub segment_mb: u64,
    /// Ring-log capacity in MiB.
    pub cache_mb: u64,
    /// Resident-page ceiling for the shared cache.
    pub max_cache_entries: usize,
    /// Queue-length gap that triggers migration.
    pub migration_threshold: usize,
    /// Adaptive compression bounds.
    pub compression_min_level: i32,
    pub compression_max_level: i32,
    /// Ratio above which the level is raised to the maximum.
    pub adaptive_threshold: f64,
    /// Path of the swap image.
    pub image_path: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cores: DEFAULT_CORES,
            segment_mb: DEFAULT_SEGMENT_MB,
            cache_mb: DEFAULT_CACHE_MB,
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            migration_threshold: DEFAULT_MIGRATION_THRESHOLD,
            compression_min_level: COMPRESSION_MIN_LVL,
            compression_max_level: COMPRESSION_MAX_LVL,
            adaptive_threshold: COMPRESSION_ADAPTIVE_THRESHOLD,
            image_path: PathBuf::from(DEFAULT_IMAGE_PATH),
        }
    }
}

impl RuntimeConfig {
    /// Check internal consistency, returning `self` on success.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.cores == 0 {
            return Err(ConfigError::InvalidField {
                field: "cores",
                reason: "must be > 0",
            });
        }
        if self.segment_mb == 0 {
            return Err(ConfigError::InvalidField {
                field: "segment_mb",
                reason: "must be > 0",
            });
        }
        if self.segment_bytes() % PAGE_SIZE as u64 != 0 {
            return Err(ConfigError::InvalidField {
                field: "segment_mb",
                reason: "segment must be a multiple of the page size",
            });
        }
        if self.cache_mb == 0 {
            return Err(ConfigError::InvalidField {
                field: "cache_mb",
                reason: "must be > 0",
            });
        }
        if self.max_cache_entries == 0 {
            return Err(ConfigError::InvalidField {
                field: "max_cache_entries",
                reason: "must be > 0",
            });
        }
        if self.compression_min_level < 1 || self.compression_max_level < self.compression_min_level
        {
            return Err(ConfigError::InvalidField {
                field: "compression levels",
                reason: "need 1 <= min <= max",
            });
        }
        if !(0.0..=1.0).contains(&self.adaptive_threshold) {
            return Err(ConfigError::InvalidField {
                field: "adaptive_threshold",
                reason: "must be within [0, 1]",
            });
        }
        Ok(self)
    }

    /// Segment size in bytes.
    #[must_use]
    pub fn segment_bytes(&self) -> u64 {
        self.segment_mb * 1024 * 1024
    }

    /// Pages per worker segment.
    #[must_use]
    pub fn pages_per_segment(&self) -> u64 {
        self.segment_bytes() / PAGE_SIZE as u64
    }

    /// Ring-log capacity in bytes.
    #[must_use]
    pub fn ring_capacity(&self) -> usize {
        usize::try_from(self.cache_mb * 1024 * 1024).unwrap_or(usize::MAX)
    }

    /// Total addressable bytes (`cores * segment`).
    #[must_use]
    pub fn addressable_bytes(&self) -> u64 {
        u64::from(self.cores) * self.segment_bytes()
    }

    /// First byte of `worker`'s segment.
    #[must_use]
    pub fn segment_base(&self, worker: WorkerId) -> PageOffset {
        PageOffset(u64::from(worker.0) * self.segment_bytes())
    }
}
