#![forbid(unsafe_code)]
//! Worker pool and supervisor for the pagecore paging runtime.
//!
//! The supervisor owns the swap image and the shared subsystems (page
//! cache, access scheduler, ring log, anticipator) and fans out to one
//! worker thread per configured core. Workers run the
//! load → mutate → compress → write-back loop until a termination flag
//! clears; shutdown joins them and flushes the cache.

pub mod supervisor;
pub mod worker;

pub use supervisor::{RuntimeStats, Supervisor};
pub use worker::{WorkerCounters, WorkerSnapshot};
