//! Circular diagnostic tap of recently written pages.
//!
//! A fixed buffer with a single cursor; each append copies one page and
//! advances the cursor modulo the capacity. A wrap never splits a page:
//! when the space left at the cursor is short, the append is dropped and
//! counted as an overflow. Not in the data path.

use pagecore_error::{PcError, Result};
use pagecore_types::{ConfigError, PageOffset, PAGE_SIZE};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{trace, warn};

#[derive(Debug)]
struct RingState {
    buf: Vec<u8>,
    cursor: usize,
    appends: u64,
    overflows: u64,
}

/// Fixed-size circular byte buffer of recently written pages.
#[derive(Debug)]
pub struct RingLog {
    state: Mutex<RingState>,
    capacity: usize,
}

/// Point-in-time ring counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RingMetrics {
    pub appends: u64,
    pub overflows: u64,
}

impl RingLog {
    /// Allocate a ring of `capacity` bytes.
    ///
    /// The capacity must be a nonzero multiple of the page size so the
    /// cursor always wraps on a page boundary.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity % PAGE_SIZE != 0 {
            return Err(PcError::Config(ConfigError::InvalidField {
                field: "ring capacity",
                reason: "must be a nonzero multiple of the page size",
            }));
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity).map_err(|_| PcError::Alloc)?;
        buf.resize(capacity, 0);
        Ok(Self {
            state: Mutex::new(RingState {
                buf,
                cursor: 0,
                appends: 0,
                overflows: 0,
            }),
            capacity,
        })
    }

    /// Append one page; `offset` is only carried into the trace event.
    pub fn append(&self, offset: PageOffset, page: &[u8]) {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let mut state = self.state.lock();
        let remaining = self.capacity - state.cursor;
        if remaining < page.len() {
            state.overflows += 1;
            warn!(
                target: "pagecore::ring",
                event = "ring_overflow",
                offset = offset.0,
                cursor = state.cursor,
                remaining
            );
            return;
        }
        let cursor = state.cursor;
        state.buf[cursor..cursor + page.len()].copy_from_slice(page);
        state.cursor = (cursor + page.len()) % self.capacity;
        state.appends += 1;
        trace!(
            target: "pagecore::ring",
            event = "ring_append",
            offset = offset.0,
            cursor = state.cursor
        );
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn metrics(&self) -> RingMetrics {
        let state = self.state.lock();
        RingMetrics {
            appends: state.appends,
            overflows: state.overflows,
        }
    }

    /// Copy of the page most recently appended (diagnostics only).
    #[must_use]
    pub fn last_page(&self) -> Option<Vec<u8>> {
        let state = self.state.lock();
        if state.appends == 0 {
            return None;
        }
        let start = (state.cursor + self.capacity - PAGE_SIZE) % self.capacity;
        Some(state.buf[start..start + PAGE_SIZE].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_must_be_page_multiple() {
        assert!(RingLog::new(0).is_err());
        assert!(RingLog::new(PAGE_SIZE + 1).is_err());
        assert!(RingLog::new(PAGE_SIZE * 4).is_ok());
    }

    #[test]
    fn append_advances_and_wraps() {
        let ring = RingLog::new(PAGE_SIZE * 2).unwrap();
        for i in 0..5_u8 {
            ring.append(PageOffset(u64::from(i) * 4096), &[i; PAGE_SIZE]);
        }
        let metrics = ring.metrics();
        assert_eq!(metrics.appends, 5);
        assert_eq!(metrics.overflows, 0);
        // Cursor wrapped cleanly; the last page is intact.
        assert_eq!(ring.last_page().unwrap(), vec![4_u8; PAGE_SIZE]);
    }

    #[test]
    fn last_page_empty_ring() {
        let ring = RingLog::new(PAGE_SIZE).unwrap();
        assert!(ring.last_page().is_none());
    }
}
