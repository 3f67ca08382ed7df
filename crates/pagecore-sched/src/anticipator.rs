//! Access-pattern table gating the worker prefetch.
//!
//! Every access is learned into a bounded prediction table; an offset is
//! worth prefetching when its own entry is confident, frequent and recent,
//! or when the most recently learned offset predicts it as a successor
//! (a shallow Markov chain over the access stream).

use pagecore_types::PageOffset;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maximum tracked offsets.
const TABLE_CAP: usize = 512;

/// Successor slots per entry.
const MARKOV_DEPTH: usize = 3;

/// An entry must have been touched within this window to gate a prefetch.
const PREFETCH_RECENCY: Duration = Duration::from_secs(15);

/// Confidence floor on the entry itself.
const CONF_FLOOR: u32 = 3;

/// Frequency floor on the entry itself.
const FREQ_FLOOR: u32 = 2;

/// Confidence floor on a Markov successor.
const SUCCESSOR_CONF_FLOOR: u32 = 2;

#[derive(Debug, Clone)]
struct Prediction {
    conf: u32,
    freq: u32,
    last_seen: Instant,
    successors: [(Option<PageOffset>, u32); MARKOV_DEPTH],
}

#[derive(Debug, Default)]
struct AnticipatorState {
    table: HashMap<PageOffset, Prediction>,
    last_learned: Option<PageOffset>,
}

/// Bounded access-pattern predictor.
#[derive(Debug, Default)]
pub struct Anticipator {
    state: Mutex<AnticipatorState>,
}

impl Anticipator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn one access, recording the Markov transition from the
    /// previously learned offset. The oldest entry is replaced when the
    /// table is full.
    pub fn learn(&self, offset: PageOffset) {
        let mut state = self.state.lock();
        let now = Instant::now();

        match state.table.get_mut(&offset) {
            Some(entry) => {
                entry.conf = entry.conf.saturating_add(1);
                entry.freq = entry.freq.saturating_add(1);
                entry.last_seen = now;
            }
            None => {
                if state.table.len() >= TABLE_CAP {
                    let oldest = state
                        .table
                        .iter()
                        .min_by_key(|(_, entry)| entry.last_seen)
                        .map(|(key, _)| *key);
                    if let Some(key) = oldest {
                        state.table.remove(&key);
                    }
                }
                state.table.insert(
                    offset,
                    Prediction {
                        conf: 1,
                        freq: 1,
                        last_seen: now,
                        successors: [(None, 0); MARKOV_DEPTH],
                    },
                );
            }
        }

        if let Some(prev) = state.last_learned {
            if prev != offset {
                if let Some(entry) = state.table.get_mut(&prev) {
                    for slot in &mut entry.successors {
                        match slot.0 {
                            Some(existing) if existing == offset => {
                                slot.1 = slot.1.saturating_add(1);
                                break;
                            }
                            None => {
                                *slot = (Some(offset), 1);
                                break;
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
        }
        state.last_learned = Some(offset);
    }

    /// Whether `offset` is worth prefetching right now.
    #[must_use]
    pub fn prefetch_ok(&self, offset: PageOffset) -> bool {
        let state = self.state.lock();
        let now = Instant::now();

        if let Some(entry) = state.table.get(&offset) {
            if entry.conf >= CONF_FLOOR
                && entry.freq >= FREQ_FLOOR
                && now.duration_since(entry.last_seen) < PREFETCH_RECENCY
            {
                return true;
            }
        }

        if let Some(last) = state.last_learned {
            if let Some(entry) = state.table.get(&last) {
                return entry.successors.iter().any(|(successor, conf)| {
                    *successor == Some(offset) && *conf >= SUCCESSOR_CONF_FLOOR
                });
            }
        }
        false
    }

    /// Tracked entry count (diagnostics).
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn off(page: u64) -> PageOffset {
        PageOffset(page * 4096)
    }

    #[test]
    fn unseen_offset_is_not_prefetched() {
        let anticipator = Anticipator::new();
        assert!(!anticipator.prefetch_ok(off(1)));
    }

    #[test]
    fn confidence_builds_after_repeated_accesses() {
        let anticipator = Anticipator::new();
        anticipator.learn(off(4));
        anticipator.learn(off(4));
        assert!(!anticipator.prefetch_ok(off(4)));
        anticipator.learn(off(4));
        assert!(anticipator.prefetch_ok(off(4)));
    }

    #[test]
    fn markov_successor_predicts_next_block() {
        let anticipator = Anticipator::new();
        // A → B twice: A's successor slot for B reaches the floor.
        anticipator.learn(off(1));
        anticipator.learn(off(2));
        anticipator.learn(off(1));
        anticipator.learn(off(2));
        anticipator.learn(off(1));
        // B itself is below the confidence floor, but the chain carries it.
        assert!(anticipator.prefetch_ok(off(2)));
        assert!(!anticipator.prefetch_ok(off(9)));
    }

    #[test]
    fn self_transitions_are_not_recorded() {
        let anticipator = Anticipator::new();
        for _ in 0..5 {
            anticipator.learn(off(3));
        }
        let state = anticipator.state.lock();
        let entry = state.table.get(&off(3)).unwrap();
        assert!(entry.successors.iter().all(|(slot, _)| slot.is_none()));
    }

    #[test]
    fn table_stays_bounded() {
        let anticipator = Anticipator::new();
        for page in 0..(TABLE_CAP as u64 + 40) {
            anticipator.learn(off(page));
        }
        assert_eq!(anticipator.len(), TABLE_CAP);
    }
}
