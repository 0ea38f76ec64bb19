//! Redelivery deduplication
//!
//! At-least-once delivery means a consumer can see the same checkout twice.
//! The ledger remembers recently processed list ids in a bounded FIFO window
//! so duplicates are acknowledged without side effects. Oldest ids are
//! evicted once the window is full.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

pub const DEFAULT_LEDGER_CAPACITY: usize = 1024;

struct LedgerInner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

/// Bounded window of recently processed ids.
pub struct IdempotencyLedger {
    inner: Mutex<LedgerInner>,
    capacity: usize,
}

impl IdempotencyLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                seen: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Returns true exactly once per id within the window. A second call for
    /// the same id (a redelivery) returns false.
    pub fn first_sighting(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();

        if inner.seen.contains(id) {
            return false;
        }

        if inner.order.len() >= self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }

        inner.seen.insert(id.to_string());
        inner.order.push_back(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdempotencyLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}
