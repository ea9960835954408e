//! Per-server failure counters

use std::sync::atomic::{AtomicU32, Ordering};

/// Credit added to a failure count when computing the skip probability
pub const BASE_FAILURE_CREDIT: u32 = 20;

/// Failure counts stop growing here, so a skip is never certain
pub const MAX_FAILURE_COUNT: u32 = 30;

/// Failure counters indexed like the server list
#[derive(Debug)]
pub struct ServerHealth {
    counters: Vec<AtomicU32>,
}

impl ServerHealth {
    /// Create `len` counters, all healthy
    pub fn new(len: usize) -> Self {
        ServerHealth {
            counters: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Current failure count of server `idx`
    pub fn failures(&self, idx: usize) -> u32 {
        self.counters
            .get(idx)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of every counter
    pub fn snapshot(&self) -> Vec<u32> {
        self.counters
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    /// Reset server `idx` to healthy
    pub fn report_success(&self, idx: usize) {
        if let Some(counter) = self.counters.get(idx) {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Count one failure of server `idx`, saturating at `MAX_FAILURE_COUNT`
    pub fn report_failure(&self, idx: usize) {
        if let Some(counter) = self.counters.get(idx) {
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |f| {
                (f < MAX_FAILURE_COUNT).then_some(f + 1)
            });
        }
    }
}
