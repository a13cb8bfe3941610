//! Shared cycle state for the /health endpoint.
//! Updated by the pipeline, read by the API.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Cycle bookkeeping shared between the pipeline and the API.
#[derive(Default)]
pub struct HealthState {
    /// True while a scrape cycle (full or single-source) is running.
    pub cycle_running: AtomicBool,
    /// Unix milliseconds when the last cycle finished (0 = none yet).
    pub last_cycle_at_ms: AtomicI64,
    /// Rows inserted by the last cycle.
    pub last_cycle_inserted: AtomicU64,
    pub cycles_completed: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a cycle as started. Returns false if one is already running.
    pub fn try_begin_cycle(&self) -> bool {
        self.cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_cycle(&self) {
        self.cycle_running.store(false, Ordering::Release);
    }

    pub fn record_cycle(&self, finished_at_ms: i64, inserted: u64) {
        self.last_cycle_at_ms.store(finished_at_ms, Ordering::Relaxed);
        self.last_cycle_inserted.store(inserted, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_running(&self) -> bool {
        self.cycle_running.load(Ordering::Acquire)
    }

    pub fn last_cycle_at_ms(&self) -> i64 {
        self.last_cycle_at_ms.load(Ordering::Relaxed)
    }

    pub fn last_cycle_inserted(&self) -> u64 {
        self.last_cycle_inserted.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }
}
