//! Shared health state for the /api/health endpoint.
//! Updated by the deal service and the purger.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Shared counters. Updated by service components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// Submissions stored (new or updated).
    accepted_total: AtomicU64,
    /// Submissions rejected by an active suppression window.
    suppressed_total: AtomicU64,
    /// Soft deletions.
    deleted_total: AtomicU64,
    /// Suppression entries removed by the purger.
    purged_total: AtomicU64,
    /// Epoch ms of the last completed purge (0 = never).
    last_purge_at_ms: AtomicI64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_accepted(&self) {
        self.accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_suppressed(&self) {
        self.suppressed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deleted(&self) {
        self.deleted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purge(&self, purged: u64, at_ms: i64) {
        self.purged_total.fetch_add(purged, Ordering::Relaxed);
        self.last_purge_at_ms.store(at_ms, Ordering::Relaxed);
    }

    pub fn accepted_total(&self) -> u64 {
        self.accepted_total.load(Ordering::Relaxed)
    }

    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_total.load(Ordering::Relaxed)
    }

    pub fn deleted_total(&self) -> u64 {
        self.deleted_total.load(Ordering::Relaxed)
    }

    pub fn purged_total(&self) -> u64 {
        self.purged_total.load(Ordering::Relaxed)
    }

    pub fn last_purge_at_ms(&self) -> Option<i64> {
        match self.last_purge_at_ms.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }
}
