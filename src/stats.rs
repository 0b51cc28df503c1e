// Process-wide counters (relaxed atomics). Read by the periodic stats log and GET /api/stats.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    pub samples_ingested: AtomicU64,
    pub stale_dropped: AtomicU64,
    pub history_saved: AtomicU64,
    pub history_dropped: AtomicU64,
    pub history_pruned: AtomicU64,
    pub viewer_overflows: AtomicU64,
    pub viewers_evicted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub samples_ingested: u64,
    pub stale_dropped: u64,
    pub history_saved: u64,
    pub history_dropped: u64,
    pub history_pruned: u64,
    pub viewer_overflows: u64,
    pub viewers_evicted: u64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_ingested: self.samples_ingested.load(Ordering::Relaxed),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            history_saved: self.history_saved.load(Ordering::Relaxed),
            history_dropped: self.history_dropped.load(Ordering::Relaxed),
            history_pruned: self.history_pruned.load(Ordering::Relaxed),
            viewer_overflows: self.viewer_overflows.load(Ordering::Relaxed),
            viewers_evicted: self.viewers_evicted.load(Ordering::Relaxed),
        }
    }
}
