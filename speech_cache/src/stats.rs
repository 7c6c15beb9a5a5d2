// Cache counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    memory_hits: Arc<AtomicU64>,
    disk_promotions: Arc<AtomicU64>,
    shared_waits: Arc<AtomicU64>,
    synthesis_calls: Arc<AtomicU64>,
    synthesis_failures: Arc<AtomicU64>,
    persist_failures: Arc<AtomicU64>,
    clears: Arc<AtomicU64>,
}

/// Point-in-time copy of [`CacheStats`] plus current tier sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub disk_promotions: u64,
    pub shared_waits: u64,
    pub synthesis_calls: u64,
    pub synthesis_failures: u64,
    pub persist_failures: u64,
    pub clears: u64,
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub in_flight: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_promotion(&self) {
        self.disk_promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// A caller joined an operation another caller started.
    pub fn record_shared_wait(&self) {
        self.shared_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthesis(&self) {
        self.synthesis_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthesis_failure(&self) {
        self.synthesis_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, memory_entries: usize, disk_entries: usize, in_flight: usize) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_promotions: self.disk_promotions.load(Ordering::Relaxed),
            shared_waits: self.shared_waits.load(Ordering::Relaxed),
            synthesis_calls: self.synthesis_calls.load(Ordering::Relaxed),
            synthesis_failures: self.synthesis_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            memory_entries,
            disk_entries,
            in_flight,
        }
    }
}

impl CacheStatsSnapshot {
    /// Share of lookups answered without calling an engine, in percent.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.disk_promotions + self.shared_waits;
        let total = hits + self.synthesis_calls;
        if total == 0 {
            return 0.0;
        }
        (hits as f64 / total as f64) * 100.0
    }
}
