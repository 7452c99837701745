//! Service Counters
//!
//! Lock-free cumulative counters feeding the stats surface and the
//! auto-tuner. Counters only ever grow; ratios derived from them are
//! computed at read time.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::TieredCacheStats;

/// Monotonic event-pipeline counters
#[derive(Debug, Default)]
pub struct ServiceStats {
    /// Events accepted by `record_event`
    received: AtomicU64,
    /// Events applied to analyzers during flushes
    processed: AtomicU64,
    /// Completed batch flushes
    batch_flushes: AtomicU64,
    /// Events discarded because the buffer hit its hard bound
    dropped: AtomicU64,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, count: u64) {
        self.processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.batch_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn batch_flushes(&self) -> u64 {
        self.batch_flushes.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Mean events per completed flush; zero before the first flush.
    pub fn avg_batch_size(&self) -> f64 {
        let flushes = self.batch_flushes();
        if flushes == 0 {
            0.0
        } else {
            self.processed() as f64 / flushes as f64
        }
    }
}

/// Point-in-time view over every counter the service exposes
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Snapshot cache hits
    pub cache_hits: u64,
    /// Snapshot cache misses
    pub cache_misses: u64,
    /// Snapshot cache hit rate (0.0 - 1.0)
    pub cache_hit_rate: f64,
    /// Entries currently cached
    pub cache_size: usize,
    /// Current snapshot cache entry limit
    pub cache_max_size: usize,
    /// Snapshot entries removed by selective invalidation
    pub cache_invalidations: u64,
    /// Events waiting in the write buffer
    pub buffer_size: usize,
    /// Current flush threshold
    pub buffer_threshold: usize,
    /// Completed batch flushes
    pub batch_flush_count: u64,
    /// Events accepted
    pub total_received: u64,
    /// Events applied to analyzers
    pub total_processed: u64,
    /// Events dropped on buffer overflow
    pub events_dropped: u64,
    /// Sub-result tier cache counters
    pub tiered: TieredCacheStats,
}

// =============================================================================
// Tests
// =============================================================================
