//! Auto-Tuner
//!
//! A feedback loop over the service's cumulative statistics. Each pass looks
//! at the snapshot-cache hit rate and the mean flush batch size, then nudges
//! the cache capacity and the buffer flush threshold within fixed bounds:
//! a starved cache grows, an over-provisioned one shrinks, tiny batches get
//! a lower threshold (flush sooner), fat batches a higher one.
//!
//! Every adjustment clamps to its floor/ceiling and is a no-op when already
//! at the bound. The loop refuses to act on sparse early data.

use std::sync::Arc;

use tracing::{debug, info};

use crate::buffer::EventBuffer;
use crate::cache::SnapshotCache;
use crate::error::{Error, Result};
use crate::stats::ServiceStats;

// =============================================================================
// Configuration
// =============================================================================

/// Watermarks, factors, and bounds for the tuning loop
#[derive(Debug, Clone)]
pub struct TunerConfig {
    /// Run the tuner every this many flush-loop ticks
    pub cadence_ticks: u32,
    /// Minimum cache lookups before any adjustment happens
    pub min_samples: u64,

    /// Below this hit rate the cache grows
    pub hit_rate_low: f64,
    /// Above this hit rate the cache may shrink
    pub hit_rate_high: f64,
    /// Multiplicative growth factor for cache capacity
    pub cache_grow_factor: f64,
    /// Multiplicative shrink factor for cache capacity
    pub cache_shrink_factor: f64,
    /// Hard floor for cache capacity
    pub cache_floor: usize,
    /// Hard ceiling for cache capacity
    pub cache_ceiling: usize,

    /// Below this mean batch size the flush threshold shrinks
    pub batch_low: f64,
    /// Above this mean batch size the flush threshold grows
    pub batch_high: f64,
    /// Multiplicative shrink factor for the flush threshold
    pub threshold_shrink_factor: f64,
    /// Multiplicative growth factor for the flush threshold
    pub threshold_grow_factor: f64,
    /// Hard floor for the flush threshold
    pub threshold_floor: usize,
    /// Hard ceiling for the flush threshold
    pub threshold_ceiling: usize,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            cadence_ticks: 30,
            min_samples: 100,
            hit_rate_low: 0.5,
            hit_rate_high: 0.9,
            cache_grow_factor: 1.2,
            cache_shrink_factor: 0.9,
            cache_floor: 50,
            cache_ceiling: 200,
            batch_low: 3.0,
            batch_high: 8.0,
            threshold_shrink_factor: 0.8,
            threshold_grow_factor: 1.2,
            threshold_floor: 5,
            threshold_ceiling: 20,
        }
    }
}

impl TunerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cadence_ticks == 0 {
            return Err(Error::Config("tuner cadence must be > 0 ticks".into()));
        }
        if !(0.0..=1.0).contains(&self.hit_rate_low)
            || !(0.0..=1.0).contains(&self.hit_rate_high)
            || self.hit_rate_low >= self.hit_rate_high
        {
            return Err(Error::Config(
                "hit-rate watermarks must satisfy 0 <= low < high <= 1".into(),
            ));
        }
        if self.cache_floor == 0 || self.cache_floor > self.cache_ceiling {
            return Err(Error::Config(
                "cache capacity bounds must satisfy 0 < floor <= ceiling".into(),
            ));
        }
        if self.threshold_floor == 0 || self.threshold_floor > self.threshold_ceiling {
            return Err(Error::Config(
                "flush threshold bounds must satisfy 0 < floor <= ceiling".into(),
            ));
        }
        if self.cache_grow_factor <= 1.0 || self.threshold_grow_factor <= 1.0 {
            return Err(Error::Config("grow factors must be > 1.0".into()));
        }
        if !(0.0..1.0).contains(&self.cache_shrink_factor)
            || !(0.0..1.0).contains(&self.threshold_shrink_factor)
        {
            return Err(Error::Config("shrink factors must be in (0, 1)".into()));
        }
        if self.batch_low >= self.batch_high {
            return Err(Error::Config(
                "batch watermarks must satisfy low < high".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tuner
// =============================================================================

/// Adjusts cache capacity and flush threshold from observed statistics.
pub struct AutoTuner<V> {
    config: TunerConfig,
    cache: Arc<SnapshotCache<V>>,
    buffer: Arc<EventBuffer>,
    stats: Arc<ServiceStats>,
}

impl<V: Clone> AutoTuner<V> {
    pub fn new(
        config: TunerConfig,
        cache: Arc<SnapshotCache<V>>,
        buffer: Arc<EventBuffer>,
        stats: Arc<ServiceStats>,
    ) -> Self {
        Self {
            config,
            cache,
            buffer,
            stats,
        }
    }

    /// Run the tuner at the flush-loop cadence.
    pub fn cadence_ticks(&self) -> u32 {
        self.config.cadence_ticks
    }

    /// One tuning pass. Safe to call at any time; does nothing until enough
    /// lookups have accumulated.
    pub fn tune_once(&self) {
        let hits = self.cache.hits();
        let requests = hits + self.cache.misses();

        if requests < self.config.min_samples {
            debug!(requests, "not enough samples to tune yet");
            return;
        }

        let hit_rate = hits as f64 / requests as f64;
        self.tune_cache_capacity(hit_rate);
        self.tune_flush_threshold(self.stats.avg_batch_size());
    }

    fn tune_cache_capacity(&self, hit_rate: f64) {
        let cfg = &self.config;
        let current = self.cache.max_entries();

        if hit_rate < cfg.hit_rate_low {
            let target = ((current as f64 * cfg.cache_grow_factor) as usize).min(cfg.cache_ceiling);
            if target != current {
                self.cache.set_max_entries(target);
                info!(
                    from = current,
                    to = target,
                    hit_rate = format!("{:.2}", hit_rate),
                    "grew snapshot cache capacity"
                );
            }
        } else if hit_rate > cfg.hit_rate_high && current > cfg.cache_floor {
            let target =
                ((current as f64 * cfg.cache_shrink_factor) as usize).max(cfg.cache_floor);
            if target != current {
                self.cache.set_max_entries(target);
                info!(
                    from = current,
                    to = target,
                    hit_rate = format!("{:.2}", hit_rate),
                    "shrank snapshot cache capacity"
                );
            }
        }
    }

    fn tune_flush_threshold(&self, avg_batch: f64) {
        let cfg = &self.config;
        let current = self.buffer.threshold();

        if avg_batch < cfg.batch_low && current > cfg.threshold_floor {
            let target = ((current as f64 * cfg.threshold_shrink_factor) as usize)
                .max(cfg.threshold_floor);
            if target != current {
                self.buffer.set_threshold(target);
                info!(
                    from = current,
                    to = target,
                    avg_batch = format!("{:.1}", avg_batch),
                    "lowered flush threshold"
                );
            }
        } else if avg_batch > cfg.batch_high && current < cfg.threshold_ceiling {
            let target = ((current as f64 * cfg.threshold_grow_factor) as usize)
                .min(cfg.threshold_ceiling);
            if target != current {
                self.buffer.set_threshold(target);
                info!(
                    from = current,
                    to = target,
                    avg_batch = format!("{:.1}", avg_batch),
                    "raised flush threshold"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
