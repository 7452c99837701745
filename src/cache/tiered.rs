//! Tiered Cache - Hot/Warm/Cold
//!
//! A three-level capacity- and TTL-bounded cache. Reads scan from the hot
//! tier outward; frequently read entries migrate toward the hot tier, and
//! entries squeezed out of a full tier sink one level down instead of being
//! thrown away outright. The migration pair approximates an LFU-within-LRU
//! policy without a frequency sketch.
//!
//! Expiry is lazy: stale entries are dropped when a lookup or an explicit
//! [`TieredCache::cleanup_expired`] sweep finds them. No background task is
//! needed for correctness.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::entry::{CacheEntry, Tier, TieredCacheConfig};

/// Reads (since the last tier change) that lift an entry one tier up.
pub const PROMOTION_THRESHOLD: u32 = 3;

/// Minimum access count for an evicted entry to sink one tier instead of
/// being discarded.
pub const DEMOTION_THRESHOLD: u32 = 2;

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct TierCounters {
    hot_hits: AtomicU64,
    warm_hits: AtomicU64,
    cold_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
}

impl TierCounters {
    fn record_hit(&self, tier: Tier) {
        let counter = match tier {
            Tier::Hot => &self.hot_hits,
            Tier::Warm => &self.warm_hits,
            Tier::Cold => &self.cold_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of tiered cache activity
#[derive(Debug, Clone, Serialize)]
pub struct TieredCacheStats {
    pub hot_entries: usize,
    pub warm_entries: usize,
    pub cold_entries: usize,
    pub total_entries: usize,
    pub hot_hits: u64,
    pub warm_hits: u64,
    pub cold_hits: u64,
    pub total_hits: u64,
    pub misses: u64,
    /// Hits over total lookups (0.0 - 1.0)
    pub hit_rate: f64,
    pub evictions: u64,
    pub promotions: u64,
    pub demotions: u64,
}

// =============================================================================
// Tiered Cache
// =============================================================================

/// Three-tier cache with read-triggered promotion and eviction-triggered
/// demotion.
///
/// A key exists in at most one tier at any time. All tier maps sit behind a
/// single coarse lock; lookups and writes of the same key linearize, so no
/// caller can observe an entry mid-migration.
pub struct TieredCache<K, V> {
    maps: Mutex<[LruCache<K, CacheEntry<V>>; 3]>,
    config: TieredCacheConfig,
    counters: TierCounters,
}

impl<K, V> TieredCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Create a tiered cache with default tier limits.
    pub fn new() -> Self {
        Self::with_config(TieredCacheConfig::default())
    }

    /// Create a tiered cache with custom tier limits.
    ///
    /// Limits are assumed validated; [`TieredCacheConfig::validate`] runs at
    /// service startup.
    pub fn with_config(config: TieredCacheConfig) -> Self {
        Self {
            // Capacity is enforced on insert so entries can migrate between
            // tiers without the map resizing underneath them.
            maps: Mutex::new([
                LruCache::unbounded(),
                LruCache::unbounded(),
                LruCache::unbounded(),
            ]),
            config,
            counters: TierCounters::default(),
        }
    }

    /// Look up a key, scanning hot to cold.
    ///
    /// The first tier holding an unexpired copy wins: the entry is touched,
    /// moved to the recently-used end of its tier, and possibly promoted.
    /// Expired copies found along the way are dropped and the scan continues
    /// into colder tiers.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut maps = self.maps.lock();

        for tier in Tier::SCAN {
            let ttl = self.config.tier(tier).ttl;

            let expired = match maps[tier.index()].peek(key) {
                None => continue,
                Some(entry) => entry.is_expired(ttl),
            };
            if expired {
                maps[tier.index()].pop(key);
                continue;
            }

            let (value, promotable) = match maps[tier.index()].get_mut(key) {
                Some(entry) => {
                    entry.touch();
                    (
                        entry.value.clone(),
                        entry.access_count >= PROMOTION_THRESHOLD,
                    )
                }
                None => continue,
            };

            self.counters.record_hit(tier);

            if promotable {
                self.promote(&mut maps, key, tier);
            }

            return Some(value);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert a value into the warm tier.
    pub fn set(&self, key: K, value: V) {
        self.set_in(key, value, Tier::Warm);
    }

    /// Insert a value into a specific tier.
    ///
    /// Any copy of the key living in another tier is removed first, keeping
    /// the one-tier-per-key invariant. If the target tier overflows its
    /// capacity, its least-recently-used entry is evicted and, if it had
    /// been read at least [`DEMOTION_THRESHOLD`] times, reinserted one tier
    /// down with a fresh TTL.
    pub fn set_in(&self, key: K, value: V, tier: Tier) {
        let mut maps = self.maps.lock();

        for other in Tier::SCAN {
            if other != tier {
                maps[other.index()].pop(&key);
            }
        }

        maps[tier.index()].put(key.clone(), CacheEntry::new(value, tier));

        debug_assert!(
            Tier::SCAN
                .iter()
                .filter(|t| maps[t.index()].contains(&key))
                .count()
                == 1,
            "key {key:?} present in more than one tier"
        );

        let capacity = self.config.tier(tier).capacity;
        if maps[tier.index()].len() > capacity {
            if let Some((victim_key, mut victim)) = maps[tier.index()].pop_lru() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);

                match tier.colder() {
                    Some(target) if victim.access_count >= DEMOTION_THRESHOLD => {
                        victim.reassign(target);
                        victim.restart_ttl();
                        maps[target.index()].put(victim_key.clone(), victim);
                        self.counters.demotions.fetch_add(1, Ordering::Relaxed);
                        debug!(key = ?victim_key, from = %tier, to = %target, "cache demotion");
                    }
                    _ => {
                        debug!(key = ?victim_key, tier = %tier, "cache eviction");
                    }
                }
            }
        }
    }

    /// Remove a key from whichever tier holds it.
    ///
    /// Returns `false` when the key was not cached; the cache is unchanged
    /// in that case.
    pub fn delete(&self, key: &K) -> bool {
        let mut maps = self.maps.lock();
        let mut deleted = false;
        for tier in Tier::SCAN {
            if maps[tier.index()].pop(key).is_some() {
                deleted = true;
            }
        }
        deleted
    }

    /// Drop every entry in one tier, or in all tiers.
    pub fn clear(&self, tier: Option<Tier>) {
        let mut maps = self.maps.lock();
        match tier {
            Some(tier) => maps[tier.index()].clear(),
            None => {
                for tier in Tier::SCAN {
                    maps[tier.index()].clear();
                }
            }
        }
    }

    /// Sweep out every expired entry. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut maps = self.maps.lock();
        let mut cleaned = 0;

        for tier in Tier::SCAN {
            let ttl = self.config.tier(tier).ttl;
            let stale: Vec<K> = maps[tier.index()]
                .iter()
                .filter(|(_, entry)| entry.is_expired(ttl))
                .map(|(key, _)| key.clone())
                .collect();

            for key in stale {
                maps[tier.index()].pop(&key);
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            debug!(count = cleaned, "removed expired cache entries");
        }
        cleaned
    }

    /// Which tier currently holds the key, without touching recency or
    /// access counts. Expired entries still count until a lookup or sweep
    /// removes them.
    pub fn tier_of(&self, key: &K) -> Option<Tier> {
        let maps = self.maps.lock();
        Tier::SCAN
            .into_iter()
            .find(|tier| maps[tier.index()].contains(key))
    }

    /// Entry count for one tier.
    pub fn tier_len(&self, tier: Tier) -> usize {
        self.maps.lock()[tier.index()].len()
    }

    /// Entry count across all tiers.
    pub fn len(&self) -> usize {
        let maps = self.maps.lock();
        Tier::SCAN.iter().map(|t| maps[t.index()].len()).sum()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of counters and per-tier occupancy.
    pub fn stats(&self) -> TieredCacheStats {
        let (hot_entries, warm_entries, cold_entries) = {
            let maps = self.maps.lock();
            (
                maps[Tier::Hot.index()].len(),
                maps[Tier::Warm.index()].len(),
                maps[Tier::Cold.index()].len(),
            )
        };

        let hot_hits = self.counters.hot_hits.load(Ordering::Relaxed);
        let warm_hits = self.counters.warm_hits.load(Ordering::Relaxed);
        let cold_hits = self.counters.cold_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total_hits = hot_hits + warm_hits + cold_hits;
        let total_requests = total_hits + misses;

        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            total_hits as f64 / total_requests as f64
        };

        TieredCacheStats {
            hot_entries,
            warm_entries,
            cold_entries,
            total_entries: hot_entries + warm_entries + cold_entries,
            hot_hits,
            warm_hits,
            cold_hits,
            total_hits,
            misses,
            hit_rate,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            demotions: self.counters.demotions.load(Ordering::Relaxed),
        }
    }

    /// Lift an entry one tier up, resetting its access count. The creation
    /// timestamp is preserved so promotion does not extend an entry's life.
    fn promote(&self, maps: &mut [LruCache<K, CacheEntry<V>>; 3], key: &K, from: Tier) {
        let Some(target) = from.warmer() else {
            return;
        };
        if let Some(mut entry) = maps[from.index()].pop(key) {
            entry.reassign(target);
            maps[target.index()].put(key.clone(), entry);
            self.counters.promotions.fetch_add(1, Ordering::Relaxed);
            debug!(key = ?key, from = %from, to = %target, "cache promotion");
        }
    }

    #[cfg(test)]
    fn access_count_of(&self, key: &K) -> Option<u32> {
        let maps = self.maps.lock();
        Tier::SCAN
            .into_iter()
            .find_map(|tier| maps[tier.index()].peek(key).map(|e| e.access_count))
    }
}

impl<K, V> Default for TieredCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
