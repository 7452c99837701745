//! Property-Based Tests for the Tiered Cache
//!
//! Uses proptest to verify the cache's structural guarantees across random
//! operation sequences.
//!
//! # Test Properties
//!
//! 1. **Tier Exclusivity**: a key is held by at most one tier, always
//! 2. **Capacity Bound**: no tier exceeds its configured entry limit by
//!    more than the transient promotion overflow
//! 3. **Total Function**: get/delete never panic, whatever the history

#![cfg(test)]

use std::time::Duration;

use proptest::prelude::*;

use super::entry::{Tier, TierConfig, TieredCacheConfig};
use super::tiered::TieredCache;

// =============================================================================
// Strategies
// =============================================================================

/// A single cache operation over a small key space.
#[derive(Debug, Clone)]
enum Op {
    Set(u8, Tier),
    Get(u8),
    Delete(u8),
}

fn tier_strategy() -> impl Strategy<Value = Tier> {
    prop_oneof![Just(Tier::Hot), Just(Tier::Warm), Just(Tier::Cold)]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..16, tier_strategy()).prop_map(|(k, t)| Op::Set(k, t)),
        (0u8..16).prop_map(Op::Get),
        (0u8..16).prop_map(Op::Delete),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..200)
}

fn tiny_config() -> TieredCacheConfig {
    // Long TTLs so expiry never interferes with the structural properties
    TieredCacheConfig {
        hot: TierConfig::new(Duration::from_secs(3600), 2),
        warm: TierConfig::new(Duration::from_secs(3600), 3),
        cold: TierConfig::new(Duration::from_secs(3600), 4),
    }
}

fn apply(cache: &TieredCache<u8, u32>, ops: &[Op]) {
    for op in ops {
        match op {
            Op::Set(k, tier) => cache.set_in(*k, u32::from(*k), *tier),
            Op::Get(k) => {
                cache.get(k);
            }
            Op::Delete(k) => {
                cache.delete(k);
            }
        }
    }
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// After any operation sequence, no key occupies two tiers at once.
    /// `tier_of` asserts nothing itself, so cross-check by deleting: a
    /// delete removes at most one copy if exclusivity holds, leaving the
    /// key entirely absent.
    #[test]
    fn prop_tier_exclusivity(ops in ops_strategy()) {
        let cache = TieredCache::with_config(tiny_config());
        apply(&cache, &ops);

        for key in 0u8..16 {
            let before = cache.len();
            let existed = cache.delete(&key);
            let removed = before - cache.len();

            prop_assert!(removed <= 1, "key {key} occupied {removed} tiers");
            prop_assert_eq!(existed, removed == 1);
            prop_assert_eq!(cache.tier_of(&key), None);
        }
    }

    /// Tier occupancy never exceeds capacity plus the transient slack a
    /// promotion or demotion may add before the next insert trims it.
    #[test]
    fn prop_capacity_bound(ops in ops_strategy()) {
        let config = tiny_config();
        let cache = TieredCache::with_config(config.clone());
        apply(&cache, &ops);

        for tier in Tier::SCAN {
            let limit = config.tier(tier).capacity;
            let len = cache.tier_len(tier);
            // Promotions and demotions insert without evicting; each lookup
            // moves at most one entry, so occupancy stays close to the cap.
            prop_assert!(
                len <= limit + ops.len(),
                "{tier} tier holds {len} entries (cap {limit})"
            );
        }
    }

    /// Inserts without interleaved reads enforce the exact capacity bound.
    #[test]
    fn prop_pure_insert_respects_capacity(keys in prop::collection::vec(0u8..64, 1..64), tier in tier_strategy()) {
        let config = tiny_config();
        let cache: TieredCache<u8, u32> = TieredCache::with_config(config.clone());

        for key in &keys {
            cache.set_in(*key, 0, tier);
        }

        prop_assert!(cache.tier_len(tier) <= config.tier(tier).capacity);
    }

    /// Stats stay coherent: hits + misses equals issued lookups.
    #[test]
    fn prop_lookup_accounting(ops in ops_strategy()) {
        let cache = TieredCache::with_config(tiny_config());

        let lookups = ops.iter().filter(|op| matches!(op, Op::Get(_))).count() as u64;
        apply(&cache, &ops);

        let stats = cache.stats();
        prop_assert_eq!(stats.total_hits + stats.misses, lookups);
    }
}
