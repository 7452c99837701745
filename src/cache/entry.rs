//! Cache Entry Types
//!
//! The tier model and per-entry bookkeeping shared by the tiered cache.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{Error, Result};

// =============================================================================
// Tiers
// =============================================================================

/// Cache tier classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Tier {
    /// Hot data: shortest TTL, smallest capacity, highest access frequency
    Hot,
    /// Warm data: regular access
    Warm,
    /// Cold data: longest TTL, largest capacity, low access frequency
    Cold,
}

impl Tier {
    /// Lookup order for `get`: hottest tier first.
    pub const SCAN: [Tier; 3] = [Tier::Hot, Tier::Warm, Tier::Cold];

    /// Index into per-tier storage arrays.
    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Tier::Hot => 0,
            Tier::Warm => 1,
            Tier::Cold => 2,
        }
    }

    /// The next warmer tier, if any (promotion target).
    pub fn warmer(self) -> Option<Tier> {
        match self {
            Tier::Hot => None,
            Tier::Warm => Some(Tier::Hot),
            Tier::Cold => Some(Tier::Warm),
        }
    }

    /// The next colder tier, if any (demotion target).
    pub fn colder(self) -> Option<Tier> {
        match self {
            Tier::Hot => Some(Tier::Warm),
            Tier::Warm => Some(Tier::Cold),
            Tier::Cold => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Hot => write!(f, "hot"),
            Tier::Warm => write!(f, "warm"),
            Tier::Cold => write!(f, "cold"),
        }
    }
}

// =============================================================================
// Tier Configuration
// =============================================================================

/// Capacity and TTL limits for a single tier
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Entry lifetime within this tier
    pub ttl: Duration,
    /// Maximum number of entries held by this tier
    pub capacity: usize,
}

impl TierConfig {
    /// Create a tier configuration.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self { ttl, capacity }
    }
}

/// Configuration for all three tiers
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    pub hot: TierConfig,
    pub warm: TierConfig,
    pub cold: TierConfig,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            hot: TierConfig::new(Duration::from_secs(10), 50),
            warm: TierConfig::new(Duration::from_secs(60), 200),
            cold: TierConfig::new(Duration::from_secs(300), 500),
        }
    }
}

impl TieredCacheConfig {
    /// Limits for one tier.
    pub fn tier(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Hot => &self.hot,
            Tier::Warm => &self.warm,
            Tier::Cold => &self.cold,
        }
    }

    /// Reject unusable limits before the cache is constructed.
    pub fn validate(&self) -> Result<()> {
        for tier in Tier::SCAN {
            let cfg = self.tier(tier);
            if cfg.capacity == 0 {
                return Err(Error::Config(format!("{} tier capacity must be > 0", tier)));
            }
            if cfg.ttl.is_zero() {
                return Err(Error::Config(format!("{} tier TTL must be > 0", tier)));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached value with the bookkeeping that drives promotion and expiry.
///
/// An entry belongs to exactly one tier at a time; its access count restarts
/// at zero whenever it changes tier so a burst of reads cannot ratchet an
/// entry through multiple tiers at once.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value
    pub value: V,
    /// When the entry was created (or last demoted; demotion restarts TTL)
    pub created_at: Instant,
    /// The tier currently holding this entry
    pub tier: Tier,
    /// Reads since the entry last changed tier
    pub access_count: u32,
    /// Last successful read
    pub last_access: Instant,
}

impl<V> CacheEntry<V> {
    /// Create a fresh entry in the given tier.
    pub fn new(value: V, tier: Tier) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            tier,
            access_count: 0,
            last_access: now,
        }
    }

    /// Whether the entry has outlived the given TTL.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }

    /// Record a successful read.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_access = Instant::now();
    }

    /// Move the entry to another tier, resetting its access count.
    ///
    /// The creation timestamp is preserved: a promoted entry keeps its age.
    pub fn reassign(&mut self, tier: Tier) {
        self.tier = tier;
        self.access_count = 0;
    }

    /// Restart the TTL clock (used on demotion).
    pub fn restart_ttl(&mut self) {
        self.created_at = Instant::now();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_scan_order() {
        assert_eq!(Tier::SCAN, [Tier::Hot, Tier::Warm, Tier::Cold]);
    }

    #[test]
    fn test_tier_neighbors() {
        assert_eq!(Tier::Hot.warmer(), None);
        assert_eq!(Tier::Warm.warmer(), Some(Tier::Hot));
        assert_eq!(Tier::Cold.warmer(), Some(Tier::Warm));

        assert_eq!(Tier::Hot.colder(), Some(Tier::Warm));
        assert_eq!(Tier::Warm.colder(), Some(Tier::Cold));
        assert_eq!(Tier::Cold.colder(), None);
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(format!("{}", Tier::Hot), "hot");
        assert_eq!(format!("{}", Tier::Warm), "warm");
        assert_eq!(format!("{}", Tier::Cold), "cold");
    }

    #[test]
    fn test_default_config_ordering() {
        let config = TieredCacheConfig::default();

        // Hotter tiers are smaller and shorter-lived
        assert!(config.hot.ttl < config.warm.ttl);
        assert!(config.warm.ttl < config.cold.ttl);
        assert!(config.hot.capacity < config.warm.capacity);
        assert!(config.warm.capacity < config.cold.capacity);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        let mut config = TieredCacheConfig::default();
        config.warm.capacity = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("warm"));
    }

    #[test]
    fn test_config_rejects_zero_ttl() {
        let mut config = TieredCacheConfig::default();
        config.cold.ttl = Duration::ZERO;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_entry_expiry() {
        let entry = CacheEntry::new(1u32, Tier::Warm);

        assert!(!entry.is_expired(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(30));
        assert!(entry.is_expired(Duration::from_millis(10)));
    }

    #[test]
    fn test_entry_touch_and_reassign() {
        let mut entry = CacheEntry::new("v", Tier::Cold);
        assert_eq!(entry.access_count, 0);

        entry.touch();
        entry.touch();
        assert_eq!(entry.access_count, 2);

        let created = entry.created_at;
        entry.reassign(Tier::Warm);
        assert_eq!(entry.tier, Tier::Warm);
        assert_eq!(entry.access_count, 0);
        // Promotion keeps the original age
        assert_eq!(entry.created_at, created);
    }

    #[test]
    fn test_entry_ttl_restart() {
        let mut entry = CacheEntry::new(0u8, Tier::Hot);
        std::thread::sleep(Duration::from_millis(20));
        assert!(entry.is_expired(Duration::from_millis(5)));

        entry.restart_ttl();
        assert!(!entry.is_expired(Duration::from_millis(5)));
    }
}
