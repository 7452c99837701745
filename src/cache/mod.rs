//! Caching core
//!
//! Two cooperating caches keep recomputation off the snapshot path:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ SnapshotCache      assembled snapshots, LRU + TTL,           │
//! │                    selective (scope, subject) invalidation   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ TieredCache        per-entity sub-results                    │
//! │   hot   ── short TTL, small, high-frequency entries          │
//! │   warm  ── default placement for new entries                 │
//! │   cold  ── long TTL, large, low-frequency entries            │
//! │          read-promotion ▲ / eviction-demotion ▼              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both caches take one coarse lock each; entry counts are small enough
//! that per-entry locking would buy nothing.

mod entry;
mod snapshot;
mod tiered;

#[cfg(test)]
mod proptest;

pub use entry::{CacheEntry, Tier, TierConfig, TieredCacheConfig};
pub use snapshot::{SnapshotCache, SnapshotCacheConfig, SnapshotKey, SubjectSelector};
pub use tiered::{TieredCache, TieredCacheStats, DEMOTION_THRESHOLD, PROMOTION_THRESHOLD};
