//! Snapshot Cache
//!
//! Keyed cache for assembled telemetry snapshots: LRU-ordered, capacity
//! bounded, with its own TTL independent of the tiered sub-result cache.
//!
//! Writes do not flush the whole cache. An incoming event invalidates only
//! the entries whose key names the affected conversation scope and subject,
//! so one busy conversation cannot wipe out snapshots for every other one.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

// =============================================================================
// Keys
// =============================================================================

/// Which subjects a snapshot covers.
///
/// Subject ids are stored sorted and deduplicated so that equality and
/// hashing are independent of request order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubjectSelector {
    /// Snapshot over every subject known to the scope
    All,
    /// Snapshot over an explicit set of subject ids
    Ids(Vec<String>),
}

impl SubjectSelector {
    /// Build a selector from an optional id list; `None` means all subjects.
    pub fn from_ids(ids: Option<&[String]>) -> Self {
        match ids {
            None => SubjectSelector::All,
            Some(ids) => {
                let mut ids: Vec<String> = ids.to_vec();
                ids.sort();
                ids.dedup();
                SubjectSelector::Ids(ids)
            }
        }
    }

    /// Whether a write touching `subject_id` affects snapshots under this
    /// selector. Membership is exact: the id `"u1"` never matches `"u12"`.
    pub fn covers(&self, subject_id: &str) -> bool {
        match self {
            SubjectSelector::All => true,
            SubjectSelector::Ids(ids) => ids.iter().any(|id| id == subject_id),
        }
    }
}

/// Identity of a cached snapshot: the conversation scope plus the subject
/// selection it was computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub scope: Option<String>,
    pub subjects: SubjectSelector,
}

impl SnapshotKey {
    pub fn new(scope: Option<&str>, subjects: Option<&[String]>) -> Self {
        Self {
            scope: scope.map(str::to_owned),
            subjects: SubjectSelector::from_ids(subjects),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Snapshot cache limits
#[derive(Debug, Clone)]
pub struct SnapshotCacheConfig {
    /// How long a cached snapshot stays servable
    pub ttl: Duration,
    /// Initial entry limit; the auto-tuner may move it afterwards
    pub max_entries: usize,
}

impl Default for SnapshotCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_entries: 100,
        }
    }
}

impl SnapshotCacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::Config("snapshot cache capacity must be > 0".into()));
        }
        if self.ttl.is_zero() {
            return Err(Error::Config("snapshot cache TTL must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Snapshot Cache
// =============================================================================

struct Timestamped<V> {
    value: V,
    created_at: Instant,
}

/// LRU + TTL cache of computed snapshots with selective invalidation.
///
/// Capacity lives in an atomic so the auto-tuner can resize a running cache;
/// shrinking takes effect by trimming on the next insert.
pub struct SnapshotCache<V> {
    entries: Mutex<LruCache<SnapshotKey, Timestamped<V>>>,
    ttl: Duration,
    max_entries: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl<V: Clone> SnapshotCache<V> {
    pub fn new(config: SnapshotCacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            ttl: config.ttl,
            max_entries: AtomicUsize::new(config.max_entries),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Fetch a fresh entry, marking it most recently used.
    ///
    /// A stale entry is removed on sight; LRU position does not keep an
    /// entry alive past its TTL. Misses (absent or stale) are counted.
    pub fn get(&self, key: &SnapshotKey) -> Option<V> {
        let mut entries = self.entries.lock();

        let fresh = match entries.peek(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => entry.created_at.elapsed() < self.ttl,
        };

        if !fresh {
            entries.pop(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let value = entries.get(key).map(|e| e.value.clone());
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Store a snapshot as most recently used, evicting from the LRU end
    /// while over capacity.
    pub fn insert(&self, key: SnapshotKey, value: V) {
        let mut entries = self.entries.lock();
        entries.put(
            key,
            Timestamped {
                value,
                created_at: Instant::now(),
            },
        );

        let max = self.max_entries.load(Ordering::Relaxed);
        while entries.len() > max {
            if let Some((evicted, _)) = entries.pop_lru() {
                debug!(scope = ?evicted.scope, "snapshot cache full, evicted LRU entry");
            } else {
                break;
            }
        }
    }

    /// Return a fresh cached value or compute, store, and return a new one.
    ///
    /// The cache lock is not held while `compute` runs; concurrent callers
    /// missing on the same key may compute twice, which is the accepted
    /// inline-recompute cost.
    pub async fn get_or_compute<F, Fut>(&self, key: SnapshotKey, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = V>,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }

        let value = compute().await;
        self.insert(key, value.clone());
        value
    }

    /// Drop the entries a write to `(scope_id, subject_id)` could have made
    /// stale: scope must match, and the key's selector must be `All` or
    /// literally contain the subject id. Returns how many entries were
    /// removed.
    pub fn invalidate_subject(&self, scope_id: &str, subject_id: &str) -> usize {
        let mut entries = self.entries.lock();

        let stale: Vec<SnapshotKey> = entries
            .iter()
            .filter(|(key, _)| {
                key.scope.as_deref() == Some(scope_id) && key.subjects.covers(subject_id)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            entries.pop(key);
        }

        if !stale.is_empty() {
            self.invalidations
                .fetch_add(stale.len() as u64, Ordering::Relaxed);
            debug!(
                scope = scope_id,
                subject = subject_id,
                count = stale.len(),
                "invalidated snapshot cache entries"
            );
        }
        stale.len()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current entry limit.
    pub fn max_entries(&self) -> usize {
        self.max_entries.load(Ordering::Relaxed)
    }

    /// Resize the entry limit (auto-tuner hook). Shrinking trims lazily on
    /// the next insert.
    pub fn set_max_entries(&self, max: usize) {
        self.max_entries.store(max.max(1), Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Hits over total lookups (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max: usize, ttl: Duration) -> SnapshotCache<String> {
        SnapshotCache::new(SnapshotCacheConfig {
            ttl,
            max_entries: max,
        })
    }

    fn key(scope: &str, subjects: &[&str]) -> SnapshotKey {
        let ids: Vec<String> = subjects.iter().map(|s| s.to_string()).collect();
        SnapshotKey::new(Some(scope), Some(&ids))
    }

    fn all_key(scope: &str) -> SnapshotKey {
        SnapshotKey::new(Some(scope), None)
    }

    #[test]
    fn test_selector_is_order_independent() {
        let a = SubjectSelector::from_ids(Some(&["b".into(), "a".into(), "a".into()]));
        let b = SubjectSelector::from_ids(Some(&["a".into(), "b".into()]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_selector_exact_membership() {
        let selector = SubjectSelector::from_ids(Some(&["u1".into()]));
        assert!(selector.covers("u1"));
        assert!(!selector.covers("u12"));
        assert!(!selector.covers("u"));

        assert!(SubjectSelector::All.covers("anyone"));
    }

    #[test]
    fn test_get_insert_roundtrip() {
        let cache = cache(10, Duration::from_secs(60));
        let k = key("chat-1", &["u1"]);

        assert_eq!(cache.get(&k), None);
        assert_eq!(cache.misses(), 1);

        cache.insert(k.clone(), "snapshot".into());
        assert_eq!(cache.get(&k), Some("snapshot".into()));
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_ttl_expiry_beats_recency() {
        let cache = cache(10, Duration::from_millis(30));
        let k = all_key("chat-1");

        cache.insert(k.clone(), "v".into());
        assert!(cache.get(&k).is_some());

        std::thread::sleep(Duration::from_millis(50));

        // Still the most recently used entry, but stale
        assert_eq!(cache.get(&k), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_evicts_lru() {
        let cache = cache(2, Duration::from_secs(60));

        cache.insert(key("a", &[]), "1".into());
        cache.insert(key("b", &[]), "2".into());

        // Touch "a" so "b" is the LRU victim
        cache.get(&key("a", &[]));
        cache.insert(key("c", &[]), "3".into());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a", &[])).is_some());
        assert!(cache.get(&key("b", &[])).is_none());
        assert!(cache.get(&key("c", &[])).is_some());
    }

    #[test]
    fn test_selective_invalidation() {
        let cache = cache(10, Duration::from_secs(60));

        cache.insert(key("A", &["u1"]), "a-u1".into());
        cache.insert(key("A", &["u2"]), "a-u2".into());
        cache.insert(key("B", &["u1"]), "b-u1".into());

        let removed = cache.invalidate_subject("A", "u1");
        assert_eq!(removed, 1);

        assert!(cache.get(&key("A", &["u1"])).is_none());
        assert!(cache.get(&key("A", &["u2"])).is_some());
        assert!(cache.get(&key("B", &["u1"])).is_some());
        assert_eq!(cache.invalidations(), 1);
    }

    #[test]
    fn test_invalidation_hits_all_selector() {
        let cache = cache(10, Duration::from_secs(60));

        cache.insert(all_key("A"), "a-all".into());
        cache.insert(all_key("B"), "b-all".into());

        assert_eq!(cache.invalidate_subject("A", "whoever"), 1);
        assert!(cache.get(&all_key("A")).is_none());
        assert!(cache.get(&all_key("B")).is_some());
    }

    #[test]
    fn test_invalidation_ignores_substring_ids() {
        let cache = cache(10, Duration::from_secs(60));

        cache.insert(key("A", &["u12"]), "wide".into());
        cache.insert(key("A", &["u1", "u3"]), "narrow".into());

        assert_eq!(cache.invalidate_subject("A", "u1"), 1);
        assert!(cache.get(&key("A", &["u12"])).is_some());
        assert!(cache.get(&key("A", &["u1", "u3"])).is_none());
    }

    #[test]
    fn test_invalidation_skips_scopeless_keys() {
        let cache = cache(10, Duration::from_secs(60));

        cache.insert(SnapshotKey::new(None, None), "global".into());
        assert_eq!(cache.invalidate_subject("A", "u1"), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_tuner_resize() {
        let cache = cache(4, Duration::from_secs(60));
        for i in 0..4 {
            cache.insert(key(&format!("s{i}"), &[]), i.to_string());
        }
        assert_eq!(cache.len(), 4);

        cache.set_max_entries(2);
        assert_eq!(cache.max_entries(), 2);

        // Shrink applies on the next insert
        cache.insert(key("fresh", &[]), "v".into());
        assert_eq!(cache.len(), 2);

        // A zero limit is clamped rather than emptying the cache forever
        cache.set_max_entries(0);
        assert_eq!(cache.max_entries(), 1);
    }

    #[tokio::test]
    async fn test_get_or_compute() {
        let cache = cache(10, Duration::from_secs(60));
        let k = all_key("chat-1");

        let v = cache.get_or_compute(k.clone(), || async { "computed".to_string() }).await;
        assert_eq!(v, "computed");
        assert_eq!(cache.misses(), 1);

        // Second call is served from cache; the fallback must not run
        let v = cache
            .get_or_compute(k.clone(), || async { unreachable!("must hit cache") })
            .await;
        assert_eq!(v, "computed");
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_hit_rate() {
        let cache = cache(10, Duration::from_secs(60));
        let k = all_key("s");

        cache.insert(k.clone(), "v".into());
        cache.get(&k);
        cache.get(&all_key("missing"));

        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
