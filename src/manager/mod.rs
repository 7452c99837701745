//! Perception Manager - Coordinator
//!
//! Wires the write buffer, the two caches, the analyzers, the sampler, and
//! the auto-tuner into one explicitly constructed service object.
//!
//! ```text
//! record_event ──▶ EventBuffer ──flush──▶ analyzers (fan-out)
//!                                   │
//!                                   └───▶ selective invalidation
//!                                         (tiered sub-results + snapshots)
//!
//! get_snapshot ──▶ SnapshotCache ──miss──▶ sampler slot + tiered
//!                                          sub-results + analyzers
//! ```
//!
//! Two periodic loops run beside the callers: the sampler, and a flush loop
//! that drains the buffer on an interval and runs a tuning pass every Nth
//! tick. Both stop cooperatively through `shutdown`.

mod snapshot;

pub use snapshot::Snapshot;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::analyzer::{
    AgentAnalyzer, EventSink, ScopeAnalyzer, ScopeContext, SubjectAnalyzer, SubjectProfile,
};
use crate::buffer::{BufferConfig, BufferedEvent, EventBuffer};
use crate::cache::{
    SnapshotCache, SnapshotCacheConfig, SnapshotKey, Tier, TieredCache, TieredCacheConfig,
};
use crate::error::{Error, Result};
use crate::sampler::{DeviceSampler, LoadProbe, SamplerConfig, SystemProbe};
use crate::stats::{ServiceStats, StatsSnapshot};
use crate::tuner::{AutoTuner, TunerConfig};

/// How long `shutdown` waits for the flush loop to exit
const FLUSH_LOOP_STOP_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Complete service configuration, applied once at construction
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub tiered: TieredCacheConfig,
    pub snapshot_cache: SnapshotCacheConfig,
    pub buffer: BufferConfig,
    pub tuner: TunerConfig,
    pub sampler: SamplerConfig,
}

impl ManagerConfig {
    /// Validate every section; construction refuses a bad configuration.
    pub fn validate(&self) -> Result<()> {
        self.tiered.validate()?;
        self.snapshot_cache.validate()?;
        self.buffer.validate()?;
        self.tuner.validate()?;
        self.sampler.validate()?;
        Ok(())
    }
}

// =============================================================================
// Sub-result keys
// =============================================================================

/// Identity of a cached per-entity sub-result in the tiered cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SubResultKey {
    Subject(String),
    Scope(String),
}

/// A cached per-entity sub-result.
#[derive(Debug, Clone)]
enum SubResult {
    Subject(SubjectProfile),
    Scope(ScopeContext),
}

// =============================================================================
// Manager
// =============================================================================

/// The service coordinator. Construct once, share by `Arc`, stop with
/// [`PerceptionManager::shutdown`].
pub struct PerceptionManager {
    config: ManagerConfig,
    buffer: Arc<EventBuffer>,
    snapshot_cache: Arc<SnapshotCache<Snapshot>>,
    sub_results: TieredCache<SubResultKey, SubResult>,
    subject_analyzer: Arc<SubjectAnalyzer>,
    scope_analyzer: Arc<ScopeAnalyzer>,
    agent_analyzer: Arc<AgentAnalyzer>,
    sinks: Vec<Arc<dyn EventSink>>,
    sampler: Arc<DeviceSampler>,
    stats: Arc<ServiceStats>,
    tuner: AutoTuner<Snapshot>,
    cancel: CancellationToken,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PerceptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerceptionManager")
            .field("config", &self.config)
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl PerceptionManager {
    /// Build the service from a validated configuration. Background loops
    /// are not running yet; call [`start`](Self::start).
    pub fn new(config: ManagerConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let buffer = Arc::new(EventBuffer::new(&config.buffer));
        let snapshot_cache = Arc::new(SnapshotCache::new(config.snapshot_cache.clone()));
        let stats = Arc::new(ServiceStats::new());

        let subject_analyzer = Arc::new(SubjectAnalyzer::new());
        let scope_analyzer = Arc::new(ScopeAnalyzer::new());
        let agent_analyzer = Arc::new(AgentAnalyzer::new());

        let sinks: Vec<Arc<dyn EventSink>> = vec![
            Arc::clone(&subject_analyzer) as Arc<dyn EventSink>,
            Arc::clone(&scope_analyzer) as Arc<dyn EventSink>,
            Arc::clone(&agent_analyzer) as Arc<dyn EventSink>,
        ];

        let tuner = AutoTuner::new(
            config.tuner.clone(),
            Arc::clone(&snapshot_cache),
            Arc::clone(&buffer),
            Arc::clone(&stats),
        );

        let manager = Arc::new(Self {
            sub_results: TieredCache::with_config(config.tiered.clone()),
            sampler: DeviceSampler::new(config.sampler.clone()),
            config,
            buffer,
            snapshot_cache,
            subject_analyzer,
            scope_analyzer,
            agent_analyzer,
            sinks,
            stats,
            tuner,
            cancel: CancellationToken::new(),
            flush_handle: Mutex::new(None),
        });

        info!("perception manager initialized");
        Ok(manager)
    }

    /// Start the background loops with the production system probe.
    pub fn start(self: &Arc<Self>) {
        self.start_with_probe(SystemProbe::new());
    }

    /// Start the background loops with a custom load probe.
    pub fn start_with_probe<P: LoadProbe>(self: &Arc<Self>, probe: P) {
        self.sampler.spawn(probe);

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(manager.config.buffer.flush_interval);
            let mut ticks_since_tune = 0u32;

            info!(
                interval = ?manager.config.buffer.flush_interval,
                "flush loop started"
            );

            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => {
                        info!("flush loop stopping");
                        break;
                    }
                    _ = tick.tick() => {
                        if !manager.buffer.is_empty() {
                            manager.flush_events();
                        }

                        ticks_since_tune += 1;
                        if ticks_since_tune >= manager.tuner.cadence_ticks() {
                            manager.tuner.tune_once();
                            ticks_since_tune = 0;
                        }
                    }
                }
            }
        });

        *self.flush_handle.lock() = Some(handle);
    }

    /// Stop the background loops, drain any buffered events, and join
    /// within bounded timeouts.
    pub async fn shutdown(&self) -> Result<()> {
        info!("perception manager shutting down");
        self.cancel.cancel();

        let handle = self.flush_handle.lock().take();
        if let Some(handle) = handle {
            tokio::time::timeout(FLUSH_LOOP_STOP_TIMEOUT, handle)
                .await
                .map_err(|_| Error::ShutdownTimeout("flush loop".into()))?
                .map_err(|e| Error::Internal(format!("flush loop task failed: {e}")))?;
        }

        // Accepted events must still reach the analyzers
        self.flush_events();

        self.sampler.stop().await?;
        info!("perception manager stopped");
        Ok(())
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Accept one conversation event.
    ///
    /// The event is buffered; when the buffer reaches its flush threshold
    /// the whole batch is applied synchronously before this call returns.
    #[instrument(skip(self, payload, label, timestamp))]
    pub fn record_event(
        &self,
        scope_id: &str,
        subject_id: &str,
        payload: &str,
        label: &str,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.stats.record_received();

        let dropped = self
            .buffer
            .push(BufferedEvent::new(scope_id, subject_id, payload, label, timestamp));
        if dropped {
            self.stats.record_dropped();
        }

        if self.buffer.should_flush() {
            self.flush_events();
        }
    }

    /// Drain the buffer and apply every event to every analyzer, oldest
    /// first.
    ///
    /// One event failing one analyzer is logged and skipped; the rest of the
    /// batch is unaffected. Each applied event invalidates the sub-result
    /// and snapshot cache entries its (scope, subject) pair could have made
    /// stale.
    pub fn flush_events(&self) {
        let batch = self.buffer.drain();
        if batch.is_empty() {
            return;
        }

        debug!(count = batch.len(), "flushing event batch");

        for event in &batch {
            for sink in &self.sinks {
                if let Err(e) = sink.apply(event) {
                    warn!(analyzer = sink.name(), error = %e, "analyzer rejected event");
                }
            }

            self.sub_results
                .delete(&SubResultKey::Subject(event.subject_id.clone()));
            self.sub_results
                .delete(&SubResultKey::Scope(event.scope_id.clone()));
            self.snapshot_cache
                .invalidate_subject(&event.scope_id, &event.subject_id);

            self.stats.record_processed(1);
        }

        self.stats.record_flush();
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Assemble (or serve from cache) the telemetry snapshot for a scope
    /// and an optional set of subjects. `None` subjects means the snapshot
    /// covers the scope as a whole.
    ///
    /// Degraded collaborators reduce completeness, never availability: a
    /// missing device reading or unknown subject is simply omitted.
    #[instrument(skip(self, subject_ids))]
    pub async fn get_snapshot(
        &self,
        scope_id: Option<&str>,
        subject_ids: Option<&[String]>,
        use_cache: bool,
    ) -> Snapshot {
        self.agent_analyzer.record_snapshot_served();

        if !use_cache {
            return self.compute_snapshot(scope_id, subject_ids);
        }

        let key = SnapshotKey::new(scope_id, subject_ids);
        self.snapshot_cache
            .get_or_compute(key, || async { self.compute_snapshot(scope_id, subject_ids) })
            .await
    }

    fn compute_snapshot(&self, scope_id: Option<&str>, subject_ids: Option<&[String]>) -> Snapshot {
        let device = self.sampler.latest();

        let context = scope_id.and_then(|scope| self.scope_context_cached(scope));

        let mut subjects = BTreeMap::new();
        if let Some(ids) = subject_ids {
            for id in ids {
                if let Some(profile) = self.subject_profile_cached(id) {
                    subjects.insert(id.clone(), profile);
                }
            }
        }

        Snapshot {
            device,
            context,
            subjects,
            agent: Some(self.agent_analyzer.status()),
            captured_at: Utc::now(),
        }
    }

    /// Per-subject profile through the tiered sub-result cache.
    fn subject_profile_cached(&self, subject_id: &str) -> Option<SubjectProfile> {
        let key = SubResultKey::Subject(subject_id.to_string());

        if let Some(SubResult::Subject(profile)) = self.sub_results.get(&key) {
            return Some(profile);
        }

        let profile = self.subject_analyzer.profile(subject_id)?;
        self.sub_results
            .set_in(key, SubResult::Subject(profile.clone()), Tier::Warm);
        Some(profile)
    }

    /// Per-scope context through the tiered sub-result cache.
    fn scope_context_cached(&self, scope_id: &str) -> Option<ScopeContext> {
        let key = SubResultKey::Scope(scope_id.to_string());

        if let Some(SubResult::Scope(context)) = self.sub_results.get(&key) {
            return Some(context);
        }

        let context = self.scope_analyzer.context(scope_id)?;
        self.sub_results
            .set_in(key, SubResult::Scope(context.clone()), Tier::Warm);
        Some(context)
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Current counters across the whole pipeline.
    pub fn get_stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.snapshot_cache.hits(),
            cache_misses: self.snapshot_cache.misses(),
            cache_hit_rate: self.snapshot_cache.hit_rate(),
            cache_size: self.snapshot_cache.len(),
            cache_max_size: self.snapshot_cache.max_entries(),
            cache_invalidations: self.snapshot_cache.invalidations(),
            buffer_size: self.buffer.len(),
            buffer_threshold: self.buffer.threshold(),
            batch_flush_count: self.stats.batch_flushes(),
            total_received: self.stats.received(),
            total_processed: self.stats.processed(),
            events_dropped: self.stats.dropped(),
            tiered: self.sub_results.stats(),
        }
    }

    /// Drop every cached snapshot and sub-result.
    pub fn clear_caches(&self) {
        self.snapshot_cache.clear();
        self.sub_results.clear(None);
        info!("caches cleared");
    }

    /// The sampler handle, for callers that want raw device readings.
    pub fn sampler(&self) -> &Arc<DeviceSampler> {
        &self.sampler
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ManagerConfig {
        ManagerConfig {
            buffer: BufferConfig {
                flush_threshold: 3,
                flush_interval: Duration::from_millis(50),
                max_len: 10,
            },
            ..ManagerConfig::default()
        }
    }

    fn manager() -> Arc<PerceptionManager> {
        PerceptionManager::new(test_config()).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.snapshot_cache.max_entries = 0;

        assert!(PerceptionManager::new(config).is_err());
    }

    #[test]
    fn test_events_buffer_until_threshold() {
        let manager = manager();

        manager.record_event("chat-1", "u1", "hello", "", None);
        manager.record_event("chat-1", "u2", "hi", "", None);

        let stats = manager.get_stats();
        assert_eq!(stats.buffer_size, 2);
        assert_eq!(stats.total_received, 2);
        assert_eq!(stats.total_processed, 0);
        assert!(manager.subject_analyzer.profile("u1").is_none());
    }

    #[test]
    fn test_threshold_flush_is_synchronous() {
        let manager = manager();

        for i in 0..3 {
            manager.record_event("chat-1", &format!("u{i}"), "hello", "", None);
        }

        let stats = manager.get_stats();
        assert_eq!(stats.buffer_size, 0);
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.batch_flush_count, 1);
        assert!(manager.subject_analyzer.profile("u0").is_some());
    }

    #[test]
    fn test_flush_applies_events_in_fifo_order() {
        let manager = manager();

        manager.record_event("chat-1", "u1", "first", "", None);
        manager.record_event("chat-1", "u1", "second", "", None);
        manager.flush_events();

        // The analyzer saw both events; the newest one defines last_seen
        let profile = manager.subject_analyzer.profile("u1").unwrap();
        assert_eq!(profile.events_24h, 2);
    }

    #[test]
    fn test_one_bad_event_does_not_abort_the_batch() {
        let manager = manager();

        // Empty subject id is rejected by the subject analyzer
        manager.record_event("chat-1", "", "bad", "", None);
        manager.record_event("chat-1", "u1", "good", "", None);
        manager.flush_events();

        let stats = manager.get_stats();
        // Both events count as processed; the failure was per-analyzer
        assert_eq!(stats.total_processed, 2);
        assert!(manager.subject_analyzer.profile("u1").is_some());
        // The scope analyzer accepted both events
        assert_eq!(manager.scope_analyzer.context("chat-1").unwrap().event_count, 2);
    }

    #[tokio::test]
    async fn test_snapshot_composition_and_degradation() {
        let manager = manager();

        manager.record_event("chat-1", "u1", "hello there", "Alice", None);
        manager.flush_events();

        let ids = vec!["u1".to_string(), "ghost".to_string()];
        let snapshot = manager.get_snapshot(Some("chat-1"), Some(&ids), true).await;

        // Sampler never started: the device sub-result is omitted
        assert!(snapshot.device.is_none());
        assert!(snapshot.agent.is_some());
        assert_eq!(snapshot.subjects.len(), 1);
        assert_eq!(snapshot.subjects["u1"].label, "Alice");
        assert_eq!(snapshot.context.unwrap().scope_id, "chat-1");
    }

    #[tokio::test]
    async fn test_snapshot_cache_hit() {
        let manager = manager();

        manager.record_event("chat-1", "u1", "hello", "", None);
        manager.flush_events();

        let first = manager.get_snapshot(Some("chat-1"), None, true).await;
        let second = manager.get_snapshot(Some("chat-1"), None, true).await;

        // Served from cache: same assembly timestamp
        assert_eq!(first.captured_at, second.captured_at);
        let stats = manager.get_stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn test_uncached_read_bypasses_cache() {
        let manager = manager();

        let first = manager.get_snapshot(Some("chat-1"), None, false).await;
        let second = manager.get_snapshot(Some("chat-1"), None, false).await;

        assert!(second.captured_at >= first.captured_at);
        assert_eq!(manager.get_stats().cache_size, 0);
    }

    #[tokio::test]
    async fn test_write_invalidates_only_affected_snapshots() {
        let manager = manager();

        let u1 = vec!["u1".to_string()];
        let u2 = vec!["u2".to_string()];

        manager.record_event("A", "u1", "seed", "", None);
        manager.record_event("A", "u2", "seed", "", None);
        manager.record_event("B", "u1", "seed", "", None);
        manager.flush_events();

        manager.get_snapshot(Some("A"), Some(&u1), true).await;
        manager.get_snapshot(Some("A"), Some(&u2), true).await;
        manager.get_snapshot(Some("B"), Some(&u1), true).await;
        assert_eq!(manager.get_stats().cache_size, 3);

        manager.record_event("A", "u1", "new message", "", None);
        manager.flush_events();

        // Only the (A, u1) snapshot was dropped
        assert_eq!(manager.get_stats().cache_size, 2);
        assert_eq!(manager.get_stats().cache_invalidations, 1);

        let refreshed = manager.get_snapshot(Some("A"), Some(&u1), true).await;
        assert_eq!(refreshed.subjects["u1"].events_24h, 2);
    }

    #[tokio::test]
    async fn test_sub_results_flow_through_tiered_cache() {
        let manager = manager();

        manager.record_event("chat-1", "u1", "hello", "", None);
        manager.flush_events();

        manager.get_snapshot(Some("chat-1"), None, false).await;
        let tiered = manager.get_stats().tiered;
        assert_eq!(tiered.warm_entries, 1);

        // Second uncached read serves the scope context from the warm tier
        manager.get_snapshot(Some("chat-1"), None, false).await;
        assert_eq!(manager.get_stats().tiered.warm_hits, 1);
    }

    #[tokio::test]
    async fn test_interval_flush_and_shutdown_drain() {
        let manager = manager();
        manager.start_with_probe(crate::sampler::SystemProbe::new());

        manager.record_event("chat-1", "u1", "below threshold", "", None);
        tokio::time::sleep(Duration::from_millis(120)).await;

        // The interval flush picked the event up without reaching the
        // threshold
        assert_eq!(manager.get_stats().total_processed, 1);

        manager.record_event("chat-1", "u2", "accepted late", "", None);
        manager.shutdown().await.unwrap();

        // Shutdown drained the buffer before stopping
        assert_eq!(manager.get_stats().total_processed, 2);
        assert_eq!(manager.get_stats().buffer_size, 0);
    }

    #[tokio::test]
    async fn test_clear_caches() {
        let manager = manager();

        manager.record_event("chat-1", "u1", "hello", "", None);
        manager.flush_events();
        manager.get_snapshot(Some("chat-1"), None, true).await;
        assert!(manager.get_stats().cache_size > 0);

        manager.clear_caches();
        let stats = manager.get_stats();
        assert_eq!(stats.cache_size, 0);
        assert_eq!(stats.tiered.total_entries, 0);
    }
}
