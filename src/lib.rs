//! Perceptor - Telemetry Aggregation for Conversational Agents
//!
//! Ingests a continuous stream of per-conversation events and serves derived
//! snapshots under a latency budget, keeping expensive recomputation off the
//! hot path.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      PerceptionManager                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  writes: record_event ─▶ EventBuffer ─flush─▶ analyzers         │
//! │                                        └────▶ invalidation      │
//! │  reads:  get_snapshot ─▶ SnapshotCache ─miss─▶ TieredCache      │
//! │                                               + sampler slot    │
//! │  loops:  DeviceSampler   interval flush   AutoTuner             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is in-memory and process-lifetime only; a restart starts cold
//! by design.
//!
//! # Modules
//!
//! - [`analyzer`] - Per-entity accumulators fed by flushed events
//! - [`buffer`] - Write-buffering and batch coalescing
//! - [`cache`] - Tiered sub-result cache and snapshot cache
//! - [`error`] - Error types
//! - [`manager`] - The service coordinator
//! - [`sampler`] - Background device utilization sampling
//! - [`stats`] - Cumulative service counters
//! - [`tuner`] - Feedback-driven capacity/threshold tuning

pub mod analyzer;
pub mod buffer;
pub mod cache;
pub mod error;
pub mod manager;
pub mod sampler;
pub mod stats;
pub mod tuner;

// Re-export commonly used types
pub use buffer::{BufferConfig, BufferedEvent};
pub use cache::{SnapshotCacheConfig, SnapshotKey, Tier, TieredCacheConfig};
pub use error::{Error, Result};
pub use manager::{ManagerConfig, PerceptionManager, Snapshot};
pub use sampler::{DeviceSampler, DeviceSnapshot, SamplerConfig};
pub use stats::StatsSnapshot;
pub use tuner::TunerConfig;
