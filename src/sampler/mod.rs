//! Device Sampler
//!
//! Reading host utilization is slow relative to a cache lookup, so nothing
//! on a caller-facing path does it. One background task samples on an
//! interval and republishes the latest reading into a shared slot; any
//! number of foreground readers take the slot value without waiting on a
//! measurement. On a failed sample the loop logs, backs off to a longer
//! retry interval, and keeps going.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Sampler timing
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between successful samples
    pub interval: Duration,
    /// Longer wait after a failed sample
    pub retry_interval: Duration,
    /// How long `stop` waits for the loop to exit
    pub stop_timeout: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            retry_interval: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(3),
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("sampler interval must be > 0".into()));
        }
        if self.retry_interval < self.interval {
            return Err(Error::Config(
                "sampler retry interval must not be shorter than the sample interval".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Device health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceHealth {
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for DeviceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceHealth::Healthy => write!(f, "healthy"),
            DeviceHealth::Warning => write!(f, "warning"),
            DeviceHealth::Critical => write!(f, "critical"),
        }
    }
}

/// One published utilization reading
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub cpu_percent: f64,
    pub cpu_count: usize,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_percent: f64,
    pub load_avg_one: f64,
    pub sampled_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    /// Classify the reading against fixed pressure thresholds.
    pub fn status_level(&self) -> DeviceHealth {
        if self.cpu_percent > 90.0 || self.memory_percent > 90.0 {
            DeviceHealth::Critical
        } else if self.cpu_percent > 70.0 || self.memory_percent > 75.0 {
            DeviceHealth::Warning
        } else {
            DeviceHealth::Healthy
        }
    }
}

// =============================================================================
// Probes
// =============================================================================

/// The expensive measurement behind the sampler. Swappable so tests can
/// script successes and failures.
pub trait LoadProbe: Send + 'static {
    fn sample(&mut self) -> Result<DeviceSnapshot>;
}

/// Production probe backed by `sysinfo`.
///
/// The `System` handle must live across samples: CPU usage is a delta
/// between consecutive refreshes, so a throwaway handle would always read
/// zero.
pub struct SystemProbe {
    system: System,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the first real sample has a delta
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProbe for SystemProbe {
    fn sample(&mut self) -> Result<DeviceSnapshot> {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let memory_total = self.system.total_memory();
        let memory_used = self.system.used_memory();
        let memory_percent = if memory_total == 0 {
            0.0
        } else {
            memory_used as f64 / memory_total as f64 * 100.0
        };

        Ok(DeviceSnapshot {
            cpu_percent: f64::from(self.system.global_cpu_usage()),
            cpu_count: self.system.cpus().len(),
            memory_total,
            memory_used,
            memory_percent,
            load_avg_one: System::load_average().one,
            sampled_at: Utc::now(),
        })
    }
}

// =============================================================================
// Sampler
// =============================================================================

/// Periodic sampling loop publishing into a single shared slot.
pub struct DeviceSampler {
    slot: RwLock<Option<DeviceSnapshot>>,
    config: SamplerConfig,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSampler {
    pub fn new(config: SamplerConfig) -> Arc<Self> {
        Arc::new(Self {
            slot: RwLock::new(None),
            config,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Start the sampling loop on the given probe.
    ///
    /// The first sample runs immediately so the slot fills without waiting
    /// a full interval.
    pub fn spawn<P: LoadProbe>(self: &Arc<Self>, mut probe: P) {
        let sampler = Arc::clone(self);

        let handle = tokio::spawn(async move {
            info!(interval = ?sampler.config.interval, "device sampler started");

            loop {
                let wait = match probe.sample() {
                    Ok(snapshot) => {
                        *sampler.slot.write() = Some(snapshot);
                        sampler.config.interval
                    }
                    Err(e) => {
                        warn!(error = %e, "device sample failed, backing off");
                        sampler.config.retry_interval
                    }
                };

                tokio::select! {
                    _ = sampler.cancel.cancelled() => {
                        info!("device sampler stopping");
                        break;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        });

        *self.handle.lock() = Some(handle);
    }

    /// The most recent reading, without blocking on a measurement.
    /// `None` until the first successful sample.
    pub fn latest(&self) -> Option<DeviceSnapshot> {
        self.slot.read().clone()
    }

    /// Cancel the loop and join it within the configured timeout.
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            tokio::time::timeout(self.config.stop_timeout, handle)
                .await
                .map_err(|_| Error::ShutdownTimeout("device sampler".into()))?
                .map_err(|e| Error::Internal(format!("device sampler task failed: {e}")))?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
