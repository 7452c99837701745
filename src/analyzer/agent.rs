//! Agent Status Analyzer
//!
//! The service's view of itself: uptime, workload counters, and a coarse
//! busyness classification derived from recent throughput.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::EventSink;
use crate::buffer::BufferedEvent;
use crate::error::Result;

// =============================================================================
// Status
// =============================================================================

/// Coarse workload classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Busyness {
    Idle,
    Steady,
    Busy,
}

impl std::fmt::Display for Busyness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Busyness::Idle => write!(f, "idle"),
            Busyness::Steady => write!(f, "steady"),
            Busyness::Busy => write!(f, "busy"),
        }
    }
}

/// Computed self-status
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub events_processed: u64,
    pub snapshots_served: u64,
    /// Mean events per minute over the whole uptime
    pub events_per_minute: f64,
    pub busyness: Busyness,
}

// =============================================================================
// Analyzer
// =============================================================================

/// Tracks the service's own workload.
pub struct AgentAnalyzer {
    started_at: DateTime<Utc>,
    events_processed: AtomicU64,
    snapshots_served: AtomicU64,
}

impl AgentAnalyzer {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            events_processed: AtomicU64::new(0),
            snapshots_served: AtomicU64::new(0),
        }
    }

    /// Record one served snapshot (cached or computed).
    pub fn record_snapshot_served(&self) {
        self.snapshots_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Current self-status.
    pub fn status(&self) -> AgentStatus {
        let uptime_secs = (Utc::now() - self.started_at).num_seconds().max(0) as u64;
        let events_processed = self.events_processed.load(Ordering::Relaxed);

        let events_per_minute = if uptime_secs == 0 {
            events_processed as f64
        } else {
            events_processed as f64 * 60.0 / uptime_secs as f64
        };

        let busyness = if events_per_minute >= 60.0 {
            Busyness::Busy
        } else if events_per_minute >= 5.0 {
            Busyness::Steady
        } else {
            Busyness::Idle
        };

        AgentStatus {
            started_at: self.started_at,
            uptime_secs,
            events_processed,
            snapshots_served: self.snapshots_served.load(Ordering::Relaxed),
            events_per_minute,
            busyness,
        }
    }
}

impl Default for AgentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for AgentAnalyzer {
    fn name(&self) -> &'static str {
        "agent"
    }

    fn apply(&self, _event: &BufferedEvent) -> Result<()> {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
