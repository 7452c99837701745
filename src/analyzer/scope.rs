//! Scope Context Analyzer
//!
//! Per-conversation accumulators: participation, pace, and recency for one
//! scope (a chat, channel, or session).

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::EventSink;
use crate::buffer::BufferedEvent;
use crate::error::{Error, Result};

/// Events kept per scope for pace calculations
const MAX_RECENT: usize = 200;

/// Window used for the events-per-minute pace
const PACE_WINDOW_SECS: i64 = 600;

// =============================================================================
// Context
// =============================================================================

/// Computed view of one conversation scope
#[derive(Debug, Clone, Serialize)]
pub struct ScopeContext {
    pub scope_id: String,
    /// Events seen over the scope's lifetime
    pub event_count: u64,
    /// Distinct subjects that have spoken
    pub participant_count: usize,
    /// Events per minute over the pace window
    pub events_per_minute: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

// =============================================================================
// Analyzer
// =============================================================================

#[derive(Debug, Default)]
struct ScopeRecord {
    participants: HashSet<String>,
    recent: VecDeque<DateTime<Utc>>,
    total_events: u64,
    last_activity: Option<DateTime<Utc>>,
}

/// Accumulates per-scope conversation statistics from flushed events.
pub struct ScopeAnalyzer {
    records: DashMap<String, ScopeRecord>,
}

impl ScopeAnalyzer {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Computed context for a scope, or `None` before its first event.
    pub fn context(&self, scope_id: &str) -> Option<ScopeContext> {
        let record = self.records.get(scope_id)?;
        let now = Utc::now();

        let in_window = record
            .recent
            .iter()
            .filter(|t| (now - **t).num_seconds() <= PACE_WINDOW_SECS)
            .count();
        let events_per_minute = in_window as f64 / (PACE_WINDOW_SECS as f64 / 60.0);

        Some(ScopeContext {
            scope_id: scope_id.to_string(),
            event_count: record.total_events,
            participant_count: record.participants.len(),
            events_per_minute,
            last_activity: record.last_activity,
        })
    }

    /// Scopes with at least one recorded event.
    pub fn known_scopes(&self) -> usize {
        self.records.len()
    }
}

impl Default for ScopeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ScopeAnalyzer {
    fn name(&self) -> &'static str {
        "scope"
    }

    fn apply(&self, event: &BufferedEvent) -> Result<()> {
        if event.scope_id.is_empty() {
            return Err(Error::Analyzer {
                analyzer: "scope".into(),
                reason: "event has no scope id".into(),
            });
        }

        let mut record = self.records.entry(event.scope_id.clone()).or_default();
        record.participants.insert(event.subject_id.clone());
        record.recent.push_back(event.timestamp);
        while record.recent.len() > MAX_RECENT {
            record.recent.pop_front();
        }
        record.total_events += 1;
        record.last_activity = Some(
            record
                .last_activity
                .map_or(event.timestamp, |prev| prev.max(event.timestamp)),
        );

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
