//! Subject Activity Analyzer
//!
//! Per-subject activity accumulators: event counts over sliding windows,
//! message-size statistics, and a coarse activity classification.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::EventSink;
use crate::buffer::BufferedEvent;
use crate::error::{Error, Result};

/// Per-subject history kept for windowed counts
const MAX_HISTORY: usize = 1000;

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

// =============================================================================
// Profile
// =============================================================================

/// Coarse activity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    VeryActive,
    Active,
    Normal,
    Inactive,
    Silent,
}

impl std::fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityLevel::VeryActive => write!(f, "very active"),
            ActivityLevel::Active => write!(f, "active"),
            ActivityLevel::Normal => write!(f, "normal"),
            ActivityLevel::Inactive => write!(f, "inactive"),
            ActivityLevel::Silent => write!(f, "silent"),
        }
    }
}

/// Computed view of one subject's recent behavior
#[derive(Debug, Clone, Serialize)]
pub struct SubjectProfile {
    pub subject_id: String,
    pub label: String,
    /// Events in the last hour
    pub events_1h: usize,
    /// Events in the last 24 hours
    pub events_24h: usize,
    pub last_seen: Option<DateTime<Utc>>,
    /// Mean gap between consecutive events in the 24h window, seconds
    pub avg_gap_secs: f64,
    pub avg_payload_len: f64,
    pub activity_level: ActivityLevel,
}

// =============================================================================
// Analyzer
// =============================================================================

#[derive(Debug, Default)]
struct SubjectRecord {
    label: String,
    history: VecDeque<DateTime<Utc>>,
    total_events: u64,
    total_chars: u64,
}

/// Accumulates per-subject activity from flushed events.
pub struct SubjectAnalyzer {
    records: DashMap<String, SubjectRecord>,
}

impl SubjectAnalyzer {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Computed profile for a subject, or `None` before its first event.
    pub fn profile(&self, subject_id: &str) -> Option<SubjectProfile> {
        let record = self.records.get(subject_id)?;
        let now = Utc::now();

        let events_1h = record
            .history
            .iter()
            .filter(|t| age_of(**t, now) <= HOUR)
            .count();

        let recent: Vec<DateTime<Utc>> = record
            .history
            .iter()
            .filter(|t| age_of(**t, now) <= DAY)
            .copied()
            .collect();
        let events_24h = recent.len();

        let last_seen = record.history.back().copied();

        let avg_gap_secs = if recent.len() > 1 {
            let span =
                (recent[recent.len() - 1] - recent[0]).num_milliseconds() as f64 / 1000.0;
            span / (recent.len() - 1) as f64
        } else {
            0.0
        };

        let avg_payload_len = if record.total_events > 0 {
            record.total_chars as f64 / record.total_events as f64
        } else {
            0.0
        };

        let activity_level = classify(events_1h, events_24h);

        Some(SubjectProfile {
            subject_id: subject_id.to_string(),
            label: record.label.clone(),
            events_1h,
            events_24h,
            last_seen,
            avg_gap_secs,
            avg_payload_len,
            activity_level,
        })
    }

    /// Subjects with at least one recorded event.
    pub fn known_subjects(&self) -> usize {
        self.records.len()
    }
}

impl Default for SubjectAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for SubjectAnalyzer {
    fn name(&self) -> &'static str {
        "subject"
    }

    fn apply(&self, event: &BufferedEvent) -> Result<()> {
        if event.subject_id.is_empty() {
            return Err(Error::Analyzer {
                analyzer: "subject".into(),
                reason: "event has no subject id".into(),
            });
        }

        let mut record = self.records.entry(event.subject_id.clone()).or_default();
        if !event.label.is_empty() {
            record.label = event.label.clone();
        }
        record.history.push_back(event.timestamp);
        while record.history.len() > MAX_HISTORY {
            record.history.pop_front();
        }
        record.total_events += 1;
        record.total_chars += event.payload.chars().count() as u64;

        Ok(())
    }
}

fn age_of(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - timestamp).to_std().unwrap_or(Duration::ZERO)
}

fn classify(events_1h: usize, events_24h: usize) -> ActivityLevel {
    if events_1h >= 30 {
        ActivityLevel::VeryActive
    } else if events_1h >= 10 {
        ActivityLevel::Active
    } else if events_1h >= 1 {
        ActivityLevel::Normal
    } else if events_24h >= 1 {
        ActivityLevel::Inactive
    } else {
        ActivityLevel::Silent
    }
}

// =============================================================================
// Tests
// =============================================================================
