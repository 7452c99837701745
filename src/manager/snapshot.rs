//! Snapshot Aggregate
//!
//! The assembled answer to a telemetry query. Every sub-result is explicit:
//! `None` means the component was not computed (not requested, or degraded
//! at read time), while an empty subject map means the lookup ran and found
//! nobody.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyzer::{AgentStatus, ScopeContext, SubjectProfile};
use crate::sampler::DeviceSnapshot;

/// Aggregated telemetry snapshot for one (scope, subjects) query
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Host utilization at the last background sample
    pub device: Option<DeviceSnapshot>,
    /// Conversation-scope statistics
    pub context: Option<ScopeContext>,
    /// Per-subject activity profiles, keyed by subject id
    pub subjects: BTreeMap<String, SubjectProfile>,
    /// The service's own status
    pub agent: Option<AgentStatus>,
    /// When this snapshot was assembled
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Human-readable digest, one line per populated sub-result.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if let Some(device) = &self.device {
            parts.push(format!(
                "[device] {}: cpu {:.1}%, memory {:.1}%",
                device.status_level(),
                device.cpu_percent,
                device.memory_percent,
            ));
        }

        if let Some(context) = &self.context {
            parts.push(format!(
                "[scope {}] {} events, {} participants, {:.1}/min",
                context.scope_id,
                context.event_count,
                context.participant_count,
                context.events_per_minute,
            ));
        }

        for (id, profile) in &self.subjects {
            let name = if profile.label.is_empty() {
                id.as_str()
            } else {
                profile.label.as_str()
            };
            parts.push(format!(
                "[subject {}] {}, {} events in the last hour",
                name, profile.activity_level, profile.events_1h,
            ));
        }

        if let Some(agent) = &self.agent {
            parts.push(format!(
                "[agent] {}, {} events processed, up {}s",
                agent.busyness, agent.events_processed, agent.uptime_secs,
            ));
        }

        if parts.is_empty() {
            "no telemetry available".to_string()
        } else {
            parts.join("\n")
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Busyness;

    #[test]
    fn test_empty_snapshot_summary() {
        let snapshot = Snapshot {
            device: None,
            context: None,
            subjects: BTreeMap::new(),
            agent: None,
            captured_at: Utc::now(),
        };

        assert_eq!(snapshot.summary(), "no telemetry available");
    }

    #[test]
    fn test_summary_lists_populated_parts() {
        let snapshot = Snapshot {
            device: None,
            context: Some(ScopeContext {
                scope_id: "chat-1".into(),
                event_count: 12,
                participant_count: 3,
                events_per_minute: 1.5,
                last_activity: Some(Utc::now()),
            }),
            subjects: BTreeMap::new(),
            agent: Some(AgentStatus {
                started_at: Utc::now(),
                uptime_secs: 60,
                events_processed: 12,
                snapshots_served: 1,
                events_per_minute: 12.0,
                busyness: Busyness::Steady,
            }),
            captured_at: Utc::now(),
        };

        let summary = snapshot.summary();
        assert!(summary.contains("[scope chat-1] 12 events"));
        assert!(summary.contains("[agent] steady"));
        assert!(!summary.contains("[device]"));
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = Snapshot {
            device: None,
            context: None,
            subjects: BTreeMap::new(),
            agent: None,
            captured_at: Utc::now(),
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"device\":null"));
        assert!(json.contains("\"subjects\":{}"));
    }
}
