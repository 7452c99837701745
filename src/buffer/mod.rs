//! Write Buffer
//!
//! Bounded FIFO staging area between `record_event` and the analyzers.
//! Incoming events accumulate here and reach the accumulators in batches:
//! either when the buffer crosses its flush threshold (synchronously, on the
//! writer's path) or when the coordinator's interval flush fires, whichever
//! comes first. Enqueue order is preserved through the drain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

// =============================================================================
// Events
// =============================================================================

/// One conversation event, held only until the next flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedEvent {
    /// Conversation the event belongs to
    pub scope_id: String,
    /// Subject (speaker) the event belongs to
    pub subject_id: String,
    /// Raw event payload
    pub payload: String,
    /// Display label for the subject
    #[serde(default)]
    pub label: String,
    /// Event time; defaults to arrival time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl BufferedEvent {
    pub fn new(
        scope_id: impl Into<String>,
        subject_id: impl Into<String>,
        payload: impl Into<String>,
        label: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            subject_id: subject_id.into(),
            payload: payload.into(),
            label: label.into(),
            timestamp: timestamp.unwrap_or_else(Utc::now),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Write buffer limits
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Queue length that triggers an immediate flush; the auto-tuner may
    /// move it afterwards
    pub flush_threshold: usize,
    /// Wall-clock bound on staleness: the interval flush fires this often
    pub flush_interval: std::time::Duration,
    /// Hard queue bound; the oldest event is dropped beyond this
    pub max_len: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 10,
            flush_interval: std::time::Duration::from_secs(2),
            max_len: 50,
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.flush_threshold == 0 {
            return Err(Error::Config("flush threshold must be > 0".into()));
        }
        if self.max_len < self.flush_threshold {
            return Err(Error::Config(format!(
                "buffer bound {} is below the flush threshold {}",
                self.max_len, self.flush_threshold
            )));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::Config("flush interval must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Event Buffer
// =============================================================================

/// Bounded FIFO queue of pending events.
///
/// The buffer itself is passive storage plus threshold arithmetic; the
/// coordinator decides when to drain and where the batch goes.
pub struct EventBuffer {
    queue: Mutex<VecDeque<BufferedEvent>>,
    threshold: AtomicUsize,
    max_len: usize,
}

impl EventBuffer {
    pub fn new(config: &BufferConfig) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(config.max_len)),
            threshold: AtomicUsize::new(config.flush_threshold),
            max_len: config.max_len,
        }
    }

    /// Append an event. Returns `true` when the oldest event had to be
    /// dropped to stay within the hard bound.
    pub fn push(&self, event: BufferedEvent) -> bool {
        let mut queue = self.queue.lock();
        let mut dropped = false;

        if queue.len() >= self.max_len {
            if let Some(lost) = queue.pop_front() {
                warn!(
                    scope = %lost.scope_id,
                    subject = %lost.subject_id,
                    "write buffer full, dropping oldest event"
                );
                dropped = true;
            }
        }

        queue.push_back(event);
        dropped
    }

    /// Take every pending event, oldest first.
    pub fn drain(&self) -> Vec<BufferedEvent> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Whether the queue has reached the flush threshold.
    pub fn should_flush(&self) -> bool {
        self.len() >= self.threshold()
    }

    /// Current flush threshold.
    pub fn threshold(&self) -> usize {
        self.threshold.load(Ordering::Relaxed)
    }

    /// Adjust the flush threshold (auto-tuner hook). Clamped to the hard
    /// bound so a flush can always still trigger.
    pub fn set_threshold(&self, threshold: usize) {
        self.threshold
            .store(threshold.clamp(1, self.max_len), Ordering::Relaxed);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> BufferedEvent {
        BufferedEvent::new("scope", format!("subject-{n}"), format!("payload {n}"), "", None)
    }

    #[test]
    fn test_config_validation() {
        assert!(BufferConfig::default().validate().is_ok());

        let bad = BufferConfig {
            flush_threshold: 0,
            ..BufferConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = BufferConfig {
            flush_threshold: 100,
            max_len: 50,
            ..BufferConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_push_and_drain_preserve_order() {
        let buffer = EventBuffer::new(&BufferConfig::default());

        for i in 0..5 {
            assert!(!buffer.push(event(i)));
        }
        assert_eq!(buffer.len(), 5);

        let drained = buffer.drain();
        assert!(buffer.is_empty());

        let subjects: Vec<_> = drained.iter().map(|e| e.subject_id.as_str()).collect();
        assert_eq!(
            subjects,
            ["subject-0", "subject-1", "subject-2", "subject-3", "subject-4"]
        );
    }

    #[test]
    fn test_threshold_trigger() {
        let config = BufferConfig {
            flush_threshold: 3,
            ..BufferConfig::default()
        };
        let buffer = EventBuffer::new(&config);

        buffer.push(event(0));
        buffer.push(event(1));
        assert!(!buffer.should_flush());

        buffer.push(event(2));
        assert!(buffer.should_flush());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let config = BufferConfig {
            flush_threshold: 2,
            max_len: 3,
            ..BufferConfig::default()
        };
        let buffer = EventBuffer::new(&config);

        assert!(!buffer.push(event(0)));
        assert!(!buffer.push(event(1)));
        assert!(!buffer.push(event(2)));
        assert!(buffer.push(event(3)));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].subject_id, "subject-1");
        assert_eq!(drained[2].subject_id, "subject-3");
    }

    #[test]
    fn test_set_threshold_clamps() {
        let config = BufferConfig {
            flush_threshold: 10,
            max_len: 50,
            ..BufferConfig::default()
        };
        let buffer = EventBuffer::new(&config);

        buffer.set_threshold(20);
        assert_eq!(buffer.threshold(), 20);

        buffer.set_threshold(0);
        assert_eq!(buffer.threshold(), 1);

        buffer.set_threshold(500);
        assert_eq!(buffer.threshold(), 50);
    }

    #[test]
    fn test_event_json_roundtrip() {
        let json = r#"{"scope_id":"chat-1","subject_id":"u1","payload":"hello"}"#;
        let event: BufferedEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.scope_id, "chat-1");
        assert_eq!(event.label, "");
        // Omitted timestamp defaults to arrival time
        assert!(event.timestamp <= Utc::now());
    }
}
