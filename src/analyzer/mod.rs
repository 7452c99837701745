//! Downstream accumulators
//!
//! The analyzers turn flushed events into per-entity statistics the
//! snapshot path reads back out. They are deliberately simple frequency
//! counters; the interesting machinery (batching, caching, invalidation)
//! lives upstream of them.
//!
//! Every analyzer that consumes events implements [`EventSink`], the fan-out
//! seam the flush loop iterates over. A sink failure on one event is the
//! sink's problem alone: the flush logs it and moves on to the next event.

mod agent;
mod scope;
mod subject;

pub use agent::{AgentAnalyzer, AgentStatus, Busyness};
pub use scope::{ScopeAnalyzer, ScopeContext};
pub use subject::{ActivityLevel, SubjectAnalyzer, SubjectProfile};

use crate::buffer::BufferedEvent;
use crate::error::Result;

/// Consumer of flushed events.
pub trait EventSink: Send + Sync {
    /// Analyzer name used in degraded-mode log lines.
    fn name(&self) -> &'static str;

    /// Apply one event to this analyzer's accumulators.
    fn apply(&self, event: &BufferedEvent) -> Result<()>;
}
