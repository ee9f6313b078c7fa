//! Numeric-only session telemetry.
//!
//! Events carry states, durations, scores and enum tags. They never carry
//! keypoint coordinates or imagery.

use parking_lot::RwLock;
use posecoach_core::{Side, Timestamp};
use serde::{Deserialize, Serialize};

use crate::arbitration::{CueTopic, Priority, SuppressionReason};
use crate::config::{ExerciseId, IssueKind};
use crate::fsm::FsmState;
use crate::speech::EnqueueOutcome;

/// Telemetry events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// An FSM instance changed state
    StateTransition {
        /// Tick time
        at: Timestamp,
        /// Exercise
        exercise: ExerciseId,
        /// Side, for unilateral exercises
        side: Option<Side>,
        /// Previous state
        from: FsmState,
        /// New state
        to: FsmState,
    },
    /// A coached issue was corrected
    IssueResolved {
        /// Tick time
        at: Timestamp,
        /// Exercise
        exercise: ExerciseId,
        /// Side, for unilateral exercises
        side: Option<Side>,
        /// Issue
        issue: IssueKind,
        /// First violating sample to resolution
        duration_ms: i64,
    },
    /// A cue was rendered and offered to speech
    CueEmitted {
        /// Tick time
        at: Timestamp,
        /// Exercise
        exercise: ExerciseId,
        /// Side, for unilateral exercises
        side: Option<Side>,
        /// Topic
        topic: CueTopic,
        /// Priority
        priority: Priority,
        /// Time spent obtaining the text
        latency_ms: u64,
        /// Canned text was used
        fallback: bool,
        /// What the speech queue did with it
        enqueue: Option<EnqueueOutcome>,
    },
    /// An event lost arbitration
    CueSuppressed {
        /// Tick time
        at: Timestamp,
        /// Exercise
        exercise: ExerciseId,
        /// Side, for unilateral exercises
        side: Option<Side>,
        /// Topic
        topic: CueTopic,
        /// Reason
        reason: SuppressionReason,
    },
    /// Critical visibility fell below the minimum
    VisibilityDrop {
        /// Tick time
        at: Timestamp,
        /// Critical visibility score
        score: f32,
    },
    /// Ticks skipped because inference overran
    TickSkipped {
        /// Time of the first tick after the gap
        at: Timestamp,
        /// Ticks skipped
        count: u64,
    },
}

impl TelemetryEvent {
    /// Session time of the event.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::StateTransition { at, .. }
            | Self::IssueResolved { at, .. }
            | Self::CueEmitted { at, .. }
            | Self::CueSuppressed { at, .. }
            | Self::VisibilityDrop { at, .. }
            | Self::TickSkipped { at, .. } => *at,
        }
    }

    /// Event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateTransition { .. } => "state_transition",
            Self::IssueResolved { .. } => "issue_resolved",
            Self::CueEmitted { .. } => "cue_emitted",
            Self::CueSuppressed { .. } => "cue_suppressed",
            Self::VisibilityDrop { .. } => "visibility_drop",
            Self::TickSkipped { .. } => "tick_skipped",
        }
    }
}

/// Receives telemetry. Recording must not block the tick.
pub trait TelemetrySink: Send + Sync {
    /// Record one event
    fn record(&self, event: TelemetryEvent);
}

/// Emits each event as a JSON `tracing` record.
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::debug!(target: "posecoach::telemetry", event = event.name(), %json),
            Err(e) => tracing::warn!(event = event.name(), error = %e, "Failed to encode telemetry"),
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    events: RwLock<Vec<TelemetryEvent>>,
}

impl InMemoryTelemetry {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// All events, oldest first
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.read().clone()
    }

    /// Events at or after `timestamp`
    pub fn since(&self, timestamp: Timestamp) -> Vec<TelemetryEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.timestamp() >= timestamp)
            .cloned()
            .collect()
    }

    /// Number of events with the given name
    pub fn count(&self, name: &str) -> usize {
        self.events.read().iter().filter(|e| e.name() == name).count()
    }
}

impl TelemetrySink for InMemoryTelemetry {
    fn record(&self, event: TelemetryEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryTelemetry::new();
        store.record(TelemetryEvent::VisibilityDrop {
            at: Timestamp::from_millis(100),
            score: 0.25,
        });
        store.record(TelemetryEvent::TickSkipped {
            at: Timestamp::from_millis(300),
            count: 1,
        });

        assert_eq!(store.events().len(), 2);
        assert_eq!(store.since(Timestamp::from_millis(200)).len(), 1);
        assert_eq!(store.count("visibility_drop"), 1);
    }

    #[test]
    fn test_events_serialize_numeric_only() {
        let event = TelemetryEvent::IssueResolved {
            at: Timestamp::from_millis(1200),
            exercise: ExerciseId::Plank,
            side: None,
            issue: IssueKind::HipSag,
            duration_ms: 850,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "issue_resolved");
        assert_eq!(json["at"], 1200);
        assert_eq!(json["issue"], "hip_sag");
        assert_eq!(json["duration_ms"], 850);
    }
}
