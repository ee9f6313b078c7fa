//! Coaching cue types.

use chrono::{DateTime, Utc};
use posecoach_core::{Side, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ExerciseId, IssueKind, Severity};
use crate::fsm::{CoachEvent, EventKind};

/// Unique identifier for a cue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CueId(Uuid);

impl CueId {
    /// Create a new random cue ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CueId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cue priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Critical form issue
    Critical = 1,
    /// Warning-level form issue
    High = 2,
    /// Reframe hint
    Medium = 3,
    /// Encouragement
    Low = 4,
}

impl Priority {
    /// Priority of the cue produced for an event
    pub fn from_event(kind: &EventKind) -> Self {
        match kind {
            EventKind::CoachIssue {
                severity: Severity::Critical,
                ..
            } => Priority::Critical,
            EventKind::CoachIssue { .. } => Priority::High,
            EventKind::WaitingHint(_) => Priority::Medium,
            EventKind::HoldGood => Priority::Low,
        }
    }

    /// Get numeric value (lower = higher priority)
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// `true` if `self` is at least as urgent as `other`
    pub fn at_least(&self, other: Priority) -> bool {
        self.value() <= other.value()
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "CRITICAL"),
            Priority::High => write!(f, "HIGH"),
            Priority::Medium => write!(f, "MEDIUM"),
            Priority::Low => write!(f, "LOW"),
        }
    }
}

/// What a cue is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueTopic {
    /// A form issue
    Issue(IssueKind),
    /// A reframe hint
    Reframe,
    /// Encouragement after good form
    HoldGood,
}

impl CueTopic {
    /// Topic of an event.
    pub fn of(kind: &EventKind) -> Self {
        match kind {
            EventKind::CoachIssue { issue, .. } => Self::Issue(*issue),
            EventKind::WaitingHint(_) => Self::Reframe,
            EventKind::HoldGood => Self::HoldGood,
        }
    }
}

impl std::fmt::Display for CueTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Issue(issue) => write!(f, "{issue}"),
            Self::Reframe => f.write_str("reframe"),
            Self::HoldGood => f.write_str("hold_good"),
        }
    }
}

/// Deduplication key: the same key must not be cued twice within its
/// cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CueKey {
    /// Exercise
    pub exercise: ExerciseId,
    /// Topic
    pub topic: CueTopic,
    /// Side for unilateral exercises
    pub side: Option<Side>,
}

impl CueKey {
    /// Key of an event.
    pub fn of(event: &CoachEvent) -> Self {
        Self {
            exercise: event.exercise,
            topic: CueTopic::of(&event.kind),
            side: event.side,
        }
    }
}

impl std::fmt::Display for CueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.exercise, self.topic)?;
        if let Some(side) = self.side {
            write!(f, ".{side}")?;
        }
        Ok(())
    }
}

/// A rendered cue ready for the speech queue and the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachingCue {
    /// Identifier
    pub id: CueId,
    /// Source event
    pub event: CoachEvent,
    /// Spoken and displayed text
    pub text: String,
    /// Speech priority
    pub priority: Priority,
    /// Speech category; one per dedup key
    pub category: String,
    /// Minimum re-speak interval for the category
    pub category_interval_ms: u64,
    /// Canned text was used because the cue source failed or timed out
    pub fallback: bool,
    /// Time spent obtaining the text
    pub latency_ms: u64,
    /// Tick timestamp the cue was issued at
    pub issued_at: Timestamp,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
}

impl CoachingCue {
    /// Dedup key of the source event.
    pub fn key(&self) -> CueKey {
        CueKey::of(&self.event)
    }
}
