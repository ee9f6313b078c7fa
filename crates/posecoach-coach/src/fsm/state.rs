//! FSM states, per-instance data and emitted events.

use posecoach_core::{KeypointType, Side, Timestamp};
use serde::{Deserialize, Serialize};

use crate::config::{ExerciseId, IssueKind, Severity};

/// Coaching state of one (exercise, side) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FsmState {
    /// Required keypoints not visible; the only state that asks for a reframe
    Waiting,
    /// Visible, not yet stably held
    Ready,
    /// Stable good form
    Holding,
    /// A confirmed issue was just emitted
    CoachIssue,
    /// Re-coaching blocked until the cooldown elapses
    Cooldown,
}

impl FsmState {
    /// Upper-case name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Ready => "READY",
            Self::Holding => "HOLDING",
            Self::CoachIssue => "COACH_ISSUE",
            Self::Cooldown => "COOLDOWN",
        }
    }
}

impl std::fmt::Display for FsmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies one FSM instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FsmKey {
    /// Exercise
    pub exercise: ExerciseId,
    /// Body side for unilateral exercises
    pub side: Option<Side>,
}

impl std::fmt::Display for FsmKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.side {
            Some(side) => write!(f, "{}/{}", self.exercise, side),
            None => write!(f, "{}", self.exercise),
        }
    }
}

/// What the user should do to get back into frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintSuggestion {
    /// Nothing usable is visible
    StepIntoFrame,
    /// Lower body cut off
    StepBack,
    /// Upper body cut off
    ShowUpperBody,
    /// The far side is visible but the coached side is not
    TurnSideways,
    /// Keypoints are detected but with low confidence
    ImproveLighting,
}

impl HintSuggestion {
    /// Machine name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StepIntoFrame => "step_into_frame",
            Self::StepBack => "step_back",
            Self::ShowUpperBody => "show_upper_body",
            Self::TurnSideways => "turn_sideways",
            Self::ImproveLighting => "improve_lighting",
        }
    }
}

/// Reframe hint attached to `WAITING_HINT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReframeHint {
    /// Required keypoints below the visibility threshold
    pub missing: Vec<KeypointType>,
    /// Suggested correction
    pub suggestion: HintSuggestion,
}

/// Semantic event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Ask the user to reframe
    WaitingHint(ReframeHint),
    /// A confirmed form issue
    CoachIssue {
        /// Issue
        issue: IssueKind,
        /// Severity at confirmation
        severity: Severity,
        /// Rule priority, lower first
        priority: u8,
        /// Per-issue cue cooldown
        cue_cooldown_ms: u64,
    },
    /// Stable good form reached
    HoldGood,
}

/// Event emitted by an FSM tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachEvent {
    /// Exercise
    pub exercise: ExerciseId,
    /// Side, for unilateral exercises
    pub side: Option<Side>,
    /// Tick timestamp
    pub at: Timestamp,
    /// Payload
    pub kind: EventKind,
}

impl CoachEvent {
    /// Issue named by this event, if any.
    #[must_use]
    pub fn issue(&self) -> Option<IssueKind> {
        match &self.kind {
            EventKind::CoachIssue { issue, .. } => Some(*issue),
            _ => None,
        }
    }

    /// Severity, for issue events.
    #[must_use]
    pub fn severity(&self) -> Option<Severity> {
        match &self.kind {
            EventKind::CoachIssue { severity, .. } => Some(*severity),
            _ => None,
        }
    }

    /// Upper-case event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::WaitingHint(_) => "WAITING_HINT",
            EventKind::CoachIssue { .. } => "COACH_ISSUE",
            EventKind::HoldGood => "HOLD_GOOD",
        }
    }
}

/// A state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Previous state
    pub from: FsmState,
    /// New state
    pub to: FsmState,
    /// Tick timestamp
    pub at: Timestamp,
}

/// Resolution of a coached issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueResolution {
    /// Issue
    pub issue: IssueKind,
    /// From first violating sample to resolution
    pub duration_ms: i64,
}

/// Result of one FSM tick: at most one transition and one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// State change, if any
    pub transition: Option<Transition>,
    /// Emitted event, if any
    pub event: Option<CoachEvent>,
    /// Issue resolved this tick, if any
    pub resolved: Option<IssueResolution>,
}

/// An issue that has been coached and not yet resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveIssue {
    /// Issue
    pub issue: IssueKind,
    /// Severity when confirmed
    pub severity: Severity,
    /// First violating sample
    pub started_at: Timestamp,
    /// When it was emitted
    pub confirmed_at: Timestamp,
    /// When the value got back past the exit threshold
    pub resolved_at: Option<Timestamp>,
}

/// A violation waiting for confirmation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Issue
    pub issue: IssueKind,
    /// First violating sample
    pub since: Timestamp,
}

/// Mutable per-instance data, touched only by the FSM step.
#[derive(Debug, Clone, PartialEq)]
pub struct FsmStateData {
    /// Current state
    pub state: FsmState,
    /// State before the last transition
    pub previous: Option<FsmState>,
    /// When the current state was entered
    pub entered_at: Timestamp,
    /// Last transition
    pub last_transition_at: Option<Timestamp>,
    /// Last emitted event
    pub last_event_at: Option<Timestamp>,
    /// Last reframe hint
    pub last_hint_at: Option<Timestamp>,
    /// Violation awaiting confirmation
    pub candidate: Option<Candidate>,
    /// Coached issue
    pub active_issue: Option<ActiveIssue>,
    /// End of the current cooldown
    pub cooldown_until: Option<Timestamp>,
    /// End of the motion gate, including settle time
    pub motion_gate_until: Option<Timestamp>,
    /// Issues emitted without an intervening HOLD_GOOD
    pub consecutive_issues: u32,
    /// Issues emitted in total
    pub total_issues: u32,
}

impl FsmStateData {
    /// Fresh data in `WAITING`.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            state: FsmState::Waiting,
            previous: None,
            entered_at: now,
            last_transition_at: None,
            last_event_at: None,
            last_hint_at: None,
            candidate: None,
            active_issue: None,
            cooldown_until: None,
            motion_gate_until: None,
            consecutive_issues: 0,
            total_issues: 0,
        }
    }

    /// Move to `to`, returning the transition.
    pub(crate) fn transition(&mut self, to: FsmState, at: Timestamp) -> Transition {
        let from = self.state;
        self.previous = Some(from);
        self.state = to;
        self.entered_at = at;
        self.last_transition_at = Some(at);
        Transition { from, to, at }
    }

    /// Time spent in the current state.
    #[must_use]
    pub fn time_in_state(&self, now: Timestamp) -> i64 {
        now.millis_since(self.entered_at)
    }
}
