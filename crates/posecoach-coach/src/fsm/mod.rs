//! Per-exercise stretch state machines.

mod arena;
pub mod hint;
mod machine;
mod state;

pub use arena::FsmArena;
pub use machine::StretchFsm;
pub use state::{
    ActiveIssue, Candidate, CoachEvent, EventKind, FsmKey, FsmState, FsmStateData,
    HintSuggestion, IssueResolution, ReframeHint, StepOutcome, Transition,
};
