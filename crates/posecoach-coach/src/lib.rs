//! # PoseCoach Coach
//!
//! Decision core of the real-time stretch coach: turns per-tick
//! [`Features`](posecoach_signal::Features) into coaching cues.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │ Feature  │──▶│  Motion  │──▶│ Stretch   │──▶│ Arbiter   │──▶│  Speech  │
//! │ Engine   │   │  Buffer  │   │ FSM arena │   │ + cue src │   │  Queue   │
//! └──────────┘   └──────────┘   └───────────┘   └───────────┘   └──────────┘
//!      posecoach-signal              one per (exercise, side)     worker task
//! ```
//!
//! Everything left of the speech queue runs synchronously inside one tick
//! of a [`CoachSession`]; speech playback happens on a separate task and is
//! never awaited by the tick.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use posecoach_coach::{
//!     catalog, CoachSession, ExerciseId, FrameInput, InMemoryTelemetry, SessionConfig,
//!     TemplateCueSource, TracingSpeechBackend,
//! };
//! use posecoach_core::Timestamp;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut session = CoachSession::new(
//!         SessionConfig::default(),
//!         catalog::builtin(ExerciseId::Plank),
//!         Arc::new(TemplateCueSource::new()),
//!         Arc::new(TracingSpeechBackend),
//!         Arc::new(InMemoryTelemetry::new()),
//!     )?;
//!
//!     let report = session
//!         .tick(FrameInput::Unavailable { timestamp: Timestamp::ZERO })
//!         .await;
//!     println!("{}", report.status);
//!
//!     session.end().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod arbitration;
pub mod config;
pub mod fsm;
pub mod runtime;
pub mod session;
pub mod speech;
pub mod telemetry;

pub use arbitration::{
    status_text, Arbiter, ArbiterConfig, ArbiterConfigBuilder, CoachingCue, CueId, CueKey,
    CueRequest, CueSource, CueSourceError, CueTextGenerator, CueTopic, Priority, RemoteCueSource,
    Selection, SuppressionReason, TemplateCueSource,
};
pub use config::{
    catalog, Band, ConfigError, Direction, ExerciseId, IssueKind, IssueRule, Metric, Severity,
    StretchConfig, StretchTiming,
};
pub use fsm::{
    CoachEvent, EventKind, FsmArena, FsmKey, FsmState, FsmStateData, HintSuggestion,
    IssueResolution, ReframeHint, StepOutcome, StretchFsm, Transition,
};
pub use runtime::{LoopStats, PoseSource, PoseSourceError, TickLoop};
pub use session::{
    CoachSession, FrameInput, SessionConfig, SessionConfigBuilder, SessionId, SessionStats,
    SessionSummary, TickReport,
};
pub use speech::{
    EnqueueOutcome, RecordingSpeechBackend, SpeechBackend, SpeechError, SpeechItem,
    SpeechOutcome, SpeechQueue, SpeechQueueConfig, TracingSpeechBackend,
};
pub use telemetry::{InMemoryTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common result type for coaching operations
pub type Result<T> = std::result::Result<T, CoachError>;

/// Unified error type for coaching operations
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Feature engine or motion buffer error
    #[error("Signal processing error: {0}")]
    Signal(#[from] posecoach_signal::SignalError),

    /// Cue source error
    #[error("Cue source error: {0}")]
    CueSource(#[from] CueSourceError),

    /// Speech error
    #[error("Speech error: {0}")]
    Speech(#[from] SpeechError),

    /// Session lifecycle error
    #[error("Session error: {0}")]
    Session(String),
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        catalog, CoachError, CoachSession, CoachingCue, CueSource, ExerciseId, FrameInput,
        FsmState, IssueKind, PoseSource, Result, SessionConfig, SpeechBackend, StretchConfig,
        TelemetrySink, TickLoop, TickReport,
    };
}
