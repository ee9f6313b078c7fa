//! One coaching session: the per-tick pipeline from pose frame to cue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use posecoach_core::{PoseFrame, Timestamp};
use posecoach_signal::{
    FeatureEngine, FeatureEngineConfig, Features, MotionBuffer, MotionBufferConfig,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::arbitration::{
    status_text, Arbiter, ArbiterConfig, CoachingCue, CueSource, CueTopic, Selection,
    SuppressionReason,
};
use crate::config::{ConfigError, ExerciseId, StretchConfig};
use crate::fsm::{CoachEvent, FsmArena, FsmKey, FsmState};
use crate::speech::{EnqueueOutcome, SpeechBackend, SpeechItem, SpeechQueue, SpeechQueueConfig};
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::Result;

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline configuration shared by every exercise of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Feature engine
    pub engine: FeatureEngineConfig,
    /// Motion buffer
    pub buffer: MotionBufferConfig,
    /// Cue arbitration
    pub arbiter: ArbiterConfig,
    /// Speech queue
    pub speech: SpeechQueueConfig,
}

impl SessionConfig {
    /// Create a new configuration builder
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Validate every component configuration.
    ///
    /// # Errors
    ///
    /// Returns the first component validation error.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.buffer.validate()?;
        self.arbiter.validate()?;
        Ok(())
    }

    /// Check that `stretch` can be evaluated with this pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the exercise needs more
    /// history than the motion buffer keeps.
    pub fn check_exercise(&self, stretch: &StretchConfig) -> Result<()> {
        stretch.validate()?;
        if stretch.timing.stability_window_ms > self.buffer.window_ms {
            return Err(ConfigError::invalid_value(
                "stability_window_ms",
                format!(
                    "{}: {}ms exceeds the {}ms motion buffer window",
                    stretch.exercise, stretch.timing.stability_window_ms, self.buffer.window_ms
                ),
            )
            .into());
        }
        Ok(())
    }
}

/// Builder for SessionConfig
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the feature engine configuration
    pub fn engine(mut self, engine: FeatureEngineConfig) -> Self {
        self.config.engine = engine;
        self
    }

    /// Set the motion buffer configuration
    pub fn buffer(mut self, buffer: MotionBufferConfig) -> Self {
        self.config.buffer = buffer;
        self
    }

    /// Set the arbitration configuration
    pub fn arbiter(mut self, arbiter: ArbiterConfig) -> Self {
        self.config.arbiter = arbiter;
        self
    }

    /// Set the speech queue configuration
    pub fn speech(mut self, speech: SpeechQueueConfig) -> Self {
        self.config.speech = speech;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// Input for one tick.
#[derive(Debug, Clone)]
pub enum FrameInput {
    /// Successful inference
    Pose(PoseFrame),
    /// Inference failed or produced nothing
    Unavailable {
        /// Tick time
        timestamp: Timestamp,
    },
}

impl FrameInput {
    /// Tick time.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Pose(frame) => frame.timestamp,
            Self::Unavailable { timestamp } => *timestamp,
        }
    }
}

/// What one tick produced, for the UI collaborator.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Tick time
    pub timestamp: Timestamp,
    /// Features of this tick
    pub features: Features,
    /// State of every FSM instance
    pub states: Vec<(FsmKey, FsmState)>,
    /// Events emitted by the FSMs this tick
    pub events: Vec<CoachEvent>,
    /// Cue handed to speech this tick. A cue whose text had to be fetched
    /// is reported on the first tick after it is ready.
    pub cue: Option<CoachingCue>,
    /// What the speech queue did with the cue
    pub enqueue: Option<EnqueueOutcome>,
    /// Status line
    pub status: String,
    /// Frame was older than the previous one and was ignored
    pub stale: bool,
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Ticks processed
    pub ticks: u64,
    /// Ticks without a pose
    pub unavailable: u64,
    /// Ticks skipped by the tick loop
    pub skipped: u64,
    /// Out-of-order frames ignored
    pub stale: u64,
    /// Issues confirmed by the FSMs
    pub issues: u64,
    /// Issues resolved
    pub resolved: u64,
    /// Cues rendered
    pub cues: u64,
    /// Cues rendered from canned text
    pub fallbacks: u64,
    /// Events suppressed by arbitration
    pub suppressed: u64,
}

/// Returned by [`CoachSession::end`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session
    pub id: SessionId,
    /// Exercise at the end of the session
    pub exercise: ExerciseId,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end
    pub ended_at: DateTime<Utc>,
    /// Counters
    pub stats: SessionStats,
}

/// A rendered cue and what the speech queue did with it.
type Delivery = (CoachingCue, Option<EnqueueOutcome>);

/// Owns all mutable state of one user session.
pub struct CoachSession {
    id: SessionId,
    started_at: DateTime<Utc>,
    config: SessionConfig,
    engine: FeatureEngine,
    buffer: MotionBuffer,
    arena: FsmArena,
    arbiter: Arbiter,
    speech: Arc<SpeechQueue>,
    rendering: Option<JoinHandle<Delivery>>,
    telemetry: Arc<dyn TelemetrySink>,
    last_timestamp: Option<Timestamp>,
    had_visibility: bool,
    stats: SessionStats,
}

impl std::fmt::Debug for CoachSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoachSession")
            .field("id", &self.id)
            .field("exercise", &self.exercise())
            .field("states", &self.arena.states())
            .field("stats", &self.stats)
            .finish()
    }
}

impl CoachSession {
    /// Start a session. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if any configuration is invalid or the speech worker cannot be
    /// spawned.
    pub fn new(
        config: SessionConfig,
        stretch: StretchConfig,
        source: Arc<dyn CueSource>,
        backend: Arc<dyn SpeechBackend>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        config.validate()?;
        config.check_exercise(&stretch)?;

        let mut engine = FeatureEngine::new(config.engine.clone())?;
        engine.set_critical_points(stretch.required_both_sides(), stretch.min_visibility);
        let buffer = MotionBuffer::new(config.buffer.clone())?;
        let arbiter = Arbiter::new(config.arbiter.clone(), source);
        let speech = Arc::new(SpeechQueue::start(config.speech.clone(), backend)?);

        let id = SessionId::new();
        tracing::info!(session = %id, exercise = %stretch.exercise, "Coaching session started");

        Ok(Self {
            id,
            started_at: Utc::now(),
            arena: FsmArena::for_exercise(Arc::new(stretch), Timestamp::ZERO),
            config,
            engine,
            buffer,
            arbiter,
            speech,
            rendering: None,
            telemetry,
            last_timestamp: None,
            had_visibility: false,
            stats: SessionStats::default(),
        })
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current exercise.
    pub fn exercise(&self) -> ExerciseId {
        self.arena.config().exercise
    }

    /// Current exercise configuration.
    pub fn stretch_config(&self) -> &StretchConfig {
        self.arena.config()
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// FSM instances.
    pub fn arena(&self) -> &FsmArena {
        &self.arena
    }

    /// Motion history.
    pub fn buffer(&self) -> &MotionBuffer {
        &self.buffer
    }

    /// Speech queue.
    pub fn speech(&self) -> &SpeechQueue {
        &self.speech
    }

    /// Counters so far.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// `true` while a cue is being rendered off the tick path.
    pub fn is_rendering(&self) -> bool {
        self.rendering.is_some()
    }

    /// Timestamp of the newest processed tick.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last_timestamp
    }

    /// Run the whole pipeline for one tick.
    pub async fn tick(&mut self, input: FrameInput) -> TickReport {
        let timestamp = input.timestamp();
        if self.last_timestamp.is_some_and(|last| timestamp <= last) {
            tracing::debug!(session = %self.id, at = %timestamp, "Ignoring out-of-order frame");
            self.stats.stale += 1;
            return self.stale_report(timestamp);
        }
        self.last_timestamp = Some(timestamp);
        self.stats.ticks += 1;

        let features = match input {
            FrameInput::Pose(frame) => self.engine.compute(&frame),
            FrameInput::Unavailable { timestamp } => {
                self.stats.unavailable += 1;
                self.engine.compute_unavailable(timestamp)
            }
        };
        self.track_visibility(&features);
        self.buffer.push(features.clone());

        let mut events = Vec::new();
        for (key, outcome) in self.arena.step_all(&self.buffer, timestamp) {
            if let Some(t) = outcome.transition {
                tracing::info!(fsm = %key, from = %t.from, to = %t.to, "FSM transition");
                self.telemetry.record(TelemetryEvent::StateTransition {
                    at: t.at,
                    exercise: key.exercise,
                    side: key.side,
                    from: t.from,
                    to: t.to,
                });
            }
            if let Some(resolved) = outcome.resolved {
                self.stats.resolved += 1;
                self.telemetry.record(TelemetryEvent::IssueResolved {
                    at: timestamp,
                    exercise: key.exercise,
                    side: key.side,
                    issue: resolved.issue,
                    duration_ms: resolved.duration_ms,
                });
            }
            if let Some(event) = outcome.event {
                if event.issue().is_some() {
                    self.stats.issues += 1;
                }
                events.push(event);
            }
        }

        // One cue in flight at a time.
        let busy = self.rendering.is_some();
        let delivered = self.collect_render().await;
        let selection = if busy {
            Selection {
                chosen: None,
                suppressed: events
                    .iter()
                    .cloned()
                    .map(|e| (e, SuppressionReason::RateLimited))
                    .collect(),
            }
        } else {
            self.arbiter.select(events.clone(), timestamp)
        };
        for (event, reason) in &selection.suppressed {
            self.stats.suppressed += 1;
            self.telemetry.record(TelemetryEvent::CueSuppressed {
                at: timestamp,
                exercise: event.exercise,
                side: event.side,
                topic: CueTopic::of(&event.kind),
                reason: *reason,
            });
        }

        let (cue, enqueue) = match (selection.chosen, delivered) {
            (Some(event), _) => self.emit(event, timestamp),
            (None, Some((cue, enqueue))) => (Some(cue), enqueue),
            (None, None) => (None, None),
        };

        TickReport {
            timestamp,
            features,
            states: self.arena.states(),
            events,
            cue,
            enqueue,
            status: status_text(&self.arena),
            stale: false,
        }
    }

    /// Hand a chosen event to speech. Text the source has at hand is used
    /// right away; anything else is rendered on a separate task so the tick
    /// never waits on the cue source.
    fn emit(
        &mut self,
        event: CoachEvent,
        timestamp: Timestamp,
    ) -> (Option<CoachingCue>, Option<EnqueueOutcome>) {
        if let Some(cue) = self.arbiter.render_now(&event, timestamp) {
            let enqueue = enqueue_cue(&self.speech, &cue);
            self.record_cue(&cue, enqueue);
            return (Some(cue), enqueue);
        }

        tracing::debug!(
            session = %self.id,
            event = event.name(),
            "Rendering cue off the tick path"
        );
        let render = self.arbiter.render_task(event, timestamp);
        let speech = Arc::clone(&self.speech);
        self.rendering = Some(tokio::spawn(async move {
            let cue = render.await;
            let enqueue = enqueue_cue(&speech, &cue);
            (cue, enqueue)
        }));
        (None, None)
    }

    /// Pick up a finished background render, if any.
    async fn collect_render(&mut self) -> Option<Delivery> {
        if !self.rendering.as_ref().is_some_and(JoinHandle::is_finished) {
            return None;
        }
        let handle = self.rendering.take()?;
        match handle.await {
            Ok((cue, enqueue)) => {
                self.record_cue(&cue, enqueue);
                Some((cue, enqueue))
            }
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Cue render task failed");
                None
            }
        }
    }

    async fn cancel_render(&mut self) {
        if let Some(handle) = self.rendering.take() {
            handle.abort();
            // Wait so an aborted render cannot enqueue after the flush.
            let _ = handle.await;
        }
    }

    fn record_cue(&mut self, cue: &CoachingCue, enqueue: Option<EnqueueOutcome>) {
        self.stats.cues += 1;
        if cue.fallback {
            self.stats.fallbacks += 1;
        }

        tracing::info!(
            session = %self.id,
            cue = %cue.text,
            priority = %cue.priority,
            fallback = cue.fallback,
            latency_ms = cue.latency_ms,
            "Cue emitted"
        );
        self.telemetry.record(TelemetryEvent::CueEmitted {
            at: cue.issued_at,
            exercise: cue.event.exercise,
            side: cue.event.side,
            topic: cue.key().topic,
            priority: cue.priority,
            latency_ms: cue.latency_ms,
            fallback: cue.fallback,
            enqueue,
        });
    }

    fn track_visibility(&mut self, features: &Features) {
        let visible = features.visibility.has_minimum_visibility;
        if self.had_visibility && !visible {
            self.telemetry.record(TelemetryEvent::VisibilityDrop {
                at: features.timestamp,
                score: features.visibility.critical,
            });
        }
        self.had_visibility = visible;
    }

    fn stale_report(&self, timestamp: Timestamp) -> TickReport {
        TickReport {
            timestamp,
            features: self
                .buffer
                .latest()
                .cloned()
                .unwrap_or_else(|| Features::unavailable(timestamp)),
            states: self.arena.states(),
            events: Vec::new(),
            cue: None,
            enqueue: None,
            status: status_text(&self.arena),
            stale: true,
        }
    }

    /// Record ticks the loop had to skip.
    pub fn record_skipped(&mut self, count: u64, at: Timestamp) {
        self.stats.skipped += count;
        tracing::warn!(session = %self.id, count, "Ticks skipped, inference overran");
        self.telemetry.record(TelemetryEvent::TickSkipped { at, count });
    }

    /// Switch to another exercise, discarding all motion and FSM state.
    ///
    /// # Errors
    ///
    /// Fails if `stretch` is invalid; the session is unchanged in that case.
    pub async fn switch_exercise(&mut self, stretch: StretchConfig) -> Result<()> {
        self.config.check_exercise(&stretch)?;

        tracing::info!(
            session = %self.id,
            from = %self.exercise(),
            to = %stretch.exercise,
            "Switching exercise"
        );
        self.cancel_render().await;
        self.speech.flush().await;
        self.engine.reset();
        self.engine
            .set_critical_points(stretch.required_both_sides(), stretch.min_visibility);
        self.buffer.clear();
        self.arbiter.reset();
        self.arena = FsmArena::for_exercise(
            Arc::new(stretch),
            self.last_timestamp.unwrap_or(Timestamp::ZERO),
        );
        self.last_timestamp = None;
        self.had_visibility = false;
        Ok(())
    }

    /// End the session: cancel speech and stop its worker.
    pub async fn end(mut self) -> SessionSummary {
        self.cancel_render().await;
        self.speech.shutdown().await;
        let summary = SessionSummary {
            id: self.id,
            exercise: self.exercise(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            stats: self.stats,
        };
        tracing::info!(
            session = %self.id,
            ticks = summary.stats.ticks,
            cues = summary.stats.cues,
            "Coaching session ended"
        );
        summary
    }
}

fn enqueue_cue(speech: &SpeechQueue, cue: &CoachingCue) -> Option<EnqueueOutcome> {
    match speech.enqueue(SpeechItem::from_cue(cue)) {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::warn!(error = %e, "Could not queue cue for speech");
            None
        }
    }
}
