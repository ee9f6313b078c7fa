//! Periodic tick loop.
//!
//! Ticks are driven by a [`tokio::time::interval`] with
//! [`MissedTickBehavior::Skip`]: when pose inference for one tick overruns
//! the period, the ticks it covered are dropped and counted instead of
//! queued.

use std::time::Duration;

use posecoach_core::{PoseFrame, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::session::{CoachSession, FrameInput};

/// Pose source failures.
#[derive(Debug, Error)]
pub enum PoseSourceError {
    /// Inference failed for this frame
    #[error("Pose inference failed: {0}")]
    Inference(String),

    /// Capture is paused (permissions, camera lost, app backgrounded)
    #[error("Capture paused: {0}")]
    Paused(String),
}

/// Produces one pose frame per tick.
#[async_trait::async_trait]
pub trait PoseSource: Send {
    /// Source name
    fn name(&self) -> &str;

    /// Next frame; `Ok(None)` ends the stream
    async fn next_frame(&mut self) -> Result<Option<PoseFrame>, PoseSourceError>;
}

/// Loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    /// Ticks run through the session
    pub ticks: u64,
    /// Ticks dropped because inference overran
    pub skipped: u64,
    /// Ticks whose inference failed
    pub unavailable: u64,
    /// Ticks spent paused
    pub paused: u64,
}

/// Drives a session from a pose source at a fixed rate.
#[derive(Debug, Clone, Copy)]
pub struct TickLoop {
    period: Duration,
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(100)
    }
}

impl TickLoop {
    /// Loop with a tick period in milliseconds (100 ms is 10 Hz).
    pub fn new(tick_ms: u64) -> Self {
        Self {
            period: Duration::from_millis(tick_ms.max(1)),
        }
    }

    /// Tick period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run until the source ends or `shutdown` turns `true`.
    pub async fn run(
        &self,
        source: &mut dyn PoseSource,
        session: &mut CoachSession,
        mut shutdown: watch::Receiver<bool>,
    ) -> LoopStats {
        let tick_ms = self.period.as_millis() as u64;
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stats = LoopStats::default();
        let mut previous: Option<Instant> = None;

        tracing::info!(source = %source.name(), tick_ms, "Tick loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let scheduled = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                scheduled = interval.tick() => scheduled,
            };

            if let Some(prev) = previous {
                let gap = scheduled.duration_since(prev).as_millis() as u64;
                let skipped = (gap / tick_ms).saturating_sub(1);
                if skipped > 0 {
                    stats.skipped += skipped;
                    let at = session
                        .last_timestamp()
                        .map_or(Timestamp::ZERO, |t| t.add_millis(tick_ms));
                    session.record_skipped(skipped, at);
                }
            }
            previous = Some(scheduled);

            match source.next_frame().await {
                Ok(Some(frame)) => {
                    session.tick(FrameInput::Pose(frame)).await;
                    stats.ticks += 1;
                }
                Ok(None) => {
                    tracing::info!(source = %source.name(), "Pose source exhausted");
                    break;
                }
                Err(PoseSourceError::Paused(reason)) => {
                    stats.paused += 1;
                    tracing::debug!(reason = %reason, "Capture paused, skipping tick");
                }
                Err(e) => {
                    let timestamp = session
                        .last_timestamp()
                        .map_or(Timestamp::ZERO, |t| t.add_millis(tick_ms));
                    tracing::warn!(error = %e, "Treating frame as unavailable");
                    session.tick(FrameInput::Unavailable { timestamp }).await;
                    stats.unavailable += 1;
                    stats.ticks += 1;
                }
            }
        }

        tracing::info!(
            ticks = stats.ticks,
            skipped = stats.skipped,
            unavailable = stats.unavailable,
            "Tick loop stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::{CueRequest, CueSource, CueSourceError, TemplateCueSource};
    use crate::config::{catalog, ExerciseId};
    use crate::session::SessionConfig;
    use crate::speech::RecordingSpeechBackend;
    use crate::telemetry::InMemoryTelemetry;
    use std::collections::VecDeque;
    use std::sync::Arc;

    enum Step {
        Frame(i64),
        Slow(i64, u64),
        Fail,
        Pause,
    }

    struct ScriptedSource {
        steps: VecDeque<Step>,
    }

    #[async_trait::async_trait]
    impl PoseSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn next_frame(&mut self) -> Result<Option<PoseFrame>, PoseSourceError> {
            let frame =
                |ts| PoseFrame::empty(posecoach_core::FrameId(0), Timestamp::from_millis(ts));
            match self.steps.pop_front() {
                None => Ok(None),
                Some(Step::Frame(ts)) => Ok(Some(frame(ts))),
                Some(Step::Slow(ts, delay_ms)) => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    Ok(Some(frame(ts)))
                }
                Some(Step::Fail) => Err(PoseSourceError::Inference("model error".into())),
                Some(Step::Pause) => Err(PoseSourceError::Paused("camera".into())),
            }
        }
    }

    /// Cue source that never answers within the render budget.
    struct StalledCueSource;

    #[async_trait::async_trait]
    impl CueSource for StalledCueSource {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn cue_text(&self, _request: &CueRequest) -> Result<String, CueSourceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    fn session(telemetry: Arc<InMemoryTelemetry>) -> CoachSession {
        session_with(telemetry, Arc::new(TemplateCueSource::new()))
    }

    fn session_with(
        telemetry: Arc<InMemoryTelemetry>,
        source: Arc<dyn CueSource>,
    ) -> CoachSession {
        CoachSession::new(
            SessionConfig::default(),
            catalog::builtin(ExerciseId::Plank),
            source,
            Arc::new(RecordingSpeechBackend::new()),
            telemetry,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_source_ends() {
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let mut session = session(telemetry);
        let mut source = ScriptedSource {
            steps: VecDeque::from(vec![
                Step::Frame(0),
                Step::Frame(100),
                Step::Fail,
                Step::Pause,
                Step::Frame(400),
            ]),
        };
        let (_tx, rx) = watch::channel(false);

        let stats = TickLoop::new(100).run(&mut source, &mut session, rx).await;
        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.unavailable, 1);
        assert_eq!(stats.paused, 1);
        assert_eq!(stats.skipped, 0);
        assert_eq!(session.stats().unavailable, 1);
        assert_eq!(session.last_timestamp(), Some(Timestamp::from_millis(400)));
        session.end().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_skips_ticks() {
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let mut session = session(telemetry.clone());
        let mut source = ScriptedSource {
            steps: VecDeque::from(vec![
                Step::Frame(0),
                Step::Slow(100, 250),
                Step::Frame(400),
                Step::Frame(500),
            ]),
        };
        let (_tx, rx) = watch::channel(false);

        let stats = TickLoop::new(100).run(&mut source, &mut session, rx).await;
        assert_eq!(stats.ticks, 4);
        assert!(stats.skipped >= 1);
        assert_eq!(session.stats().skipped, stats.skipped);
        assert!(telemetry.count("tick_skipped") >= 1);
        session.end().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let mut session = session(telemetry);
        let mut source = ScriptedSource {
            steps: (0..1000).map(|i| Step::Frame(i * 100)).collect(),
        };
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(550)).await;
            let _ = tx.send(true);
        });

        let stats = TickLoop::new(100).run(&mut source, &mut session, rx).await;
        assert!(stats.ticks >= 5 && stats.ticks <= 7, "ticks = {}", stats.ticks);
        session.end().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cue_source_does_not_stall_ticks() {
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let mut session = session_with(telemetry.clone(), Arc::new(StalledCueSource));
        let mut source = ScriptedSource {
            steps: (0..20).map(|i| Step::Frame(i * 100)).collect(),
        };
        let (_tx, rx) = watch::channel(false);

        let stats = TickLoop::new(100).run(&mut source, &mut session, rx).await;
        assert_eq!(stats.ticks, 20);
        assert_eq!(stats.skipped, 0);

        // The reframe hint fell back to canned text once the budget ran out.
        assert!(!session.is_rendering());
        assert_eq!(session.stats().cues, 1);
        assert_eq!(session.stats().fallbacks, 1);
        assert_eq!(telemetry.count("cue_emitted"), 1);
        session.end().await;
    }
}
