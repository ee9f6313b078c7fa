//! Event/cue arbitration.
//!
//! Every tick the FSM arena may emit several events (one per side). The
//! [`Arbiter`] picks at most one of them, enforcing per-key cooldowns and a
//! global minimum interval between cues, and renders the winner into a
//! [`CoachingCue`] within a fixed time budget.

mod cue;
mod source;
pub mod templates;

pub use cue::{CoachingCue, CueId, CueKey, CueTopic, Priority};
pub use source::{
    CueRequest, CueSource, CueSourceError, CueTextGenerator, RemoteCueSource, TemplateCueSource,
    TemplateKey,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use posecoach_core::{Side, Timestamp};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, Severity};
use crate::fsm::{CoachEvent, EventKind, FsmArena, FsmState};

/// Arbitration tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Minimum time between any two cues
    pub min_cue_interval_ms: u64,
    /// Longest the cue source may take before canned text is used
    pub render_budget_ms: u64,
    /// Cooldown between reframe hints of the same exercise and side
    pub hint_cooldown_ms: u64,
    /// Cooldown between encouragement cues
    pub hold_cooldown_ms: u64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            min_cue_interval_ms: 3000,
            render_budget_ms: 700,
            hint_cooldown_ms: 5000,
            hold_cooldown_ms: 10_000,
        }
    }
}

impl ArbiterConfig {
    /// Create a builder for custom configuration
    pub fn builder() -> ArbiterConfigBuilder {
        ArbiterConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the render budget is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render_budget_ms == 0 {
            return Err(ConfigError::invalid_value(
                "render_budget_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Builder for [`ArbiterConfig`]
#[derive(Debug, Default)]
pub struct ArbiterConfigBuilder {
    config: ArbiterConfig,
}

impl ArbiterConfigBuilder {
    /// Set the global minimum inter-cue interval
    #[must_use]
    pub fn min_cue_interval_ms(mut self, ms: u64) -> Self {
        self.config.min_cue_interval_ms = ms;
        self
    }

    /// Set the cue source time budget
    #[must_use]
    pub fn render_budget_ms(mut self, ms: u64) -> Self {
        self.config.render_budget_ms = ms;
        self
    }

    /// Set the reframe hint cooldown
    #[must_use]
    pub fn hint_cooldown_ms(mut self, ms: u64) -> Self {
        self.config.hint_cooldown_ms = ms;
        self
    }

    /// Set the encouragement cooldown
    #[must_use]
    pub fn hold_cooldown_ms(mut self, ms: u64) -> Self {
        self.config.hold_cooldown_ms = ms;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ArbiterConfig {
        self.config
    }
}

/// Why an event did not become a cue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// Same key cued within its cooldown
    Duplicate,
    /// Global minimum interval not yet elapsed
    RateLimited,
    /// Another event this tick ranked higher
    Outranked,
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate => f.write_str("duplicate"),
            Self::RateLimited => f.write_str("rate_limited"),
            Self::Outranked => f.write_str("outranked"),
        }
    }
}

/// Result of arbitrating one tick's events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Event to render, if any
    pub chosen: Option<CoachEvent>,
    /// Everything else, with the reason
    pub suppressed: Vec<(CoachEvent, SuppressionReason)>,
}

/// Picks and renders cues.
pub struct Arbiter {
    config: ArbiterConfig,
    source: Arc<dyn CueSource>,
    last_cued: HashMap<CueKey, Timestamp>,
    last_cue_at: Option<Timestamp>,
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter")
            .field("config", &self.config)
            .field("source", &self.source.name())
            .field("last_cue_at", &self.last_cue_at)
            .finish()
    }
}

impl Arbiter {
    /// Create an arbiter over a cue source.
    pub fn new(config: ArbiterConfig, source: Arc<dyn CueSource>) -> Self {
        Self {
            config,
            source,
            last_cued: HashMap::new(),
            last_cue_at: None,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Forget all cooldowns.
    pub fn reset(&mut self) {
        self.last_cued.clear();
        self.last_cue_at = None;
    }

    /// Choose at most one of `events` to cue at `now`.
    pub fn select(&mut self, mut events: Vec<CoachEvent>, now: Timestamp) -> Selection {
        events.sort_by_key(rank);

        let mut selection = Selection::default();
        let rate_limited = self.last_cue_at.is_some_and(|at| {
            now.millis_since(at) < self.config.min_cue_interval_ms as i64
        });

        for event in events {
            let key = CueKey::of(&event);
            let cooldown = self.cooldown_ms(&event.kind) as i64;
            let duplicate = self
                .last_cued
                .get(&key)
                .is_some_and(|at| now.millis_since(*at) < cooldown);

            let reason = if duplicate {
                SuppressionReason::Duplicate
            } else if rate_limited {
                SuppressionReason::RateLimited
            } else if selection.chosen.is_some() {
                SuppressionReason::Outranked
            } else {
                self.last_cued.insert(key, now);
                self.last_cue_at = Some(now);
                selection.chosen = Some(event);
                continue;
            };

            tracing::debug!(event = event.name(), key = %key, reason = %reason, "Cue suppressed");
            selection.suppressed.push((event, reason));
        }

        selection
    }

    /// Render an event into a cue, falling back to canned text if the cue
    /// source fails or exceeds the render budget.
    pub async fn render(&self, event: CoachEvent, now: Timestamp) -> CoachingCue {
        match self.render_now(&event, now) {
            Some(cue) => cue,
            None => self.render_task(event, now).await,
        }
    }

    /// Render without waiting, if the source has text at hand (templates or
    /// a cached answer).
    pub fn render_now(&self, event: &CoachEvent, now: Timestamp) -> Option<CoachingCue> {
        let request = CueRequest::from_event(event);
        let text = self
            .source
            .ready_text(&request)
            .filter(|text| !text.trim().is_empty())?;
        Some(build_cue(
            event.clone(),
            text,
            false,
            0,
            self.cooldown_ms(&event.kind),
            now,
        ))
    }

    /// Owned rendering future for running off the tick path. Completes within
    /// the render budget.
    pub fn render_task(
        &self,
        event: CoachEvent,
        now: Timestamp,
    ) -> impl std::future::Future<Output = CoachingCue> + Send + 'static {
        let source = Arc::clone(&self.source);
        let budget_ms = self.config.render_budget_ms;
        let interval_ms = self.cooldown_ms(&event.kind);

        async move {
            let request = CueRequest::from_event(&event);
            let started = tokio::time::Instant::now();

            let result =
                tokio::time::timeout(Duration::from_millis(budget_ms), source.cue_text(&request))
                    .await
                    .unwrap_or(Err(CueSourceError::Timeout(budget_ms)));

            let (text, fallback) = match result {
                Ok(text) if !text.trim().is_empty() => (text, false),
                Ok(_) => (templates::canned(&request), true),
                Err(e) => {
                    tracing::warn!(
                        source = %source.name(),
                        error = %e,
                        "Cue source failed, using canned text"
                    );
                    (templates::canned(&request), true)
                }
            };

            let latency_ms = started.elapsed().as_millis() as u64;
            build_cue(event, text, fallback, latency_ms, interval_ms, now)
        }
    }

    fn cooldown_ms(&self, kind: &EventKind) -> u64 {
        match kind {
            EventKind::CoachIssue {
                cue_cooldown_ms, ..
            } => *cue_cooldown_ms,
            EventKind::WaitingHint(_) => self.config.hint_cooldown_ms,
            EventKind::HoldGood => self.config.hold_cooldown_ms,
        }
    }
}

fn build_cue(
    event: CoachEvent,
    text: String,
    fallback: bool,
    latency_ms: u64,
    category_interval_ms: u64,
    now: Timestamp,
) -> CoachingCue {
    let key = CueKey::of(&event);
    CoachingCue {
        id: CueId::new(),
        priority: Priority::from_event(&event.kind),
        category: key.to_string(),
        category_interval_ms,
        fallback,
        latency_ms,
        issued_at: now,
        created_at: Utc::now(),
        text,
        event,
    }
}

/// Ordering key: critical issue, warning issue, hint, hold; then rule
/// priority; then left before right.
fn rank(event: &CoachEvent) -> (u8, u8, u8) {
    let (class, priority) = match &event.kind {
        EventKind::CoachIssue {
            severity: Severity::Critical,
            priority,
            ..
        } => (0, *priority),
        EventKind::CoachIssue { priority, .. } => (1, *priority),
        EventKind::WaitingHint(_) => (2, 0),
        EventKind::HoldGood => (3, 0),
    };
    let side = match event.side {
        Some(Side::Right) => 1,
        _ => 0,
    };
    (class, priority, side)
}

/// Short status line for the UI.
pub fn status_text(arena: &FsmArena) -> String {
    let adjusting = arena.iter().find_map(|fsm| {
        let data = fsm.data();
        match data.state {
            FsmState::CoachIssue | FsmState::Cooldown => data
                .active_issue
                .filter(|a| a.resolved_at.is_none())
                .map(|a| a.issue),
            _ => None,
        }
    });
    if let Some(issue) = adjusting {
        return format!("Adjust: {}", issue.correction());
    }

    let states: Vec<FsmState> = arena.iter().map(|f| f.state()).collect();
    if states
        .iter()
        .any(|s| matches!(s, FsmState::Holding | FsmState::CoachIssue | FsmState::Cooldown))
    {
        "Hold".to_string()
    } else if states.contains(&FsmState::Ready) {
        "Hold steady…".to_string()
    } else {
        "Getting into position…".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{catalog, ExerciseId, IssueKind};
    use crate::fsm::{HintSuggestion, ReframeHint};

    fn issue(side: Option<Side>, issue: IssueKind, severity: Severity, priority: u8) -> CoachEvent {
        CoachEvent {
            exercise: ExerciseId::Plank,
            side,
            at: Timestamp::ZERO,
            kind: EventKind::CoachIssue {
                issue,
                severity,
                priority,
                cue_cooldown_ms: 6000,
            },
        }
    }

    fn hint() -> CoachEvent {
        CoachEvent {
            exercise: ExerciseId::Plank,
            side: None,
            at: Timestamp::ZERO,
            kind: EventKind::WaitingHint(ReframeHint {
                missing: vec![],
                suggestion: HintSuggestion::StepBack,
            }),
        }
    }

    fn arbiter() -> Arbiter {
        Arbiter::new(ArbiterConfig::default(), Arc::new(TemplateCueSource::new()))
    }

    struct SlowSource;

    #[async_trait::async_trait]
    impl CueSource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn cue_text(&self, _request: &CueRequest) -> Result<String, CueSourceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".into())
        }
    }

    struct FailingSource;

    #[async_trait::async_trait]
    impl CueSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn cue_text(&self, _request: &CueRequest) -> Result<String, CueSourceError> {
            Err(CueSourceError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn test_critical_outranks_warning_and_hint() {
        let mut arb = arbiter();
        let selection = arb.select(
            vec![
                hint(),
                issue(None, IssueKind::NeckDrop, Severity::Warning, 2),
                issue(None, IssueKind::HipPike, Severity::Critical, 1),
            ],
            Timestamp::from_millis(1000),
        );
        assert_eq!(selection.chosen.unwrap().issue(), Some(IssueKind::HipPike));
        assert_eq!(selection.suppressed.len(), 2);
        assert!(selection
            .suppressed
            .iter()
            .all(|(_, r)| *r == SuppressionReason::Outranked));
    }

    #[test]
    fn test_left_before_right_on_tie() {
        let mut arb = arbiter();
        let selection = arb.select(
            vec![
                issue(Some(Side::Right), IssueKind::HipDrop, Severity::Warning, 0),
                issue(Some(Side::Left), IssueKind::HipDrop, Severity::Warning, 0),
            ],
            Timestamp::from_millis(1000),
        );
        assert_eq!(selection.chosen.unwrap().side, Some(Side::Left));
    }

    #[test]
    fn test_duplicate_within_issue_cooldown() {
        let mut arb = arbiter();
        let sag = || issue(None, IssueKind::HipSag, Severity::Warning, 0);
        assert!(arb.select(vec![sag()], Timestamp::from_millis(0)).chosen.is_some());

        let again = arb.select(vec![sag()], Timestamp::from_millis(4000));
        assert_eq!(again.suppressed[0].1, SuppressionReason::Duplicate);

        let later = arb.select(vec![sag()], Timestamp::from_millis(6000));
        assert!(later.chosen.is_some());
    }

    #[test]
    fn test_global_rate_limit_across_issues() {
        let mut arb = arbiter();
        arb.select(
            vec![issue(None, IssueKind::HipSag, Severity::Warning, 0)],
            Timestamp::from_millis(0),
        );
        let neck = arb.select(
            vec![issue(None, IssueKind::NeckDrop, Severity::Warning, 2)],
            Timestamp::from_millis(1500),
        );
        assert_eq!(neck.suppressed[0].1, SuppressionReason::RateLimited);

        let neck = arb.select(
            vec![issue(None, IssueKind::NeckDrop, Severity::Warning, 2)],
            Timestamp::from_millis(3000),
        );
        assert!(neck.chosen.is_some());
    }

    #[tokio::test]
    async fn test_render_uses_source_text() {
        let arb = arbiter();
        let cue = arb
            .render(
                issue(None, IssueKind::HipSag, Severity::Critical, 0),
                Timestamp::from_millis(10),
            )
            .await;
        assert!(!cue.fallback);
        assert_eq!(cue.priority, Priority::Critical);
        assert_eq!(cue.category, "plank.hip_sag");
        assert_eq!(cue.category_interval_ms, 6000);
        assert_eq!(cue.issued_at, Timestamp::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_falls_back_on_timeout() {
        let arb = Arbiter::new(ArbiterConfig::default(), Arc::new(SlowSource));
        let cue = arb.render(hint(), Timestamp::ZERO).await;
        assert!(cue.fallback);
        assert_eq!(cue.text, "Step back so I can see your feet.");
        assert!(cue.latency_ms >= 700 && cue.latency_ms < 1000);
    }

    #[test]
    fn test_render_now_needs_ready_text() {
        let sag = issue(None, IssueKind::HipSag, Severity::Warning, 0);
        let cue = arbiter().render_now(&sag, Timestamp::from_millis(10)).unwrap();
        assert_eq!(cue.text, "Lift your hips a little.");
        assert_eq!(cue.latency_ms, 0);

        let slow = Arbiter::new(ArbiterConfig::default(), Arc::new(SlowSource));
        assert!(slow.render_now(&sag, Timestamp::ZERO).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_task_runs_detached() {
        let arb = Arbiter::new(ArbiterConfig::default(), Arc::new(SlowSource));
        let task = tokio::spawn(arb.render_task(hint(), Timestamp::from_millis(40)));
        drop(arb);

        let cue = task.await.unwrap();
        assert!(cue.fallback);
        assert_eq!(cue.issued_at, Timestamp::from_millis(40));
    }

    #[tokio::test]
    async fn test_render_falls_back_on_error() {
        let arb = Arbiter::new(ArbiterConfig::default(), Arc::new(FailingSource));
        let cue = arb
            .render(
                issue(None, IssueKind::HipSag, Severity::Warning, 0),
                Timestamp::ZERO,
            )
            .await;
        assert!(cue.fallback);
        assert_eq!(cue.text, "Lift your hips a little.");
    }

    #[test]
    fn test_status_text_while_waiting() {
        let arena = FsmArena::for_exercise(
            Arc::new(catalog::builtin(ExerciseId::Plank)),
            Timestamp::ZERO,
        );
        assert_eq!(status_text(&arena), "Getting into position…");
    }

    #[test]
    fn test_builder() {
        let config = ArbiterConfig::builder()
            .min_cue_interval_ms(1000)
            .render_budget_ms(500)
            .build();
        assert_eq!(config.min_cue_interval_ms, 1000);
        assert_eq!(config.render_budget_ms, 500);
        assert!(config.validate().is_ok());
        assert!(ArbiterConfig::builder().render_budget_ms(0).build().validate().is_err());
    }
}
