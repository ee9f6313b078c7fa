//! The stretch state machine.
//!
//! ```text
//! WAITING → READY → HOLDING ⇄ COACH_ISSUE → COOLDOWN → HOLDING
//!    ↑__________________________________________________|
//!          (visibility lost for the whole stability window)
//! ```
//!
//! One engine serves every exercise; behaviour comes from the
//! [`StretchConfig`] it is built with. Each call to [`StretchFsm::step`]
//! evaluates the newest Motion Buffer sample and produces at most one
//! transition and at most one event.

use std::sync::Arc;

use posecoach_core::{KeypointType, Side, Timestamp};
use posecoach_signal::{Features, MotionBuffer};

use super::hint;
use super::state::{
    ActiveIssue, Candidate, CoachEvent, EventKind, FsmKey, FsmState, FsmStateData,
    IssueResolution, StepOutcome,
};
use crate::config::{IssueKind, IssueRule, Severity, StretchConfig};

/// One (exercise, side) state machine.
#[derive(Debug, Clone)]
pub struct StretchFsm {
    key: FsmKey,
    config: Arc<StretchConfig>,
    required_left: Vec<KeypointType>,
    required_right: Vec<KeypointType>,
    data: FsmStateData,
}

impl StretchFsm {
    /// Create an instance in `WAITING`. `side` is `None` for bilateral
    /// exercises.
    #[must_use]
    pub fn new(config: Arc<StretchConfig>, side: Option<Side>, now: Timestamp) -> Self {
        Self {
            key: FsmKey {
                exercise: config.exercise,
                side,
            },
            required_left: config.required_on(Side::Left),
            required_right: config.required_on(Side::Right),
            config,
            data: FsmStateData::new(now),
        }
    }

    /// Instance key.
    #[must_use]
    pub fn key(&self) -> FsmKey {
        self.key
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> FsmState {
        self.data.state
    }

    /// Full state data.
    #[must_use]
    pub fn data(&self) -> &FsmStateData {
        &self.data
    }

    /// Exercise configuration.
    #[must_use]
    pub fn config(&self) -> &StretchConfig {
        &self.config
    }

    /// Advance one tick against the current buffer contents.
    pub fn step(&mut self, buffer: &MotionBuffer, now: Timestamp) -> StepOutcome {
        let Some(latest) = buffer.latest() else {
            return StepOutcome::default();
        };
        let gated = self.update_motion_gate(latest, now);

        let min_coverage = self.config.min_required_coverage;
        let window = self.config.timing.stability_window_ms;
        if self.data.state != FsmState::Waiting
            && buffer.holds_for(window, now, |f| self.coverage(f) < min_coverage)
        {
            return self.enter_waiting(latest, now);
        }

        match self.data.state {
            FsmState::Waiting => self.step_waiting(buffer, latest, now),
            FsmState::Ready => self.step_ready(buffer, latest, gated, now),
            FsmState::Holding => self.step_holding(latest, gated, now),
            FsmState::CoachIssue => StepOutcome {
                resolved: self.track_resolution(latest, now),
                transition: Some(self.data.transition(FsmState::Cooldown, now)),
                event: None,
            },
            FsmState::Cooldown => self.step_cooldown(latest, gated, now),
        }
    }

    fn step_waiting(
        &mut self,
        buffer: &MotionBuffer,
        latest: &Features,
        now: Timestamp,
    ) -> StepOutcome {
        let samples = buffer.config().visibility_median_samples;
        let coverage = buffer.median_of(samples, |f| self.coverage(f)).unwrap_or(0.0);

        if coverage >= self.config.min_required_coverage {
            self.data.last_hint_at = None;
            return StepOutcome {
                transition: Some(self.data.transition(FsmState::Ready, now)),
                ..StepOutcome::default()
            };
        }

        let hint_due = self.data.last_hint_at.map_or(true, |at| {
            now.millis_since(at) >= self.config.timing.hint_interval_ms as i64
        });
        if hint_due {
            return StepOutcome {
                event: Some(self.hint_event(latest, now)),
                ..StepOutcome::default()
            };
        }
        StepOutcome::default()
    }

    fn step_ready(
        &mut self,
        buffer: &MotionBuffer,
        latest: &Features,
        gated: bool,
        now: Timestamp,
    ) -> StepOutcome {
        // Only visible samples count towards the stable run.
        let min_coverage = self.config.min_required_coverage;
        let held = buffer.holds_for(self.config.timing.stability_window_ms, now, |f| {
            f.stability.is_stable && self.coverage(f) >= min_coverage
        });
        if gated || !held {
            return StepOutcome::default();
        }

        let side = self.metric_side(latest);
        let critical = self.config.issues.iter().any(|rule| {
            latest
                .value(rule.metric.key(side))
                .and_then(|v| rule.entering(v))
                == Some(Severity::Critical)
        });
        if critical {
            return StepOutcome::default();
        }

        self.data.consecutive_issues = 0;
        StepOutcome {
            transition: Some(self.data.transition(FsmState::Holding, now)),
            event: Some(self.event(EventKind::HoldGood, now)),
            resolved: None,
        }
    }

    fn step_holding(&mut self, latest: &Features, gated: bool, now: Timestamp) -> StepOutcome {
        let resolved = self.track_resolution(latest, now);
        if resolved.is_some() {
            self.data.active_issue = None;
        }

        if gated {
            self.drop_candidate();
            return StepOutcome {
                resolved,
                ..StepOutcome::default()
            };
        }

        let Some((rule, severity, candidate)) = self.track_candidate(latest, None) else {
            let event = resolved.map(|_| {
                self.data.consecutive_issues = 0;
                self.event(EventKind::HoldGood, now)
            });
            return StepOutcome {
                resolved,
                event,
                transition: None,
            };
        };

        if !self.confirmed(candidate, now) {
            return StepOutcome {
                resolved,
                ..StepOutcome::default()
            };
        }
        self.fire(&rule, severity, candidate, resolved, now)
    }

    /// The cooled issue stays blocked until the cooldown ends; any other
    /// issue is tracked and may fire as usual.
    fn step_cooldown(&mut self, latest: &Features, gated: bool, now: Timestamp) -> StepOutcome {
        let resolved = self.track_resolution(latest, now);

        let expired = self.data.cooldown_until.map_or(true, |until| now >= until);
        if !expired {
            if gated {
                self.drop_candidate();
            } else {
                let cooled = self.data.active_issue.map(|a| a.issue);
                if let Some((rule, severity, candidate)) = self.track_candidate(latest, cooled) {
                    if self.confirmed(candidate, now) {
                        return self.fire(&rule, severity, candidate, resolved, now);
                    }
                }
            }
            return StepOutcome {
                resolved,
                ..StepOutcome::default()
            };
        }

        self.data.cooldown_until = None;
        let transition = Some(self.data.transition(FsmState::Holding, now));

        let event = match self.data.active_issue {
            Some(active) if active.resolved_at.is_some() => {
                self.data.active_issue = None;
                if self.top_violation(latest, None).is_none() {
                    self.data.candidate = None;
                    self.data.consecutive_issues = 0;
                    Some(self.event(EventKind::HoldGood, now))
                } else {
                    None
                }
            }
            Some(active) => {
                // Still unresolved: it must re-confirm before firing again,
                // unless another issue is already pending confirmation.
                if self.data.candidate.is_none() {
                    self.data.candidate = Some(Candidate {
                        issue: active.issue,
                        since: now,
                    });
                }
                None
            }
            None => None,
        };

        StepOutcome {
            transition,
            event,
            resolved,
        }
    }

    /// Update the candidate from the highest-priority violation other than
    /// `exclude`. Clears the candidate when nothing is violated.
    fn track_candidate(
        &mut self,
        latest: &Features,
        exclude: Option<IssueKind>,
    ) -> Option<(IssueRule, Severity, Candidate)> {
        let Some((rule, severity)) = self
            .top_violation(latest, exclude)
            .map(|(rule, severity)| (rule.clone(), severity))
        else {
            self.data.candidate = None;
            return None;
        };

        let candidate = match self.data.candidate {
            Some(c) if c.issue == rule.issue => c,
            _ => {
                let c = Candidate {
                    issue: rule.issue,
                    since: latest.timestamp,
                };
                self.data.candidate = Some(c);
                c
            }
        };
        Some((rule, severity, candidate))
    }

    fn confirmed(&self, candidate: Candidate, now: Timestamp) -> bool {
        now.millis_since(candidate.since) >= self.config.timing.issue_confirm_ms as i64
    }

    fn drop_candidate(&mut self) {
        if let Some(candidate) = self.data.candidate.take() {
            tracing::debug!(
                fsm = %self.key,
                issue = %candidate.issue,
                "Motion gate reset issue candidate"
            );
        }
    }

    /// Emit a confirmed issue and start its cooldown.
    fn fire(
        &mut self,
        rule: &IssueRule,
        severity: Severity,
        candidate: Candidate,
        resolved: Option<IssueResolution>,
        now: Timestamp,
    ) -> StepOutcome {
        let started_at = match self.data.active_issue {
            Some(active) if active.issue == rule.issue => active.started_at,
            _ => candidate.since,
        };
        let kind = EventKind::CoachIssue {
            issue: rule.issue,
            severity,
            priority: rule.priority,
            cue_cooldown_ms: rule.cue_cooldown_ms,
        };

        self.data.active_issue = Some(ActiveIssue {
            issue: rule.issue,
            severity,
            started_at,
            confirmed_at: now,
            resolved_at: None,
        });
        self.data.candidate = None;
        self.data.cooldown_until = Some(now.add_millis(self.config.timing.cooldown_ms));
        self.data.consecutive_issues += 1;
        self.data.total_issues += 1;

        StepOutcome {
            transition: Some(self.data.transition(FsmState::CoachIssue, now)),
            event: Some(self.event(kind, now)),
            resolved,
        }
    }

    fn enter_waiting(&mut self, latest: &Features, now: Timestamp) -> StepOutcome {
        self.data.candidate = None;
        self.data.active_issue = None;
        self.data.cooldown_until = None;
        self.data.consecutive_issues = 0;
        let transition = self.data.transition(FsmState::Waiting, now);
        StepOutcome {
            transition: Some(transition),
            event: Some(self.hint_event(latest, now)),
            resolved: None,
        }
    }

    fn hint_event(&mut self, latest: &Features, now: Timestamp) -> CoachEvent {
        let side = self.metric_side(latest);
        let (required, mirrored) = match self.key.side {
            Some(_) => (self.required(side), Some(self.required(side.opposite()))),
            None => (self.required(side), None),
        };
        let hint = hint::derive(&latest.visibility, required, mirrored);
        self.data.last_hint_at = Some(now);
        self.event(EventKind::WaitingHint(hint), now)
    }

    fn event(&mut self, kind: EventKind, now: Timestamp) -> CoachEvent {
        self.data.last_event_at = Some(now);
        CoachEvent {
            exercise: self.key.exercise,
            side: self.key.side,
            at: now,
            kind,
        }
    }

    /// Highest-priority violated rule other than `exclude`. The candidate
    /// issue is judged against its exit threshold so it does not flicker
    /// around the enter value.
    fn top_violation(
        &self,
        latest: &Features,
        exclude: Option<IssueKind>,
    ) -> Option<(&IssueRule, Severity)> {
        let side = self.metric_side(latest);
        let pending = self
            .data
            .candidate
            .map(|c| c.issue)
            .or_else(|| self.data.active_issue.map(|a| a.issue));

        self.config.rules_by_priority().into_iter().find_map(|rule| {
            if exclude == Some(rule.issue) {
                return None;
            }
            let value = latest.value(rule.metric.key(side))?;
            rule.evaluate(value, pending == Some(rule.issue))
                .map(|severity| (rule, severity))
        })
    }

    fn track_resolution(&mut self, latest: &Features, now: Timestamp) -> Option<IssueResolution> {
        let side = self.metric_side(latest);
        let active = self.data.active_issue?;
        if active.resolved_at.is_some() {
            return None;
        }
        let rule = self.config.rule(active.issue)?;
        let value = latest.value(rule.metric.key(side))?;
        if rule.persisting(value).is_some() {
            return None;
        }

        if let Some(a) = self.data.active_issue.as_mut() {
            a.resolved_at = Some(now);
        }
        Some(IssueResolution {
            issue: active.issue,
            duration_ms: now.millis_since(active.started_at),
        })
    }

    /// Returns whether coaching is currently gated by motion, extending the
    /// gate by the settle time whenever the newest sample is moving.
    fn update_motion_gate(&mut self, latest: &Features, now: Timestamp) -> bool {
        let moving = latest.stability.motion_gate
            || latest.velocity.body_line.abs() > self.config.motion_limit;
        if moving {
            self.data.motion_gate_until =
                Some(latest.timestamp.add_millis(self.config.timing.motion_settle_ms));
        }
        moving || self.data.motion_gate_until.is_some_and(|until| now < until)
    }

    fn required(&self, side: Side) -> &[KeypointType] {
        match side {
            Side::Left => &self.required_left,
            Side::Right => &self.required_right,
        }
    }

    /// Required-keypoint coverage of a sample for this instance.
    fn coverage(&self, features: &Features) -> f32 {
        match self.key.side {
            Some(side) => features.visibility.coverage(self.required(side)),
            None => Side::BOTH
                .iter()
                .map(|s| features.visibility.coverage(self.required(*s)))
                .fold(0.0, f32::max),
        }
    }

    /// Side used for sided metrics: our own, or the better-visible one.
    fn metric_side(&self, features: &Features) -> Side {
        if let Some(side) = self.key.side {
            return side;
        }
        let v = &features.visibility;
        let left = v.coverage(&self.required_left);
        let right = v.coverage(&self.required_right);
        if left != right {
            return if right > left { Side::Right } else { Side::Left };
        }
        let total =
            |points: &[KeypointType]| points.iter().map(|kp| v.confidence(*kp)).sum::<f32>();
        if total(&self.required_right) > total(&self.required_left) {
            Side::Right
        } else {
            Side::Left
        }
    }
}
