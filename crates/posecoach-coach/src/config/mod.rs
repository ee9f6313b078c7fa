//! Declarative per-exercise configuration.
//!
//! A [`StretchConfig`] is immutable once loaded: threshold bands with
//! hysteresis, required keypoints, visibility floors and timing constants.
//! One FSM engine runs every exercise; the exercise only changes the data it
//! is parameterized with.
//!
//! Configurations are validated on load. A malformed config (inverted
//! bands, zero timings, duplicate priorities) is rejected before a session
//! starts and never surfaces at tick time.
//!
//! # Example
//!
//! ```rust
//! use posecoach_coach::config::{catalog, ExerciseId};
//!
//! let plank = catalog::builtin(ExerciseId::Plank);
//! plank.validate().expect("built-in configs are valid");
//! assert_eq!(plank.timing.issue_confirm_ms, 350);
//! ```

pub mod catalog;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use posecoach_core::{BodyPoint, KeypointType, Side};
use posecoach_signal::{FeatureKey, Joint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when loading or validating a [`StretchConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read from disk.
    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON.
    #[error("Cannot parse config: {0}")]
    Parse(String),
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Exercises known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseId {
    /// Forearm plank, filmed from the side
    Plank,
    /// Side plank, one instance per supporting side
    SidePlank,
    /// Standing hamstring stretch
    HamstringStretch,
}

impl ExerciseId {
    /// All catalog exercises.
    pub const ALL: [Self; 3] = [Self::Plank, Self::SidePlank, Self::HamstringStretch];

    /// Machine name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plank => "plank",
            Self::SidePlank => "side_plank",
            Self::HamstringStretch => "hamstring_stretch",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Plank => "Plank",
            Self::SidePlank => "Side plank",
            Self::HamstringStretch => "Hamstring stretch",
        }
    }
}

impl std::fmt::Display for ExerciseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ExerciseId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|id| id.name() == s)
            .copied()
            .ok_or_else(|| {
                ConfigError::invalid_value("exercise", format!("unknown exercise `{s}`"))
            })
    }
}

/// Form issues the coach can call out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Hips below the shoulder–ankle line
    HipSag,
    /// Hips above the shoulder–ankle line
    HipPike,
    /// Head hanging below the spine line
    NeckDrop,
    /// Side plank hips dropping towards the floor
    HipDrop,
    /// Knee flexed during a straight-leg stretch
    KneeBent,
}

impl IssueKind {
    /// Machine name, also the speech category.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::HipSag => "hip_sag",
            Self::HipPike => "hip_pike",
            Self::NeckDrop => "neck_drop",
            Self::HipDrop => "hip_drop",
            Self::KneeBent => "knee_bent",
        }
    }

    /// Short correction used in status strings ("Adjust: hips lower").
    #[must_use]
    pub fn correction(&self) -> &'static str {
        match self {
            Self::HipSag => "hips higher",
            Self::HipPike => "hips lower",
            Self::NeckDrop => "head up",
            Self::HipDrop => "lift your hips",
            Self::KneeBent => "straighten your knee",
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Issue severity. Orders `Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Outside the warning band
    Warning,
    /// Outside the critical band
    Critical,
}

/// Which side of a band counts as a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Violation when the value drops to `enter` or below
    Below,
    /// Violation when the value rises to `enter` or above
    Above,
}

impl Direction {
    /// `value` has reached `threshold` in the violating direction.
    fn reached(self, value: f32, threshold: f32) -> bool {
        match self {
            Self::Below => value <= threshold,
            Self::Above => value >= threshold,
        }
    }

    /// `value` is strictly beyond `threshold` in the violating direction.
    fn beyond(self, value: f32, threshold: f32) -> bool {
        match self {
            Self::Below => value < threshold,
            Self::Above => value > threshold,
        }
    }

    /// `a` is further into the violating direction than `b`.
    fn worse(self, a: f32, b: f32) -> bool {
        self.beyond(a, b)
    }
}

/// A hysteresis band: enter at `enter`, resolve only once back past `exit`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Threshold that starts a violation
    pub enter: f32,
    /// Threshold the value must get back to before the violation resolves
    pub exit: f32,
}

impl Band {
    /// Creates a band.
    #[must_use]
    pub const fn new(enter: f32, exit: f32) -> Self {
        Self { enter, exit }
    }
}

/// The feature an issue rule watches.
///
/// Joint metrics are side-relative: the FSM resolves them to its own side,
/// or to the better-visible side for bilateral exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Body-line deviation from vertical
    BodyLine,
    /// Neck angle
    Neck,
    /// A joint angle
    Joint(Joint),
}

impl Metric {
    /// Resolve to a concrete feature on `side`.
    #[must_use]
    pub fn key(&self, side: Side) -> FeatureKey {
        match self {
            Self::BodyLine => FeatureKey::BodyLine,
            Self::Neck => FeatureKey::Neck,
            Self::Joint(joint) => FeatureKey::Joint(*joint, side),
        }
    }

    /// Whether this metric depends on a body side.
    #[must_use]
    pub fn is_sided(&self) -> bool {
        matches!(self, Self::Joint(_))
    }
}

/// One watched issue with warning and critical hysteresis bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRule {
    /// Issue reported when this rule fires
    pub issue: IssueKind,
    /// Watched feature
    pub metric: Metric,
    /// Violating direction
    pub direction: Direction,
    /// Warning band
    pub warning: Band,
    /// Critical band
    pub critical: Band,
    /// Tie-break order; lower is more safety-relevant
    pub priority: u8,
    /// Minimum time before the same cue may be spoken again
    pub cue_cooldown_ms: u64,
}

impl IssueRule {
    /// Severity of a value that is not yet flagged (enter thresholds).
    #[must_use]
    pub fn entering(&self, value: f32) -> Option<Severity> {
        if self.direction.reached(value, self.critical.enter) {
            Some(Severity::Critical)
        } else if self.direction.reached(value, self.warning.enter) {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    /// Severity of a value while the issue is already flagged (exit
    /// thresholds). `None` means the issue has resolved.
    #[must_use]
    pub fn persisting(&self, value: f32) -> Option<Severity> {
        if !self.direction.beyond(value, self.warning.exit) {
            None
        } else if self.direction.beyond(value, self.critical.exit) {
            Some(Severity::Critical)
        } else {
            Some(Severity::Warning)
        }
    }

    /// Evaluate `value`, using exit thresholds when `active`.
    #[must_use]
    pub fn evaluate(&self, value: f32, active: bool) -> Option<Severity> {
        if active {
            self.persisting(value)
        } else {
            self.entering(value)
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            self.warning.enter,
            self.warning.exit,
            self.critical.enter,
            self.critical.exit,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::invalid_value(
                "issues",
                format!("{}: thresholds must be finite", self.issue),
            ));
        }

        let d = self.direction;
        if !d.worse(self.warning.enter, self.warning.exit) {
            return Err(ConfigError::invalid_value(
                "issues",
                format!(
                    "{}: warning exit {} must be closer to good form than enter {}",
                    self.issue, self.warning.exit, self.warning.enter
                ),
            ));
        }
        if !d.worse(self.critical.enter, self.critical.exit) {
            return Err(ConfigError::invalid_value(
                "issues",
                format!(
                    "{}: critical exit {} must be closer to good form than enter {}",
                    self.issue, self.critical.exit, self.critical.enter
                ),
            ));
        }
        if !d.worse(self.critical.enter, self.warning.enter) {
            return Err(ConfigError::invalid_value(
                "issues",
                format!(
                    "{}: critical enter {} must lie beyond warning enter {}",
                    self.issue, self.critical.enter, self.warning.enter
                ),
            ));
        }
        if self.cue_cooldown_ms == 0 {
            return Err(ConfigError::invalid_value(
                "issues",
                format!("{}: cue_cooldown_ms must be > 0", self.issue),
            ));
        }
        Ok(())
    }
}

/// Timing constants, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StretchTiming {
    /// Continuous stability needed for READY → HOLDING, and continuous
    /// visibility loss needed to fall back to WAITING
    pub stability_window_ms: u64,
    /// How long a violation must persist before it is coached
    pub issue_confirm_ms: u64,
    /// Blocks re-coaching after a cue
    pub cooldown_ms: u64,
    /// Extra suppression after motion stops
    pub motion_settle_ms: u64,
    /// Re-emission interval of the reframe hint while WAITING
    pub hint_interval_ms: u64,
}

impl Default for StretchTiming {
    fn default() -> Self {
        Self {
            stability_window_ms: 1000,
            issue_confirm_ms: 350,
            cooldown_ms: 1500,
            motion_settle_ms: 500,
            hint_interval_ms: 5000,
        }
    }
}

/// Immutable per-exercise parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StretchConfig {
    /// Exercise this config drives
    pub exercise: ExerciseId,
    /// Run one FSM per body side
    pub unilateral: bool,
    /// Landmarks that must be visible, resolved per side
    pub required_keypoints: Vec<BodyPoint>,
    /// Critical-visibility floor for the feature engine
    pub min_visibility: f32,
    /// Fraction of required keypoints that must be visible to leave WAITING
    pub min_required_coverage: f32,
    /// Body-line angular velocity (deg/s) above which coaching is gated
    pub motion_limit: f32,
    /// Watched issues
    pub issues: Vec<IssueRule>,
    /// Timing constants
    #[serde(default)]
    pub timing: StretchTiming,
}

impl StretchConfig {
    /// Load a configuration from a JSON file and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be read,
    /// [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::InvalidValue`] if validation fails.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Parse a configuration from a JSON string and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::InvalidValue`].
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let cfg: StretchConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize to pretty-printed JSON at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate all fields, returning the first problem found.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] describing the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.required_keypoints.is_empty() {
            return Err(ConfigError::invalid_value(
                "required_keypoints",
                "must not be empty",
            ));
        }
        if !(self.min_visibility > 0.0 && self.min_visibility <= 1.0) {
            return Err(ConfigError::invalid_value(
                "min_visibility",
                format!("must be in (0, 1], got {}", self.min_visibility),
            ));
        }
        if !(self.min_required_coverage > 0.0 && self.min_required_coverage <= 1.0) {
            return Err(ConfigError::invalid_value(
                "min_required_coverage",
                format!("must be in (0, 1], got {}", self.min_required_coverage),
            ));
        }
        if !(self.motion_limit > 0.0) {
            return Err(ConfigError::invalid_value("motion_limit", "must be > 0"));
        }

        let t = &self.timing;
        for (field, value) in [
            ("timing.stability_window_ms", t.stability_window_ms),
            ("timing.issue_confirm_ms", t.issue_confirm_ms),
            ("timing.cooldown_ms", t.cooldown_ms),
            ("timing.hint_interval_ms", t.hint_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, "must be > 0"));
            }
        }
        if t.issue_confirm_ms >= t.cooldown_ms {
            return Err(ConfigError::invalid_value(
                "timing.issue_confirm_ms",
                format!(
                    "must be shorter than cooldown_ms ({} >= {})",
                    t.issue_confirm_ms, t.cooldown_ms
                ),
            ));
        }

        let mut priorities = HashSet::new();
        for rule in &self.issues {
            rule.validate()?;
            if !priorities.insert(rule.priority) {
                return Err(ConfigError::invalid_value(
                    "issues",
                    format!("duplicate priority {} ({})", rule.priority, rule.issue),
                ));
            }
        }

        if self.unilateral && self.required_keypoints.iter().all(|p| *p == BodyPoint::Nose) {
            return Err(ConfigError::invalid_value(
                "required_keypoints",
                "unilateral exercises need at least one sided landmark",
            ));
        }
        Ok(())
    }

    /// Required keypoints resolved on `side`.
    #[must_use]
    pub fn required_on(&self, side: Side) -> Vec<KeypointType> {
        let mut points: Vec<KeypointType> =
            self.required_keypoints.iter().map(|p| p.on(side)).collect();
        points.dedup();
        points
    }

    /// Required keypoints on both sides, for the engine's critical score.
    #[must_use]
    pub fn required_both_sides(&self) -> Vec<KeypointType> {
        let mut points = self.required_on(Side::Left);
        for kp in self.required_on(Side::Right) {
            if !points.contains(&kp) {
                points.push(kp);
            }
        }
        points
    }

    /// Issue rules ordered by priority.
    #[must_use]
    pub fn rules_by_priority(&self) -> Vec<&IssueRule> {
        let mut rules: Vec<&IssueRule> = self.issues.iter().collect();
        rules.sort_by_key(|r| r.priority);
        rules
    }

    /// Rule for an issue.
    #[must_use]
    pub fn rule(&self, issue: IssueKind) -> Option<&IssueRule> {
        self.issues.iter().find(|r| r.issue == issue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sag_rule() -> IssueRule {
        IssueRule {
            issue: IssueKind::HipSag,
            metric: Metric::BodyLine,
            direction: Direction::Below,
            warning: Band::new(-9.0, -7.0),
            critical: Band::new(-15.0, -12.0),
            priority: 0,
            cue_cooldown_ms: 6000,
        }
    }

    #[test]
    fn test_entering_thresholds() {
        let rule = sag_rule();
        assert_eq!(rule.entering(-8.9), None);
        assert_eq!(rule.entering(-9.0), Some(Severity::Warning));
        assert_eq!(rule.entering(-15.5), Some(Severity::Critical));
    }

    #[test]
    fn test_hysteresis_exit() {
        let rule = sag_rule();
        assert_eq!(rule.persisting(-8.0), Some(Severity::Warning));
        assert_eq!(rule.persisting(-7.0), None);
        assert_eq!(rule.persisting(-6.0), None);
        assert_eq!(rule.persisting(-13.0), Some(Severity::Critical));
        // Never flagged at -8, but stays flagged there once active.
        assert_eq!(rule.evaluate(-8.0, false), None);
        assert_eq!(rule.evaluate(-8.0, true), Some(Severity::Warning));
    }

    #[test]
    fn test_above_direction_mirrors() {
        let rule = IssueRule {
            issue: IssueKind::HipPike,
            direction: Direction::Above,
            warning: Band::new(9.0, 7.0),
            critical: Band::new(15.0, 12.0),
            ..sag_rule()
        };
        assert!(rule.validate().is_ok());
        assert_eq!(rule.entering(9.5), Some(Severity::Warning));
        assert_eq!(rule.persisting(7.5), Some(Severity::Warning));
        assert_eq!(rule.persisting(6.5), None);
    }

    #[test]
    fn test_inverted_band_rejected() {
        let mut rule = sag_rule();
        rule.warning = Band::new(-7.0, -9.0);
        assert!(matches!(
            rule.validate(),
            Err(ConfigError::InvalidValue { field: "issues", .. })
        ));

        let mut rule = sag_rule();
        rule.critical = Band::new(-8.0, -6.0);
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_timing_validation() {
        let mut cfg = catalog::builtin(ExerciseId::Plank);
        cfg.timing.issue_confirm_ms = 2000;
        assert!(cfg.validate().is_err());

        let mut cfg = catalog::builtin(ExerciseId::Plank);
        cfg.timing.stability_window_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_duplicate_priority_rejected() {
        let mut cfg = catalog::builtin(ExerciseId::Plank);
        let mut dup = cfg.issues[0].clone();
        dup.issue = IssueKind::NeckDrop;
        cfg.issues.push(dup);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plank.json");
        let cfg = catalog::builtin(ExerciseId::Plank);
        cfg.to_json(&path).unwrap();

        let loaded = StretchConfig::from_json(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_from_json_errors() {
        assert!(matches!(
            StretchConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            StretchConfig::from_json(Path::new("/nonexistent/plank.json")),
            Err(ConfigError::FileRead { .. })
        ));
    }

    #[test]
    fn test_exercise_id_parse() {
        assert_eq!("side_plank".parse::<ExerciseId>().unwrap(), ExerciseId::SidePlank);
        assert!("burpee".parse::<ExerciseId>().is_err());
    }

    #[test]
    fn test_required_keypoints_resolve() {
        let cfg = catalog::builtin(ExerciseId::SidePlank);
        let left = cfg.required_on(Side::Left);
        assert!(left.contains(&KeypointType::LeftHip));
        assert!(!left.contains(&KeypointType::RightHip));
        assert_eq!(cfg.required_both_sides().len(), left.len() * 2);
    }
}
