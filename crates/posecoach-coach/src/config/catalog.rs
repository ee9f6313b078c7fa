//! Built-in exercise configurations.
//!
//! The numbers here are product tuning, not structural contracts; load a
//! JSON [`StretchConfig`] to override them.

use posecoach_core::BodyPoint;
use posecoach_signal::Joint;

use super::{
    Band, Direction, ExerciseId, IssueKind, IssueRule, Metric, StretchConfig, StretchTiming,
};

/// Validated default configuration for a catalog exercise.
#[must_use]
pub fn builtin(exercise: ExerciseId) -> StretchConfig {
    match exercise {
        ExerciseId::Plank => plank(),
        ExerciseId::SidePlank => side_plank(),
        ExerciseId::HamstringStretch => hamstring_stretch(),
    }
}

/// All catalog configurations.
#[must_use]
pub fn all() -> Vec<StretchConfig> {
    ExerciseId::ALL.iter().map(|id| builtin(*id)).collect()
}

fn plank() -> StretchConfig {
    StretchConfig {
        exercise: ExerciseId::Plank,
        unilateral: false,
        required_keypoints: vec![
            BodyPoint::Ear,
            BodyPoint::Shoulder,
            BodyPoint::Hip,
            BodyPoint::Ankle,
        ],
        min_visibility: 0.5,
        min_required_coverage: 0.75,
        motion_limit: 20.0,
        issues: vec![
            IssueRule {
                issue: IssueKind::HipSag,
                metric: Metric::BodyLine,
                direction: Direction::Below,
                warning: Band::new(-9.0, -7.0),
                critical: Band::new(-15.0, -12.0),
                priority: 0,
                cue_cooldown_ms: 6000,
            },
            IssueRule {
                issue: IssueKind::HipPike,
                metric: Metric::BodyLine,
                direction: Direction::Above,
                warning: Band::new(9.0, 7.0),
                critical: Band::new(15.0, 12.0),
                priority: 1,
                cue_cooldown_ms: 6000,
            },
            IssueRule {
                issue: IssueKind::NeckDrop,
                metric: Metric::Neck,
                direction: Direction::Below,
                warning: Band::new(150.0, 158.0),
                critical: Band::new(135.0, 142.0),
                priority: 2,
                cue_cooldown_ms: 8000,
            },
        ],
        timing: StretchTiming::default(),
    }
}

fn side_plank() -> StretchConfig {
    StretchConfig {
        exercise: ExerciseId::SidePlank,
        unilateral: true,
        required_keypoints: vec![
            BodyPoint::Shoulder,
            BodyPoint::Elbow,
            BodyPoint::Hip,
            BodyPoint::Ankle,
        ],
        min_visibility: 0.5,
        min_required_coverage: 0.75,
        motion_limit: 20.0,
        issues: vec![IssueRule {
            issue: IssueKind::HipDrop,
            metric: Metric::Joint(Joint::Hip),
            direction: Direction::Below,
            warning: Band::new(160.0, 165.0),
            critical: Band::new(145.0, 150.0),
            priority: 0,
            cue_cooldown_ms: 6000,
        }],
        timing: StretchTiming::default(),
    }
}

fn hamstring_stretch() -> StretchConfig {
    StretchConfig {
        exercise: ExerciseId::HamstringStretch,
        unilateral: true,
        required_keypoints: vec![
            BodyPoint::Shoulder,
            BodyPoint::Hip,
            BodyPoint::Knee,
            BodyPoint::Ankle,
        ],
        min_visibility: 0.5,
        min_required_coverage: 0.75,
        motion_limit: 30.0,
        issues: vec![IssueRule {
            issue: IssueKind::KneeBent,
            metric: Metric::Joint(Joint::Knee),
            direction: Direction::Below,
            warning: Band::new(155.0, 160.0),
            critical: Band::new(140.0, 145.0),
            priority: 0,
            cue_cooldown_ms: 7000,
        }],
        timing: StretchTiming {
            stability_window_ms: 1500,
            ..StretchTiming::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_valid() {
        for cfg in all() {
            cfg.validate()
                .unwrap_or_else(|e| panic!("{} invalid: {e}", cfg.exercise));
        }
    }

    #[test]
    fn test_catalog_ids_match() {
        for id in ExerciseId::ALL {
            assert_eq!(builtin(id).exercise, id);
        }
    }

    #[test]
    fn test_plank_hip_sag_band() {
        let plank = builtin(ExerciseId::Plank);
        let sag = plank.rule(IssueKind::HipSag).unwrap();
        assert_eq!(sag.warning, Band::new(-9.0, -7.0));
        assert_eq!(plank.rules_by_priority()[0].issue, IssueKind::HipSag);
    }
}
