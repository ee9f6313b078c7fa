//! Reframe hint derivation.

use posecoach_core::{KeypointType, VisibilityClass};
use posecoach_signal::Visibility;

use super::state::{HintSuggestion, ReframeHint};

/// Build a hint from which of `required` are missing in `visibility`.
///
/// `mirrored` is the same landmark set resolved on the opposite side, for
/// unilateral exercises; if that side is complete while ours is not, the
/// user is facing the wrong way.
pub fn derive(
    visibility: &Visibility,
    required: &[KeypointType],
    mirrored: Option<&[KeypointType]>,
) -> ReframeHint {
    let missing: Vec<KeypointType> = required
        .iter()
        .copied()
        .filter(|kp| !visibility.is_visible(*kp))
        .collect();

    let suggestion = suggest(visibility, required, &missing, mirrored);
    ReframeHint {
        missing,
        suggestion,
    }
}

fn suggest(
    visibility: &Visibility,
    required: &[KeypointType],
    missing: &[KeypointType],
    mirrored: Option<&[KeypointType]>,
) -> HintSuggestion {
    if missing.is_empty() {
        return HintSuggestion::StepIntoFrame;
    }

    let occluded = missing
        .iter()
        .filter(|kp| {
            VisibilityClass::from_confidence(visibility.confidence(**kp))
                == VisibilityClass::Occluded
        })
        .count();
    if occluded * 2 > missing.len() {
        return HintSuggestion::ImproveLighting;
    }

    if missing.len() == required.len() {
        return HintSuggestion::StepIntoFrame;
    }

    if let Some(other) = mirrored {
        if visibility.coverage(other) >= 1.0 {
            return HintSuggestion::TurnSideways;
        }
    }

    let lower = |kp: &KeypointType| {
        matches!(
            kp,
            KeypointType::LeftKnee
                | KeypointType::RightKnee
                | KeypointType::LeftAnkle
                | KeypointType::RightAnkle
        )
    };
    if missing.iter().all(lower) {
        HintSuggestion::StepBack
    } else if missing.iter().all(|kp| !lower(kp)) {
        HintSuggestion::ShowUpperBody
    } else {
        HintSuggestion::StepIntoFrame
    }
}
