//! Canned cue text, used directly by the template source and as the
//! fallback whenever another source fails.

use posecoach_core::Side;

use super::cue::CueTopic;
use super::source::CueRequest;
use crate::config::{IssueKind, Severity};
use crate::fsm::HintSuggestion;

/// Canned text for a request, side prefix included.
pub fn canned(request: &CueRequest) -> String {
    with_side(base_text(request), request.side)
}

/// Prefix `text` with the side for unilateral cues.
pub fn with_side(text: impl Into<String>, side: Option<Side>) -> String {
    let text = text.into();
    match side {
        Some(Side::Left) => format!("Left side. {text}"),
        Some(Side::Right) => format!("Right side. {text}"),
        None => text,
    }
}

/// Side-agnostic canned text.
pub fn base_text(request: &CueRequest) -> &'static str {
    match request.topic {
        CueTopic::Issue(issue) => issue_text(issue, request.severity.unwrap_or(Severity::Warning)),
        CueTopic::Reframe => reframe_text(request.suggestion.unwrap_or(HintSuggestion::StepIntoFrame)),
        CueTopic::HoldGood => "Good. Hold that.",
    }
}

fn issue_text(issue: IssueKind, severity: Severity) -> &'static str {
    match (issue, severity) {
        (IssueKind::HipSag, Severity::Warning) => "Lift your hips a little.",
        (IssueKind::HipSag, Severity::Critical) => "Your hips are sagging. Squeeze your glutes and lift.",
        (IssueKind::HipPike, Severity::Warning) => "Lower your hips a little.",
        (IssueKind::HipPike, Severity::Critical) => "Hips are too high. Bring them down in line.",
        (IssueKind::NeckDrop, Severity::Warning) => "Keep your head in line with your spine.",
        (IssueKind::NeckDrop, Severity::Critical) => "Lift your head. Look at the floor ahead of you.",
        (IssueKind::HipDrop, Severity::Warning) => "Push your hips up.",
        (IssueKind::HipDrop, Severity::Critical) => "Your hips are dropping. Drive them up now.",
        (IssueKind::KneeBent, Severity::Warning) => "Straighten your knee.",
        (IssueKind::KneeBent, Severity::Critical) => "Your knee is bent. Ease off and straighten the leg.",
    }
}

fn reframe_text(suggestion: HintSuggestion) -> &'static str {
    match suggestion {
        HintSuggestion::StepIntoFrame => "Step into the frame so I can see you.",
        HintSuggestion::StepBack => "Step back so I can see your feet.",
        HintSuggestion::ShowUpperBody => "Move so I can see your head and shoulders.",
        HintSuggestion::TurnSideways => "Turn the other side towards the camera.",
        HintSuggestion::ImproveLighting => "I can't see you clearly. Try brighter light.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExerciseId;

    fn request(topic: CueTopic, side: Option<Side>) -> CueRequest {
        CueRequest {
            exercise: ExerciseId::SidePlank,
            side,
            topic,
            severity: Some(Severity::Warning),
            suggestion: None,
        }
    }

    #[test]
    fn test_every_issue_has_text() {
        for issue in [
            IssueKind::HipSag,
            IssueKind::HipPike,
            IssueKind::NeckDrop,
            IssueKind::HipDrop,
            IssueKind::KneeBent,
        ] {
            for severity in [Severity::Warning, Severity::Critical] {
                assert!(!issue_text(issue, severity).is_empty());
            }
        }
    }

    #[test]
    fn test_side_prefix() {
        let text = canned(&request(CueTopic::Issue(IssueKind::HipDrop), Some(Side::Left)));
        assert_eq!(text, "Left side. Push your hips up.");
        let text = canned(&request(CueTopic::HoldGood, None));
        assert_eq!(text, "Good. Hold that.");
    }

    #[test]
    fn test_reframe_defaults_to_step_into_frame() {
        let text = canned(&request(CueTopic::Reframe, None));
        assert_eq!(text, reframe_text(HintSuggestion::StepIntoFrame));
    }
}
