//! End-to-end checks of the feature engine feeding the motion buffer.

use approx::assert_abs_diff_eq;
use posecoach_core::{Confidence, FrameId, Keypoint, KeypointType, PoseFrame, Side, Timestamp};
use posecoach_signal::{
    FeatureEngine, FeatureEngineConfig, FeatureKey, Joint, MotionBuffer, MotionBufferConfig,
};

/// Upright subject whose ankles are displaced sideways by `lean` degrees.
fn leaning_frame(ts: i64, lean_deg: f32, confidence: f32) -> PoseFrame {
    use KeypointType as K;
    let offset = 0.7 * lean_deg.to_radians().tan();
    let c = Confidence::saturating(confidence);
    PoseFrame::new(
        FrameId(ts as u64),
        Timestamp::from_millis(ts),
        [
            Keypoint::new(K::Nose, 0.50, 0.10, c),
            Keypoint::new(K::LeftEar, 0.48, 0.11, c),
            Keypoint::new(K::RightEar, 0.52, 0.11, c),
            Keypoint::new(K::LeftShoulder, 0.45, 0.25, c),
            Keypoint::new(K::RightShoulder, 0.55, 0.25, c),
            Keypoint::new(K::LeftHip, 0.45 + offset / 2.0, 0.60, c),
            Keypoint::new(K::RightHip, 0.55 + offset / 2.0, 0.60, c),
            Keypoint::new(K::LeftKnee, 0.45 + offset * 0.75, 0.78, c),
            Keypoint::new(K::RightKnee, 0.55 + offset * 0.75, 0.78, c),
            Keypoint::new(K::LeftAnkle, 0.45 + offset, 0.95, c),
            Keypoint::new(K::RightAnkle, 0.55 + offset, 0.95, c),
        ],
    )
}

#[test]
fn body_line_tracks_lean_through_buffer() {
    let mut engine = FeatureEngine::new(FeatureEngineConfig::default()).unwrap();
    let mut buffer = MotionBuffer::new(MotionBufferConfig::default()).unwrap();

    for i in 0..10 {
        buffer.push(engine.compute(&leaning_frame(i * 100, -9.0, 0.9)));
    }

    let q = buffer.query(FeatureKey::BodyLine, Some(1000));
    assert_eq!(q.sample_count, 10);
    assert_abs_diff_eq!(q.average, -9.0, epsilon = 0.05);
    assert!(q.variance < 1e-3);
    assert_abs_diff_eq!(q.average_velocity, 0.0, epsilon = 1e-3);
    assert!(buffer.stable_for(900, Timestamp::from_millis(900)));
}

#[test]
fn occluded_frames_do_not_contribute_angles() {
    let mut engine = FeatureEngine::new(FeatureEngineConfig::default()).unwrap();
    let mut buffer = MotionBuffer::new(MotionBufferConfig::default()).unwrap();

    buffer.push(engine.compute(&leaning_frame(0, 0.0, 0.9)));
    buffer.push(engine.compute(&leaning_frame(100, 0.0, 0.5)));
    buffer.push(engine.compute(&leaning_frame(200, 0.0, 0.9)));

    let knee = buffer.query(FeatureKey::Joint(Joint::Knee, Side::Left), None);
    assert_eq!(knee.sample_count, 2);

    let occluded = buffer.raw().nth(1).unwrap();
    assert!(occluded.value(FeatureKey::BodyLine).is_none());
    assert!(!occluded.visibility.has_minimum_visibility);
    assert_eq!(occluded.velocity.body_line, 0.0);
}

#[test]
fn sudden_motion_breaks_stability() {
    let mut engine = FeatureEngine::new(FeatureEngineConfig::default()).unwrap();
    let mut buffer = MotionBuffer::new(MotionBufferConfig::default()).unwrap();

    for i in 0..8 {
        buffer.push(engine.compute(&leaning_frame(i * 100, 0.0, 0.9)));
    }
    buffer.push(engine.compute(&leaning_frame(800, 15.0, 0.9)));

    let latest = buffer.latest().unwrap();
    assert!(latest.stability.motion_gate);
    assert!(latest.stability.score < 0.5);
    assert!(!buffer.stable_for(100, Timestamp::from_millis(800)));
}

#[test]
fn reset_prevents_leakage_between_sessions() {
    let mut engine = FeatureEngine::new(FeatureEngineConfig::default()).unwrap();
    let mut buffer = MotionBuffer::new(MotionBufferConfig::default()).unwrap();

    buffer.push(engine.compute(&leaning_frame(0, 0.0, 0.9)));
    buffer.push(engine.compute(&leaning_frame(100, 20.0, 0.9)));

    engine.reset();
    buffer.clear();

    let first = engine.compute(&leaning_frame(200, -20.0, 0.9));
    assert_eq!(first.velocity.body_line, 0.0);
    assert!(first.stability.is_stable);
    assert_eq!(first.stability.score, 1.0);
    buffer.push(first);
    assert_eq!(buffer.len(), 1);
}
