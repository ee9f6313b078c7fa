//! Core data types for the posecoach pipeline.
//!
//! This module defines the vocabulary shared by every stage of the coaching
//! core: the COCO-17 keypoint layout, per-keypoint confidence and visibility,
//! and the [`PoseFrame`] handed over by the external pose estimator.
//!
//! # Type Categories
//!
//! - **Pose Types**: [`PoseFrame`], [`Keypoint`], [`KeypointType`]
//! - **Anatomy**: [`Side`], [`BodyPoint`], [`BodyRegion`]
//! - **Common Types**: [`Confidence`], [`VisibilityClass`], [`Timestamp`], [`FrameId`]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::{MAX_KEYPOINTS, OCCLUSION_THRESHOLD, VISIBILITY_THRESHOLD};

// =============================================================================
// Common Types
// =============================================================================

/// Monotonically increasing identifier assigned by the pose source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct FrameId(pub u64);

impl FrameId {
    /// Returns the identifier that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Millisecond timestamp on the session clock.
///
/// Timestamps are signed so that out-of-order frames produce a negative
/// difference instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Timestamp(i64);

impl Timestamp {
    /// Session origin.
    pub const ZERO: Self = Self(0);

    /// Creates a timestamp from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp in milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Signed number of milliseconds elapsed since `earlier`.
    #[must_use]
    pub fn millis_since(&self, earlier: Self) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Signed number of seconds elapsed since `earlier`.
    #[must_use]
    pub fn duration_since(&self, earlier: Self) -> f64 {
        self.millis_since(earlier) as f64 / 1000.0
    }

    /// Returns this timestamp shifted forward by `millis`.
    #[must_use]
    pub fn add_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_add(i64::try_from(millis).unwrap_or(i64::MAX)))
    }

    /// Returns this timestamp shifted backward by `millis`.
    #[must_use]
    pub fn sub_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_sub(i64::try_from(millis).unwrap_or(i64::MAX)))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Confidence score in the range [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "f32", into = "f32"))]
pub struct Confidence(f32);

impl Confidence {
    /// Creates a new confidence value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not in the range [0.0, 1.0].
    pub fn new(value: f32) -> CoreResult<Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(CoreError::validation(format!(
                "Confidence must be in [0.0, 1.0], got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Creates a confidence value, clamping out-of-range input and mapping
    /// NaN to zero. Pose models occasionally report 1.0000001.
    #[must_use]
    pub fn saturating(value: f32) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    /// Returns the raw confidence value.
    #[must_use]
    pub fn value(&self) -> f32 {
        self.0
    }

    /// Returns `true` if the confidence meets the visibility threshold (0.6).
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.0 >= VISIBILITY_THRESHOLD
    }

    /// Returns `true` if the confidence meets the given threshold.
    #[must_use]
    pub fn exceeds(&self, threshold: f32) -> bool {
        self.0 >= threshold
    }

    /// Derived visibility class.
    #[must_use]
    pub fn class(&self) -> VisibilityClass {
        VisibilityClass::from_confidence(self.0)
    }

    /// Maximum confidence (1.0).
    pub const MAX: Self = Self(1.0);

    /// Minimum confidence (0.0).
    pub const MIN: Self = Self(0.0);
}

impl Default for Confidence {
    fn default() -> Self {
        Self(0.0)
    }
}

impl TryFrom<f32> for Confidence {
    type Error = CoreError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Confidence> for f32 {
    fn from(value: Confidence) -> Self {
        value.0
    }
}

/// Visibility class derived from a keypoint confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum VisibilityClass {
    /// Confidence at or above the visibility threshold; usable for geometry.
    Visible,
    /// Detected but below the visibility threshold.
    Occluded,
    /// Below the occlusion threshold or absent.
    NotVisible,
}

impl VisibilityClass {
    /// Classifies a raw confidence value.
    #[must_use]
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= VISIBILITY_THRESHOLD {
            Self::Visible
        } else if confidence >= OCCLUSION_THRESHOLD {
            Self::Occluded
        } else {
            Self::NotVisible
        }
    }
}

// =============================================================================
// Anatomy
// =============================================================================

/// Body side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Side {
    /// Subject's left
    Left,
    /// Subject's right
    Right,
}

impl Side {
    /// Both sides, left first.
    pub const BOTH: [Self; 2] = [Self::Left, Self::Right];

    /// Returns the opposite side.
    #[must_use]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// Lower-case name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Side-agnostic anatomical landmark, resolved to a [`KeypointType`] once a
/// side is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BodyPoint {
    /// Nose (midline; ignores side)
    Nose,
    /// Ear
    Ear,
    /// Shoulder
    Shoulder,
    /// Elbow
    Elbow,
    /// Wrist
    Wrist,
    /// Hip
    Hip,
    /// Knee
    Knee,
    /// Ankle
    Ankle,
}

impl BodyPoint {
    /// Resolves this landmark on the given side.
    #[must_use]
    pub fn on(&self, side: Side) -> KeypointType {
        use KeypointType as K;
        match (self, side) {
            (Self::Nose, _) => K::Nose,
            (Self::Ear, Side::Left) => K::LeftEar,
            (Self::Ear, Side::Right) => K::RightEar,
            (Self::Shoulder, Side::Left) => K::LeftShoulder,
            (Self::Shoulder, Side::Right) => K::RightShoulder,
            (Self::Elbow, Side::Left) => K::LeftElbow,
            (Self::Elbow, Side::Right) => K::RightElbow,
            (Self::Wrist, Side::Left) => K::LeftWrist,
            (Self::Wrist, Side::Right) => K::RightWrist,
            (Self::Hip, Side::Left) => K::LeftHip,
            (Self::Hip, Side::Right) => K::RightHip,
            (Self::Knee, Side::Left) => K::LeftKnee,
            (Self::Knee, Side::Right) => K::RightKnee,
            (Self::Ankle, Side::Left) => K::LeftAnkle,
            (Self::Ankle, Side::Right) => K::RightAnkle,
        }
    }

    /// Returns `true` for landmarks below the waist.
    #[must_use]
    pub fn is_lower_body(&self) -> bool {
        matches!(self, Self::Hip | Self::Knee | Self::Ankle)
    }
}

/// Coarse body region used for per-region visibility scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BodyRegion {
    /// Nose, eyes, ears
    Head,
    /// Shoulders and hips
    Torso,
    /// Elbows and wrists
    Arms,
    /// Knees and ankles
    Legs,
}

impl BodyRegion {
    /// All regions in reporting order.
    pub const ALL: [Self; 4] = [Self::Head, Self::Torso, Self::Arms, Self::Legs];
}

// =============================================================================
// Pose Types
// =============================================================================

/// Types of body keypoints following COCO format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum KeypointType {
    /// Nose
    Nose = 0,
    /// Left eye
    LeftEye = 1,
    /// Right eye
    RightEye = 2,
    /// Left ear
    LeftEar = 3,
    /// Right ear
    RightEar = 4,
    /// Left shoulder
    LeftShoulder = 5,
    /// Right shoulder
    RightShoulder = 6,
    /// Left elbow
    LeftElbow = 7,
    /// Right elbow
    RightElbow = 8,
    /// Left wrist
    LeftWrist = 9,
    /// Right wrist
    RightWrist = 10,
    /// Left hip
    LeftHip = 11,
    /// Right hip
    RightHip = 12,
    /// Left knee
    LeftKnee = 13,
    /// Right knee
    RightKnee = 14,
    /// Left ankle
    LeftAnkle = 15,
    /// Right ankle
    RightAnkle = 16,
}

impl KeypointType {
    /// Returns all keypoint types in order.
    #[must_use]
    pub fn all() -> &'static [Self; MAX_KEYPOINTS] {
        &[
            Self::Nose,
            Self::LeftEye,
            Self::RightEye,
            Self::LeftEar,
            Self::RightEar,
            Self::LeftShoulder,
            Self::RightShoulder,
            Self::LeftElbow,
            Self::RightElbow,
            Self::LeftWrist,
            Self::RightWrist,
            Self::LeftHip,
            Self::RightHip,
            Self::LeftKnee,
            Self::RightKnee,
            Self::LeftAnkle,
            Self::RightAnkle,
        ]
    }

    /// Returns the keypoint name as a string.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEye => "left_eye",
            Self::RightEye => "right_eye",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
        }
    }

    /// Index into per-keypoint arrays.
    #[must_use]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Body side, or `None` for the midline nose.
    #[must_use]
    pub fn side(&self) -> Option<Side> {
        match self {
            Self::Nose => None,
            Self::LeftEye
            | Self::LeftEar
            | Self::LeftShoulder
            | Self::LeftElbow
            | Self::LeftWrist
            | Self::LeftHip
            | Self::LeftKnee
            | Self::LeftAnkle => Some(Side::Left),
            _ => Some(Side::Right),
        }
    }

    /// Body region this keypoint contributes to.
    #[must_use]
    pub fn region(&self) -> BodyRegion {
        match self {
            Self::Nose | Self::LeftEye | Self::RightEye | Self::LeftEar | Self::RightEar => {
                BodyRegion::Head
            }
            Self::LeftShoulder | Self::RightShoulder | Self::LeftHip | Self::RightHip => {
                BodyRegion::Torso
            }
            Self::LeftElbow | Self::RightElbow | Self::LeftWrist | Self::RightWrist => {
                BodyRegion::Arms
            }
            Self::LeftKnee | Self::RightKnee | Self::LeftAnkle | Self::RightAnkle => {
                BodyRegion::Legs
            }
        }
    }
}

impl TryFrom<u8> for KeypointType {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::all()
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| CoreError::invalid_keypoint(value.to_string()))
    }
}

impl std::str::FromStr for KeypointType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .find(|kp| kp.name() == s)
            .copied()
            .ok_or_else(|| CoreError::invalid_keypoint(s))
    }
}

impl std::fmt::Display for KeypointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single body keypoint with position and confidence.
///
/// Immutable once produced by the pose source.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Keypoint {
    /// Type of keypoint
    #[cfg_attr(feature = "serde", serde(rename = "name"))]
    pub keypoint_type: KeypointType,
    /// X coordinate (normalized 0.0-1.0 or absolute pixels)
    pub x: f32,
    /// Y coordinate, growing downwards (image space)
    pub y: f32,
    /// Detection confidence
    pub confidence: Confidence,
}

impl Keypoint {
    /// Creates a new 2D keypoint.
    #[must_use]
    pub fn new(keypoint_type: KeypointType, x: f32, y: f32, confidence: Confidence) -> Self {
        Self {
            keypoint_type,
            x,
            y,
            confidence,
        }
    }

    /// Returns `true` if this keypoint meets the visibility threshold.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.confidence.is_visible()
    }

    /// Derived visibility class.
    #[must_use]
    pub fn visibility(&self) -> VisibilityClass {
        self.confidence.class()
    }

    /// Returns the 2D position as a tuple.
    #[must_use]
    pub fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    /// Calculates the Euclidean distance to another keypoint.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One pose-estimation result for a single subject.
///
/// Keypoints are stored by COCO index; a missing entry is equivalent to a
/// zero-confidence keypoint.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "PoseFrameRecord", into = "PoseFrameRecord"))]
pub struct PoseFrame {
    /// Frame identifier from the pose source
    pub id: FrameId,
    /// Capture time on the session clock
    pub timestamp: Timestamp,
    keypoints: [Option<Keypoint>; MAX_KEYPOINTS],
}

impl PoseFrame {
    /// Creates a frame with no keypoints.
    #[must_use]
    pub fn empty(id: FrameId, timestamp: Timestamp) -> Self {
        Self {
            id,
            timestamp,
            keypoints: [None; MAX_KEYPOINTS],
        }
    }

    /// Creates a frame from a set of keypoints. Later duplicates win.
    #[must_use]
    pub fn new(
        id: FrameId,
        timestamp: Timestamp,
        keypoints: impl IntoIterator<Item = Keypoint>,
    ) -> Self {
        let mut frame = Self::empty(id, timestamp);
        for kp in keypoints {
            frame.set_keypoint(kp);
        }
        frame
    }

    /// Sets a keypoint.
    pub fn set_keypoint(&mut self, keypoint: Keypoint) {
        self.keypoints[keypoint.keypoint_type.index()] = Some(keypoint);
    }

    /// Gets a keypoint by type.
    #[must_use]
    pub fn get(&self, keypoint_type: KeypointType) -> Option<&Keypoint> {
        self.keypoints[keypoint_type.index()].as_ref()
    }

    /// Gets a keypoint only if it meets the visibility threshold.
    #[must_use]
    pub fn visible(&self, keypoint_type: KeypointType) -> Option<&Keypoint> {
        self.get(keypoint_type).filter(|kp| kp.is_visible())
    }

    /// Confidence of a keypoint, zero when absent.
    #[must_use]
    pub fn confidence(&self, keypoint_type: KeypointType) -> f32 {
        self.get(keypoint_type)
            .map_or(0.0, |kp| kp.confidence.value())
    }

    /// Returns the number of visible keypoints.
    #[must_use]
    pub fn visible_keypoint_count(&self) -> usize {
        self.keypoints
            .iter()
            .filter(|kp| kp.as_ref().is_some_and(Keypoint::is_visible))
            .count()
    }

    /// Iterates over present keypoints.
    pub fn keypoints(&self) -> impl Iterator<Item = &Keypoint> {
        self.keypoints.iter().filter_map(Option::as_ref)
    }
}

/// Wire form of a [`PoseFrame`]: a flat list of named keypoints.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PoseFrameRecord {
    #[serde(default)]
    frame_id: FrameId,
    timestamp_ms: Timestamp,
    #[serde(default)]
    keypoints: Vec<Keypoint>,
}

#[cfg(feature = "serde")]
impl From<PoseFrameRecord> for PoseFrame {
    fn from(record: PoseFrameRecord) -> Self {
        Self::new(record.frame_id, record.timestamp_ms, record.keypoints)
    }
}

#[cfg(feature = "serde")]
impl From<PoseFrame> for PoseFrameRecord {
    fn from(frame: PoseFrame) -> Self {
        Self {
            frame_id: frame.id,
            timestamp_ms: frame.timestamp,
            keypoints: frame.keypoints().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_validation() {
        assert!(Confidence::new(0.5).is_ok());
        assert!(Confidence::new(0.0).is_ok());
        assert!(Confidence::new(1.0).is_ok());
        assert!(Confidence::new(-0.1).is_err());
        assert!(Confidence::new(1.1).is_err());
        assert_eq!(Confidence::saturating(1.2).value(), 1.0);
        assert_eq!(Confidence::saturating(f32::NAN).value(), 0.0);
    }

    #[test]
    fn test_visibility_classes() {
        assert_eq!(VisibilityClass::from_confidence(0.6), VisibilityClass::Visible);
        assert_eq!(VisibilityClass::from_confidence(0.59), VisibilityClass::Occluded);
        assert_eq!(VisibilityClass::from_confidence(0.3), VisibilityClass::Occluded);
        assert_eq!(VisibilityClass::from_confidence(0.1), VisibilityClass::NotVisible);
    }

    #[test]
    fn test_keypoint_distance() {
        let kp1 = Keypoint::new(KeypointType::Nose, 0.0, 0.0, Confidence::MAX);
        let kp2 = Keypoint::new(KeypointType::LeftEye, 3.0, 4.0, Confidence::MAX);

        let distance = kp1.distance_to(&kp2);
        assert!((distance - 5.0).abs() < 0.001);
    }

    #[test]
    fn test_pose_frame_lookup() {
        let frame = PoseFrame::new(
            FrameId(1),
            Timestamp::from_millis(100),
            [
                Keypoint::new(KeypointType::Nose, 0.5, 0.3, Confidence::saturating(0.95)),
                Keypoint::new(KeypointType::LeftShoulder, 0.4, 0.5, Confidence::saturating(0.4)),
            ],
        );

        assert_eq!(frame.visible_keypoint_count(), 1);
        assert!(frame.visible(KeypointType::Nose).is_some());
        assert!(frame.visible(KeypointType::LeftShoulder).is_none());
        assert!(frame.get(KeypointType::RightAnkle).is_none());
        assert_eq!(frame.confidence(KeypointType::RightAnkle), 0.0);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t1 = Timestamp::from_millis(100);
        let t2 = Timestamp::from_millis(1600);

        assert!((t2.duration_since(t1) - 1.5).abs() < 1e-9);
        assert_eq!(t1.millis_since(t2), -1500);
        assert_eq!(t1.add_millis(50), Timestamp::from_millis(150));
    }

    #[test]
    fn test_keypoint_type_conversion() {
        assert_eq!(KeypointType::try_from(0).unwrap(), KeypointType::Nose);
        assert_eq!(KeypointType::try_from(16).unwrap(), KeypointType::RightAnkle);
        assert!(KeypointType::try_from(17).is_err());
        assert_eq!("left_hip".parse::<KeypointType>().unwrap(), KeypointType::LeftHip);
        assert!("tail".parse::<KeypointType>().is_err());
    }

    #[test]
    fn test_body_point_resolution() {
        assert_eq!(BodyPoint::Ankle.on(Side::Right), KeypointType::RightAnkle);
        assert_eq!(BodyPoint::Nose.on(Side::Left), KeypointType::Nose);
        assert_eq!(KeypointType::LeftKnee.side(), Some(Side::Left));
        assert_eq!(KeypointType::RightWrist.region(), BodyRegion::Arms);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_pose_frame_wire_format() {
        let json = r#"{
            "frame_id": 7,
            "timestamp_ms": 1200,
            "keypoints": [
                {"name": "left_hip", "x": 0.4, "y": 0.6, "confidence": 0.9},
                {"name": "left_knee", "x": 0.5, "y": 0.7, "confidence": 0.2}
            ]
        }"#;
        let frame: PoseFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.id, FrameId(7));
        assert_eq!(frame.timestamp, Timestamp::from_millis(1200));
        assert!(frame.visible(KeypointType::LeftHip).is_some());
        assert!(frame.visible(KeypointType::LeftKnee).is_none());

        let bad = r#"{"timestamp_ms": 0, "keypoints": [{"name": "nose", "x": 0, "y": 0, "confidence": 3.0}]}"#;
        assert!(serde_json::from_str::<PoseFrame>(bad).is_err());
    }
}
