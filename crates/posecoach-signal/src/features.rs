//! Feature Engine
//!
//! Turns one [`PoseFrame`] plus the previous [`Features`] into a new
//! [`Features`] snapshot: joint angles, the body-line angle, reference
//! heights, velocities, a stability verdict and a visibility verdict.
//!
//! Every measurement that depends on a keypoint below the visibility
//! threshold is reported as *undefined* (`defined == false`, value `0.0`).
//! Downstream code must go through [`Features::value`], which returns `None`
//! for those, and never read a zero as "perfectly aligned".

use posecoach_core::{
    BodyPoint, BodyRegion, FrameId, Keypoint, KeypointType, PoseFrame, Side, Timestamp,
    MAX_KEYPOINTS, VISIBILITY_THRESHOLD,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::filters::blend;
use crate::geometry::{three_point_angle, vertical_deviation};
use crate::{Result, SignalError};

/// An angle in degrees, or undefined.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Angle {
    /// Degrees; `0.0` when undefined
    pub degrees: f32,
    /// Whether every keypoint behind this angle was visible
    pub defined: bool,
}

impl Angle {
    /// Undefined angle.
    pub const UNDEFINED: Self = Self {
        degrees: 0.0,
        defined: false,
    };

    /// A measured angle.
    #[must_use]
    pub fn measured(degrees: f32) -> Self {
        Self {
            degrees,
            defined: true,
        }
    }

    fn from_option(degrees: Option<f32>) -> Self {
        degrees.map_or(Self::UNDEFINED, Self::measured)
    }

    /// Degrees if defined.
    #[must_use]
    pub fn get(&self) -> Option<f32> {
        self.defined.then_some(self.degrees)
    }
}

/// An image-space vertical position, or undefined.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Height {
    /// Image-space `y`; `0.0` when undefined
    pub y: f32,
    /// Whether at least one contributing keypoint was visible
    pub defined: bool,
}

impl Height {
    /// Undefined height.
    pub const UNDEFINED: Self = Self {
        y: 0.0,
        defined: false,
    };

    fn mean_of(points: &[Option<&Keypoint>]) -> Self {
        let ys: Vec<f32> = points
            .iter()
            .flatten()
            .map(|kp| kp.y)
            .filter(|y| y.is_finite())
            .collect();
        if ys.is_empty() {
            Self::UNDEFINED
        } else {
            Self {
                y: ys.iter().sum::<f32>() / ys.len() as f32,
                defined: true,
            }
        }
    }

    /// Position if defined.
    #[must_use]
    pub fn get(&self) -> Option<f32> {
        self.defined.then_some(self.y)
    }
}

/// Left and right measurement of the same joint.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bilateral {
    /// Subject's left side
    pub left: Angle,
    /// Subject's right side
    pub right: Angle,
}

impl Bilateral {
    /// Angle on one side.
    #[must_use]
    pub fn side(&self, side: Side) -> Angle {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Angle {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// Side-resolvable joints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Joint {
    /// shoulder–hip–knee
    Hip,
    /// hip–knee–ankle
    Knee,
    /// elbow–shoulder–hip
    Shoulder,
    /// shoulder–elbow–wrist
    Elbow,
}

impl Joint {
    /// All joints.
    pub const ALL: [Self; 4] = [Self::Hip, Self::Knee, Self::Shoulder, Self::Elbow];

    /// The three keypoints (outer, vertex, outer) that define this joint.
    #[must_use]
    pub fn vertices(&self, side: Side) -> [KeypointType; 3] {
        use KeypointType as K;
        match (self, side) {
            (Self::Hip, Side::Left) => [K::LeftShoulder, K::LeftHip, K::LeftKnee],
            (Self::Hip, Side::Right) => [K::RightShoulder, K::RightHip, K::RightKnee],
            (Self::Knee, Side::Left) => [K::LeftHip, K::LeftKnee, K::LeftAnkle],
            (Self::Knee, Side::Right) => [K::RightHip, K::RightKnee, K::RightAnkle],
            (Self::Shoulder, Side::Left) => [K::LeftElbow, K::LeftShoulder, K::LeftHip],
            (Self::Shoulder, Side::Right) => [K::RightElbow, K::RightShoulder, K::RightHip],
            (Self::Elbow, Side::Left) => [K::LeftShoulder, K::LeftElbow, K::LeftWrist],
            (Self::Elbow, Side::Right) => [K::RightShoulder, K::RightElbow, K::RightWrist],
        }
    }

    /// Lower-case name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hip => "hip",
            Self::Knee => "knee",
            Self::Shoulder => "shoulder",
            Self::Elbow => "elbow",
        }
    }
}

/// Named joint angles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointAngles {
    /// Hip flexion
    pub hip: Bilateral,
    /// Knee flexion
    pub knee: Bilateral,
    /// Shoulder opening
    pub shoulder: Bilateral,
    /// Elbow flexion
    pub elbow: Bilateral,
    /// ear–shoulder–hip, mixed-side
    pub neck: Angle,
}

impl JointAngles {
    /// Angle of a joint on one side.
    #[must_use]
    pub fn get(&self, joint: Joint, side: Side) -> Angle {
        self.bilateral(joint).side(side)
    }

    fn bilateral(&self, joint: Joint) -> &Bilateral {
        match joint {
            Joint::Hip => &self.hip,
            Joint::Knee => &self.knee,
            Joint::Shoulder => &self.shoulder,
            Joint::Elbow => &self.elbow,
        }
    }

    fn bilateral_mut(&mut self, joint: Joint) -> &mut Bilateral {
        match joint {
            Joint::Hip => &mut self.hip,
            Joint::Knee => &mut self.knee,
            Joint::Shoulder => &mut self.shoulder,
            Joint::Elbow => &mut self.elbow,
        }
    }
}

/// Body-line deviation from vertical.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyLine {
    /// Signed shoulder→ankle deviation from the image vertical
    pub angle: Angle,
    /// Mean confidence of the shoulder/ankle pair used
    pub confidence: f32,
    /// Side the measurement was taken on
    pub side: Option<Side>,
}

/// Reference positions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReferencePositions {
    /// Mean hip height
    pub hip: Height,
    /// Mean shoulder height
    pub shoulder: Height,
    /// Nose, or mean ear height when the nose is hidden
    pub head: Height,
    /// Left ankle
    pub left_ankle: Height,
    /// Right ankle
    pub right_ankle: Height,
}

/// Per-second rates of change of the tracked scalars.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Velocities {
    /// Body-line angular velocity (deg/s)
    pub body_line: f32,
    /// Hip height velocity (units/s)
    pub hip_height: f32,
    /// Shoulder height velocity (units/s)
    pub shoulder_height: f32,
}

/// Stability verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stability {
    /// No tracked velocity exceeds its threshold
    pub is_stable: bool,
    /// `clamp(1 − ratio / 2, 0, 1)` where `ratio` is the largest
    /// velocity-to-threshold ratio
    pub score: f32,
    /// Motion is too large to coach through
    pub motion_gate: bool,
    /// Largest velocity-to-threshold ratio
    pub motion_ratio: f32,
}

impl Default for Stability {
    fn default() -> Self {
        Self {
            is_stable: true,
            score: 1.0,
            motion_gate: false,
            motion_ratio: 0.0,
        }
    }
}

/// Visibility verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Visibility {
    /// Fraction of all keypoints at or above the visibility threshold
    pub overall: f32,
    /// Fraction of head keypoints visible
    pub head: f32,
    /// Fraction of torso keypoints visible
    pub torso: f32,
    /// Fraction of arm keypoints visible
    pub arms: f32,
    /// Fraction of leg keypoints visible
    pub legs: f32,
    /// Fraction of the configured critical points visible
    pub critical: f32,
    /// `critical >= min_visibility`
    pub has_minimum_visibility: bool,
    /// Raw confidence per COCO index, zero when absent
    pub confidences: [f32; MAX_KEYPOINTS],
}

impl Visibility {
    /// Verdict for a frame where nothing is visible.
    #[must_use]
    pub fn none() -> Self {
        Self {
            overall: 0.0,
            head: 0.0,
            torso: 0.0,
            arms: 0.0,
            legs: 0.0,
            critical: 0.0,
            has_minimum_visibility: false,
            confidences: [0.0; MAX_KEYPOINTS],
        }
    }

    /// Score of one body region.
    #[must_use]
    pub fn region(&self, region: BodyRegion) -> f32 {
        match region {
            BodyRegion::Head => self.head,
            BodyRegion::Torso => self.torso,
            BodyRegion::Arms => self.arms,
            BodyRegion::Legs => self.legs,
        }
    }

    /// Confidence of one keypoint.
    #[must_use]
    pub fn confidence(&self, keypoint: KeypointType) -> f32 {
        self.confidences[keypoint.index()]
    }

    /// Whether one keypoint meets the visibility threshold.
    #[must_use]
    pub fn is_visible(&self, keypoint: KeypointType) -> bool {
        self.confidence(keypoint) >= VISIBILITY_THRESHOLD
    }

    /// Fraction of `points` that are visible; `1.0` for an empty set.
    #[must_use]
    pub fn coverage(&self, points: &[KeypointType]) -> f32 {
        if points.is_empty() {
            return 1.0;
        }
        let visible = points.iter().filter(|kp| self.is_visible(**kp)).count();
        visible as f32 / points.len() as f32
    }
}

/// One snapshot of derived pose features.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Features {
    /// Source frame, `None` for a pose-unavailable tick
    pub frame_id: Option<FrameId>,
    /// Frame timestamp
    pub timestamp: Timestamp,
    /// Body-line deviation from vertical
    pub body_line: BodyLine,
    /// Joint angles
    pub angles: JointAngles,
    /// Reference heights
    pub positions: ReferencePositions,
    /// Rates of change
    pub velocity: Velocities,
    /// Stability verdict
    pub stability: Stability,
    /// Visibility verdict
    pub visibility: Visibility,
}

impl Features {
    /// A zero-visibility record, used when the pose source failed.
    #[must_use]
    pub fn unavailable(timestamp: Timestamp) -> Self {
        Self {
            frame_id: None,
            timestamp,
            body_line: BodyLine::default(),
            angles: JointAngles::default(),
            positions: ReferencePositions::default(),
            velocity: Velocities::default(),
            stability: Stability::default(),
            visibility: Visibility::none(),
        }
    }

    /// Value of a feature, `None` when undefined.
    #[must_use]
    pub fn value(&self, key: FeatureKey) -> Option<f32> {
        match key {
            FeatureKey::BodyLine => self.body_line.angle.get(),
            FeatureKey::Neck => self.angles.neck.get(),
            FeatureKey::Joint(joint, side) => self.angles.get(joint, side).get(),
            FeatureKey::HipHeight => self.positions.hip.get(),
            FeatureKey::ShoulderHeight => self.positions.shoulder.get(),
            FeatureKey::HeadHeight => self.positions.head.get(),
            FeatureKey::AnkleHeight(Side::Left) => self.positions.left_ankle.get(),
            FeatureKey::AnkleHeight(Side::Right) => self.positions.right_ankle.get(),
            FeatureKey::Visibility => Some(self.visibility.overall),
            FeatureKey::CriticalVisibility => Some(self.visibility.critical),
            FeatureKey::StabilityScore => Some(self.stability.score),
        }
    }

    /// Engine-computed velocity of a feature, when it is a tracked scalar.
    #[must_use]
    pub fn velocity_of(&self, key: FeatureKey) -> Option<f32> {
        match key {
            FeatureKey::BodyLine => Some(self.velocity.body_line),
            FeatureKey::HipHeight => Some(self.velocity.hip_height),
            FeatureKey::ShoulderHeight => Some(self.velocity.shoulder_height),
            _ => None,
        }
    }
}

/// Addressable feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FeatureKey {
    /// Body-line angle
    BodyLine,
    /// Neck angle
    Neck,
    /// A joint angle on one side
    Joint(Joint, Side),
    /// Hip height
    HipHeight,
    /// Shoulder height
    ShoulderHeight,
    /// Head height
    HeadHeight,
    /// Ankle height on one side
    AnkleHeight(Side),
    /// Overall visibility score
    Visibility,
    /// Critical-point visibility score
    CriticalVisibility,
    /// Stability score
    StabilityScore,
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BodyLine => f.write_str("body_line"),
            Self::Neck => f.write_str("neck"),
            Self::Joint(joint, side) => write!(f, "{side}_{}", joint.name()),
            Self::HipHeight => f.write_str("hip_height"),
            Self::ShoulderHeight => f.write_str("shoulder_height"),
            Self::HeadHeight => f.write_str("head_height"),
            Self::AnkleHeight(side) => write!(f, "{side}_ankle_height"),
            Self::Visibility => f.write_str("visibility"),
            Self::CriticalVisibility => f.write_str("critical_visibility"),
            Self::StabilityScore => f.write_str("stability_score"),
        }
    }
}

/// Configuration for the feature engine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FeatureEngineConfig {
    /// Body-line angular velocity above which the pose is unstable (deg/s)
    pub angular_motion_threshold: f32,

    /// Reference-height velocity above which the pose is unstable
    /// (coordinate units/s)
    pub positional_motion_threshold: f32,

    /// Apply EMA smoothing to angles
    pub smoothing: bool,

    /// EMA factor for angle smoothing
    pub smoothing_alpha: f32,

    /// Keypoints behind the critical visibility score
    pub critical_points: Vec<KeypointType>,

    /// Critical score required for `has_minimum_visibility`
    pub min_visibility: f32,
}

impl Default for FeatureEngineConfig {
    fn default() -> Self {
        Self {
            angular_motion_threshold: 25.0,
            positional_motion_threshold: 0.08,
            smoothing: false,
            smoothing_alpha: 0.1,
            critical_points: vec![
                KeypointType::LeftShoulder,
                KeypointType::RightShoulder,
                KeypointType::LeftHip,
                KeypointType::RightHip,
            ],
            min_visibility: 0.5,
        }
    }
}

impl FeatureEngineConfig {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> FeatureEngineConfigBuilder {
        FeatureEngineConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::InvalidConfig`] for non-positive thresholds or
    /// out-of-range factors.
    pub fn validate(&self) -> Result<()> {
        if !(self.angular_motion_threshold > 0.0) {
            return Err(SignalError::InvalidConfig(
                "angular_motion_threshold must be positive".into(),
            ));
        }
        if !(self.positional_motion_threshold > 0.0) {
            return Err(SignalError::InvalidConfig(
                "positional_motion_threshold must be positive".into(),
            ));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(SignalError::InvalidConfig(format!(
                "smoothing_alpha must be in (0, 1], got {}",
                self.smoothing_alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.min_visibility) {
            return Err(SignalError::InvalidConfig(format!(
                "min_visibility must be in [0, 1], got {}",
                self.min_visibility
            )));
        }
        Ok(())
    }
}

/// Builder for [`FeatureEngineConfig`]
#[derive(Debug, Default)]
pub struct FeatureEngineConfigBuilder {
    config: FeatureEngineConfig,
}

impl FeatureEngineConfigBuilder {
    /// Set angular motion threshold (deg/s)
    #[must_use]
    pub fn angular_motion_threshold(mut self, threshold: f32) -> Self {
        self.config.angular_motion_threshold = threshold;
        self
    }

    /// Set positional motion threshold (units/s)
    #[must_use]
    pub fn positional_motion_threshold(mut self, threshold: f32) -> Self {
        self.config.positional_motion_threshold = threshold;
        self
    }

    /// Enable EMA smoothing with the given factor
    #[must_use]
    pub fn smoothing(mut self, alpha: f32) -> Self {
        self.config.smoothing = true;
        self.config.smoothing_alpha = alpha;
        self
    }

    /// Set the critical points
    #[must_use]
    pub fn critical_points(mut self, points: Vec<KeypointType>) -> Self {
        self.config.critical_points = points;
        self
    }

    /// Set minimum critical visibility
    #[must_use]
    pub fn min_visibility(mut self, min: f32) -> Self {
        self.config.min_visibility = min;
        self
    }

    /// Build configuration
    #[must_use]
    pub fn build(self) -> FeatureEngineConfig {
        self.config
    }
}

/// Stateful feature extractor.
///
/// The only state is the previous [`Features`], used for velocity and
/// smoothing. Call [`FeatureEngine::reset`] between sessions.
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    config: FeatureEngineConfig,
    previous: Option<Features>,
}

impl FeatureEngine {
    /// Create a new engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: FeatureEngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            previous: None,
        })
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &FeatureEngineConfig {
        &self.config
    }

    /// Replace the critical points, e.g. when the exercise changes.
    pub fn set_critical_points(&mut self, points: Vec<KeypointType>, min_visibility: f32) {
        self.config.critical_points = points;
        self.config.min_visibility = min_visibility.clamp(0.0, 1.0);
    }

    /// Features of the most recent frame.
    #[must_use]
    pub fn previous(&self) -> Option<&Features> {
        self.previous.as_ref()
    }

    /// Forget the previous frame.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Compute features for one frame. Never fails: missing or occluded
    /// keypoints yield undefined measurements.
    pub fn compute(&mut self, frame: &PoseFrame) -> Features {
        let mut features = Features {
            frame_id: Some(frame.id),
            timestamp: frame.timestamp,
            body_line: body_line(frame),
            angles: joint_angles(frame),
            positions: reference_positions(frame),
            velocity: Velocities::default(),
            stability: Stability::default(),
            visibility: self.visibility(frame),
        };

        if let Some(prev) = &self.previous {
            if self.config.smoothing {
                self.smooth(&mut features, prev);
            }
            features.velocity = velocities(&features, prev);
            features.stability = self.stability(&features.velocity);
        }

        self.previous = Some(features.clone());
        features
    }

    /// Record for a tick where the pose source produced nothing.
    pub fn compute_unavailable(&mut self, timestamp: Timestamp) -> Features {
        let features = Features::unavailable(timestamp);
        self.previous = Some(features.clone());
        features
    }

    fn smooth(&self, features: &mut Features, prev: &Features) {
        let alpha = self.config.smoothing_alpha;
        let smooth_angle = |current: &mut Angle, previous: Angle| {
            if current.defined && previous.defined {
                current.degrees = blend(alpha, current.degrees, previous.degrees);
            }
        };

        smooth_angle(&mut features.body_line.angle, prev.body_line.angle);
        smooth_angle(&mut features.angles.neck, prev.angles.neck);
        for joint in Joint::ALL {
            for side in Side::BOTH {
                let previous = prev.angles.get(joint, side);
                smooth_angle(features.angles.bilateral_mut(joint).side_mut(side), previous);
            }
        }
    }

    fn stability(&self, velocity: &Velocities) -> Stability {
        let angular = velocity.body_line.abs() / self.config.angular_motion_threshold;
        let positional = velocity.hip_height.abs().max(velocity.shoulder_height.abs())
            / self.config.positional_motion_threshold;
        let ratio = angular.max(positional);
        let is_stable = ratio <= 1.0;

        Stability {
            is_stable,
            score: (1.0 - ratio / 2.0).clamp(0.0, 1.0),
            motion_gate: !is_stable,
            motion_ratio: ratio,
        }
    }

    fn visibility(&self, frame: &PoseFrame) -> Visibility {
        let mut confidences = [0.0; MAX_KEYPOINTS];
        for kp in frame.keypoints() {
            confidences[kp.keypoint_type.index()] = kp.confidence.value();
        }

        let mut verdict = Visibility {
            confidences,
            ..Visibility::none()
        };
        verdict.overall = verdict.coverage(KeypointType::all());
        for region in BodyRegion::ALL {
            let points: Vec<KeypointType> = KeypointType::all()
                .iter()
                .copied()
                .filter(|kp| kp.region() == region)
                .collect();
            let score = verdict.coverage(&points);
            match region {
                BodyRegion::Head => verdict.head = score,
                BodyRegion::Torso => verdict.torso = score,
                BodyRegion::Arms => verdict.arms = score,
                BodyRegion::Legs => verdict.legs = score,
            }
        }
        verdict.critical = verdict.coverage(&self.config.critical_points);
        verdict.has_minimum_visibility = verdict.critical >= self.config.min_visibility;
        verdict
    }
}

fn joint_angles(frame: &PoseFrame) -> JointAngles {
    let mut angles = JointAngles::default();
    for joint in Joint::ALL {
        for side in Side::BOTH {
            let [a, vertex, c] = joint.vertices(side);
            *angles.bilateral_mut(joint).side_mut(side) = angle_at(frame, a, vertex, c);
        }
    }

    let ear = more_confident(frame, KeypointType::LeftEar, KeypointType::RightEar);
    let shoulder = more_confident(frame, KeypointType::LeftShoulder, KeypointType::RightShoulder);
    let hip = more_confident(frame, KeypointType::LeftHip, KeypointType::RightHip);
    angles.neck = angle_at(frame, ear, shoulder, hip);
    angles
}

fn angle_at(frame: &PoseFrame, a: KeypointType, vertex: KeypointType, c: KeypointType) -> Angle {
    match (frame.visible(a), frame.visible(vertex), frame.visible(c)) {
        (Some(a), Some(v), Some(c)) => {
            Angle::from_option(three_point_angle(a.position(), v.position(), c.position()))
        }
        _ => Angle::UNDEFINED,
    }
}

fn more_confident(frame: &PoseFrame, left: KeypointType, right: KeypointType) -> KeypointType {
    if frame.confidence(right) > frame.confidence(left) {
        right
    } else {
        left
    }
}

fn body_line(frame: &PoseFrame) -> BodyLine {
    let pair_mean = |side: Side| {
        let shoulder = frame.confidence(BodyPoint::Shoulder.on(side));
        let ankle = frame.confidence(BodyPoint::Ankle.on(side));
        (shoulder + ankle) / 2.0
    };
    let (left, right) = (pair_mean(Side::Left), pair_mean(Side::Right));

    let side = if left > right {
        Side::Left
    } else if right > left {
        Side::Right
    } else if frame.confidence(KeypointType::RightAnkle) > frame.confidence(KeypointType::LeftAnkle)
    {
        Side::Right
    } else {
        Side::Left
    };

    let shoulder = frame.visible(BodyPoint::Shoulder.on(side));
    let ankle = frame.visible(BodyPoint::Ankle.on(side));
    let angle = match (shoulder, ankle) {
        (Some(s), Some(a)) => Angle::from_option(vertical_deviation(s.position(), a.position())),
        _ => Angle::UNDEFINED,
    };

    BodyLine {
        angle,
        confidence: if angle.defined { pair_mean(side) } else { 0.0 },
        side: angle.defined.then_some(side),
    }
}

fn reference_positions(frame: &PoseFrame) -> ReferencePositions {
    use KeypointType as K;
    let nose = frame.visible(K::Nose);
    let head = if nose.is_some() {
        Height::mean_of(&[nose])
    } else {
        Height::mean_of(&[frame.visible(K::LeftEar), frame.visible(K::RightEar)])
    };

    ReferencePositions {
        hip: Height::mean_of(&[frame.visible(K::LeftHip), frame.visible(K::RightHip)]),
        shoulder: Height::mean_of(&[
            frame.visible(K::LeftShoulder),
            frame.visible(K::RightShoulder),
        ]),
        head,
        left_ankle: Height::mean_of(&[frame.visible(K::LeftAnkle)]),
        right_ankle: Height::mean_of(&[frame.visible(K::RightAnkle)]),
    }
}

fn velocities(current: &Features, previous: &Features) -> Velocities {
    let dt = current.timestamp.duration_since(previous.timestamp) as f32;
    if dt <= 0.0 {
        return Velocities::default();
    }
    let rate = |now: Option<f32>, before: Option<f32>| match (now, before) {
        (Some(now), Some(before)) => (now - before) / dt,
        _ => 0.0,
    };

    Velocities {
        body_line: rate(current.body_line.angle.get(), previous.body_line.angle.get()),
        hip_height: rate(current.positions.hip.get(), previous.positions.hip.get()),
        shoulder_height: rate(
            current.positions.shoulder.get(),
            previous.positions.shoulder.get(),
        ),
    }
}
