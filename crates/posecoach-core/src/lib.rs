//! # posecoach core
//!
//! Core types shared by the posecoach real-time coaching pipeline.
//!
//! This crate provides the foundational vocabulary used throughout the
//! workspace:
//!
//! - **Pose Types**: [`PoseFrame`], [`Keypoint`] and [`KeypointType`]
//!   (COCO-17 layout) as handed over by an external pose estimator.
//! - **Visibility**: [`Confidence`] and the derived [`VisibilityClass`]
//!   (`visible` at or above [`VISIBILITY_THRESHOLD`]).
//! - **Anatomy**: [`Side`], [`BodyPoint`] and [`BodyRegion`] for side-aware
//!   exercise rules.
//! - **Error Types**: [`CoreError`] via the [`error`] module.
//!
//! No imagery ever enters this crate: a frame is keypoint geometry only.
//!
//! ## Feature Flags
//!
//! - `std` (default): Enable standard library support
//! - `serde` (default): Enable serialization/deserialization via serde
//!
//! ## Example
//!
//! ```rust
//! use posecoach_core::{Confidence, Keypoint, KeypointType, VisibilityClass};
//!
//! let keypoint = Keypoint::new(
//!     KeypointType::LeftHip,
//!     0.5,
//!     0.6,
//!     Confidence::new(0.45).unwrap(),
//! );
//!
//! assert!(!keypoint.is_visible());
//! assert_eq!(keypoint.visibility(), VisibilityClass::Occluded);
//! ```

#![forbid(unsafe_code)]

pub mod error;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use types::{
    BodyPoint, BodyRegion, Confidence, FrameId, Keypoint, KeypointType, PoseFrame, Side,
    Timestamp, VisibilityClass,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of keypoints per subject (COCO format)
pub const MAX_KEYPOINTS: usize = 17;

/// Minimum confidence for a keypoint to be usable in geometry.
pub const VISIBILITY_THRESHOLD: f32 = 0.6;

/// Minimum confidence for a keypoint to count as detected-but-occluded.
pub const OCCLUSION_THRESHOLD: f32 = 0.3;

/// Prelude module for convenient imports.
///
/// ```rust
/// use posecoach_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::types::{
        BodyPoint, BodyRegion, Confidence, FrameId, Keypoint, KeypointType, PoseFrame, Side,
        Timestamp, VisibilityClass,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_valid() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_constants() {
        assert_eq!(MAX_KEYPOINTS, 17);
        assert!(OCCLUSION_THRESHOLD < VISIBILITY_THRESHOLD);
        assert!(VISIBILITY_THRESHOLD < 1.0);
    }
}
