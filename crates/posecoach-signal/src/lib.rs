//! posecoach signal processing
//!
//! Turns raw keypoint frames into smoothed, stability-annotated features for
//! the coaching state machine.
//!
//! # Features
//!
//! - **Feature Engine**: joint angles, body-line deviation, reference heights,
//!   velocities, stability and visibility verdicts per frame
//! - **Motion Buffer**: time-bounded history with EMA smoothing and median
//!   visibility filtering applied on read
//! - **Filters**: exponential moving average and median helpers
//!
//! # Example
//!
//! ```rust
//! use posecoach_core::{FrameId, PoseFrame, Timestamp};
//! use posecoach_signal::{FeatureEngine, FeatureEngineConfig, MotionBuffer, MotionBufferConfig};
//!
//! let mut engine = FeatureEngine::new(FeatureEngineConfig::default()).unwrap();
//! let mut buffer = MotionBuffer::new(MotionBufferConfig::default()).unwrap();
//!
//! let frame = PoseFrame::empty(FrameId(1), Timestamp::from_millis(0));
//! let features = engine.compute(&frame);
//! assert!(!features.visibility.has_minimum_visibility);
//! buffer.push(features);
//! ```

pub mod features;
pub mod filters;
pub mod geometry;
pub mod motion_buffer;

pub use features::{
    Angle, Bilateral, BodyLine, FeatureEngine, FeatureEngineConfig, FeatureEngineConfigBuilder,
    FeatureKey, Features, Height, Joint, JointAngles, ReferencePositions, Stability, Velocities,
    Visibility,
};
pub use filters::{median, Ema};
pub use motion_buffer::{BufferQuery, MotionBuffer, MotionBufferConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common result type for signal processing operations
pub type Result<T> = std::result::Result<T, SignalError>;

/// Unified error type for signal processing operations.
///
/// Only construction can fail; per-frame computation is total.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error from the core vocabulary
    #[error(transparent)]
    Core(#[from] posecoach_core::CoreError),
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::features::{FeatureEngine, FeatureEngineConfig, FeatureKey, Features, Joint};
    pub use crate::motion_buffer::{BufferQuery, MotionBuffer, MotionBufferConfig};
    pub use crate::{Result, SignalError};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = SignalError::InvalidConfig("window_ms must be non-zero".into());
        assert!(err.to_string().starts_with("Invalid configuration"));
    }
}
