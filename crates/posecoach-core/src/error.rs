//! Error types for the posecoach core vocabulary.
//!
//! Errors are built with [`thiserror`]. The core only fails while
//! *constructing* values (an out-of-range confidence, an unknown keypoint
//! index or name); everything evaluated per tick is total and never returns
//! an error.
//!
//! # Example
//!
//! ```rust
//! use posecoach_core::{Confidence, CoreError};
//!
//! let err = Confidence::new(1.4).unwrap_err();
//! assert!(matches!(err, CoreError::Validation { .. }));
//! ```

use thiserror::Error;

/// A specialized `Result` type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Top-level error type for the core crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// Validation error for input data
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what validation failed
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error
        message: String,
    },

    /// A keypoint index or name that is not part of the COCO-17 layout
    #[error("Unknown keypoint: {identifier}")]
    InvalidKeypoint {
        /// The offending index or name
        identifier: String,
    },
}

impl CoreError {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new unknown-keypoint error.
    #[must_use]
    pub fn invalid_keypoint(identifier: impl Into<String>) -> Self {
        Self::InvalidKeypoint {
            identifier: identifier.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::configuration("Inverted threshold band");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Inverted threshold"));
    }

    #[test]
    fn test_invalid_keypoint_display() {
        let err = CoreError::invalid_keypoint("left_tail");
        assert!(err.to_string().contains("left_tail"));
    }
}
