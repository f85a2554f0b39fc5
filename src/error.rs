//! Error types for cuantizar
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for cuantizar operations
pub type Result<T> = std::result::Result<T, CuantizarError>;

/// Error type for all cuantizar operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CuantizarError {
    /// Buffer length incompatible with the requested block geometry
    #[error("Invalid shape: {reason}")]
    InvalidShape {
        /// Reason for invalidity
        reason: String,
    },

    /// Packed data is structurally invalid for the format
    #[error("Format error: {reason}")]
    FormatError {
        /// Reason the data cannot be interpreted
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_shape_display() {
        let err = CuantizarError::InvalidShape {
            reason: "row length 100 is not a multiple of 64".to_string(),
        };
        assert!(err.to_string().contains("not a multiple of 64"));
    }

    #[test]
    fn test_format_error_display() {
        let err = CuantizarError::FormatError {
            reason: "truncated super-block".to_string(),
        };
        assert_eq!(err.to_string(), "Format error: truncated super-block");
    }

    #[test]
    fn test_error_is_clone_and_eq() {
        let err = CuantizarError::InvalidShape {
            reason: "x".to_string(),
        };
        assert_eq!(err.clone(), err);
    }
}
