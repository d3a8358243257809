//! Error types for layer file parsing

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for layer operations
pub type Result<T> = std::result::Result<T, LayerError>;

/// Errors that can occur while reading layer descriptors
#[derive(Debug, Error)]
pub enum LayerError {
    /// Layer uses a feature the controller does not implement
    #[error("Unsupported layer: {reason}")]
    ProtocolViolation {
        /// Reason for rejection
        reason: String,
    },

    /// Header fields are inconsistent or out of range
    #[error("Invalid layer: {reason}")]
    InvalidLayer {
        /// Reason for rejection
        reason: String,
    },

    /// Stream ended in the middle of a record
    #[error("Layer record truncated while reading {field}")]
    Truncated {
        /// Field that could not be read
        field: String,
    },

    /// File not found
    #[error("Layer file not found: {path}")]
    FileNotFound {
        /// Path that was attempted
        path: PathBuf,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl LayerError {
    /// Create a protocol violation error
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Create an invalid layer error
    pub fn invalid_layer(reason: impl Into<String>) -> Self {
        Self::InvalidLayer {
            reason: reason.into(),
        }
    }

    /// Create a truncation error
    pub fn truncated(field: impl Into<String>) -> Self {
        Self::Truncated {
            field: field.into(),
        }
    }
}
