// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the packet processors
//!
//! Every failure is local to one `process` or load call, with one exception:
//! [`PipelineError::DeviceUnavailable`] raised while constructing a processor
//! is terminal for that processor.

use crate::media::decoders::ColorCodec;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors reported by the depth and color processors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// Accelerator or decode service could not be brought up
    #[error("Accelerator unavailable: {0}")]
    DeviceUnavailable(String),

    /// Calibration input rejected
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// `process` called before all calibration tables were loaded
    #[error("Processor not ready: calibration incomplete")]
    NotReady,

    /// Packet payload does not have the expected size
    #[error("Invalid packet: expected {expected} bytes, got {actual}")]
    InvalidPacket { expected: usize, actual: usize },

    /// Hardware decode returned an error status
    #[error("{codec} decode failed: {reason}")]
    DecodeFailure { codec: ColorCodec, reason: String },

    /// Intermediate buffer or session allocation failed mid-call
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),
}

impl PipelineError {
    /// Whether this error leaves the processor permanently unusable
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineError::DeviceUnavailable(_))
    }
}

/// Malformed or wrong-length calibration input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalibrationError {
    #[error("{table} has wrong length: expected {expected}, got {actual}")]
    WrongLength {
        table: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{table} contains a non-finite value at index {index}")]
    NonFinite { table: &'static str, index: usize },
}
