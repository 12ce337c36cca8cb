// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the reader
//!
//! Three layers exist:
//! - [`BackendError`](crate::backends::camera::BackendError) for frame sources
//! - [`CorrectionError`] for correction kernels
//! - [`ReaderError`] for the public capture and scan API
//!
//! Decode misses are not errors; they reach the result listener as an
//! absent text.

use crate::backends::camera::BackendError;
use std::fmt;

/// Result type alias using ReaderError
pub type ReaderResult<T> = Result<T, ReaderError>;

/// Errors surfaced by the capture session and the scan dispatcher
#[derive(Debug, Clone)]
pub enum ReaderError {
    /// The frame source could not be opened or configured.
    /// The session is unusable.
    Construction(BackendError),
    /// The operation is not permitted in the current lifecycle state
    IllegalState(&'static str),
    /// The frame source failed while changing its streaming state
    Source(BackendError),
    /// A correction kernel could not be created
    Correction(CorrectionError),
    /// Invalid configuration
    Config(String),
}

/// Correction kernel errors
#[derive(Debug, Clone)]
pub enum CorrectionError {
    /// The raw frame holds fewer luminance bytes than the frame size requires
    RawTooShort { expected: usize, actual: usize },
    /// The output buffer does not match the size required by the color format
    OutputSizeMismatch { expected: usize, actual: usize },
    /// Frame dimensions the kernel cannot handle
    InvalidDimensions { width: u32, height: u32 },
    /// GPU device or pipeline failure
    Gpu(String),
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderError::Construction(e) => write!(f, "Failed to open camera: {}", e),
            ReaderError::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            ReaderError::Source(e) => write!(f, "Frame source error: {}", e),
            ReaderError::Correction(e) => write!(f, "Correction error: {}", e),
            ReaderError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl fmt::Display for CorrectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionError::RawTooShort { expected, actual } => write!(
                f,
                "Raw frame too short: expected at least {} bytes, got {}",
                expected, actual
            ),
            CorrectionError::OutputSizeMismatch { expected, actual } => write!(
                f,
                "Output buffer size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            CorrectionError::InvalidDimensions { width, height } => {
                write!(f, "Invalid frame dimensions: {}x{}", width, height)
            }
            CorrectionError::Gpu(msg) => write!(f, "GPU error: {}", msg),
        }
    }
}

impl std::error::Error for ReaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReaderError::Construction(e) | ReaderError::Source(e) => Some(e),
            ReaderError::Correction(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for CorrectionError {}

impl From<CorrectionError> for ReaderError {
    fn from(err: CorrectionError) -> Self {
        ReaderError::Correction(err)
    }
}

impl From<serde_json::Error> for ReaderError {
    fn from(err: serde_json::Error) -> Self {
        ReaderError::Config(err.to_string())
    }
}

impl From<std::io::Error> for ReaderError {
    fn from(err: std::io::Error) -> Self {
        ReaderError::Config(err.to_string())
    }
}
