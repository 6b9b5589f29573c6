// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture engine

use std::fmt;

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Everything the capture engine can report
///
/// Only a few variants end a session (see [`CaptureError::is_fatal`]).
/// `Timeout` and `AlreadyConsumed` are normal outcomes of polling for the
/// latest frame and should be handled as such by the consumer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Ring or conversion buffers could not be allocated
    Allocation(String),
    /// Incoming frame had unusable caps or dimensions; the frame was dropped
    MalformedFrame(String),
    /// No new frame arrived within the caller's budget
    Timeout,
    /// The latest frame was already handed out
    AlreadyConsumed,
    /// The target ring slot is still held by the consumer; the frame was dropped
    SlotInUse(usize),
    /// Colorspace conversion failed for this frame
    ConversionFailure(String),
    /// Zero-copy was requested but host and device views differ
    UnifiedMemoryUnsupported,
    /// The external pipeline failed to build or change state
    Pipeline(String),
    /// Operation not valid in the current session state
    InvalidState(String),
    /// The session has been closed
    Closed,
    /// Configuration could not be loaded, saved or validated
    Config(String),
}

impl CaptureError {
    /// Whether this error ends the capture session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::Allocation(_)
                | CaptureError::UnifiedMemoryUnsupported
                | CaptureError::Pipeline(_)
        )
    }

    /// Whether this is an expected polling outcome rather than a failure
    pub fn is_expected(&self) -> bool {
        matches!(self, CaptureError::Timeout | CaptureError::AlreadyConsumed)
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Allocation(msg) => write!(f, "Buffer allocation failed: {}", msg),
            CaptureError::MalformedFrame(msg) => write!(f, "Malformed frame: {}", msg),
            CaptureError::Timeout => write!(f, "Timed out waiting for a new frame"),
            CaptureError::AlreadyConsumed => write!(f, "Latest frame was already consumed"),
            CaptureError::SlotInUse(slot) => {
                write!(f, "Ring slot {} is still held by the consumer", slot)
            }
            CaptureError::ConversionFailure(msg) => write!(f, "Conversion failed: {}", msg),
            CaptureError::UnifiedMemoryUnsupported => write!(
                f,
                "Zero-copy memory has different host and device addresses"
            ),
            CaptureError::Pipeline(msg) => write!(f, "Pipeline error: {}", msg),
            CaptureError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            CaptureError::Closed => write!(f, "Capture session is closed"),
            CaptureError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::Config(err.to_string())
    }
}

impl From<gstreamer::glib::Error> for CaptureError {
    fn from(err: gstreamer::glib::Error) -> Self {
        CaptureError::Pipeline(err.to_string())
    }
}

impl From<gstreamer::StateChangeError> for CaptureError {
    fn from(err: gstreamer::StateChangeError) -> Self {
        CaptureError::Pipeline(err.to_string())
    }
}
