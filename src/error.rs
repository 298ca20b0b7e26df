//! Error taxonomy for the capture and detection paths.
//!
//! Capture errors and detection errors are kept apart on purpose: callers
//! report "camera problem" and "model problem" differently.

use std::time::Duration;

use thiserror::Error;

/// Failures while acquiring frames from a source.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The source never reached a ready state.
    #[error("no frame available from {0}")]
    NoFrameAvailable(String),
    /// The source disconnected or failed mid-capture.
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),
    /// Another capture already holds the source.
    #[error("frame source '{0}' is busy with another capture")]
    SourceBusy(String),
    /// The source produced pixel data that does not describe a valid raster.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Failure reported by a single detector.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DetectorError {
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("internal detector error: {0}")]
    Internal(String),
    #[error("detector exceeded its {0:?} budget")]
    Timeout(Duration),
}

/// Both the primary and the fallback detector failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("detection failed (primary: {primary}; fallback: {fallback})")]
pub struct DetectionFailed {
    pub primary: DetectorError,
    pub fallback: DetectorError,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("jpeg quality must be within 1..=100, got {0}")]
    InvalidQuality(u8),
    #[error("failed to encode still: {0}")]
    Image(#[from] image::ImageError),
}

/// Top-level failure of a capture-and-detect request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Detection(#[from] DetectionFailed),
}

impl PipelineError {
    /// True when the request failed before any detector was consulted.
    pub fn is_capture_failure(&self) -> bool {
        matches!(self, PipelineError::Capture(_) | PipelineError::Encode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_failed_reports_both_causes() {
        let err = DetectionFailed {
            primary: DetectorError::Unavailable("connection refused".to_string()),
            fallback: DetectorError::MalformedInput("not an image".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("connection refused"));
        assert!(text.contains("not an image"));
    }

    #[test]
    fn capture_and_detection_failures_are_distinguishable() {
        let capture: PipelineError = CaptureError::SourceBusy("gate".to_string()).into();
        assert!(capture.is_capture_failure());

        let detection: PipelineError = DetectionFailed {
            primary: DetectorError::Internal("a".to_string()),
            fallback: DetectorError::Internal("b".to_string()),
        }
        .into();
        assert!(!detection.is_capture_failure());
    }
}
