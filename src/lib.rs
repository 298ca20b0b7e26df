//! Gate capture kernel
//!
//! This crate turns a live video source into one high-quality still and
//! classifies the vehicle in it.
//!
//! # Architecture
//!
//! ```text
//! FrameSource -> FrameSampler(+FrameScorer) -> ImageEnhancer -> StillEncoder -> DetectionOrchestrator
//! ```
//!
//! 1. **Best-of-N capture**: three frames, 100 ms apart, the highest contrast
//!    score wins (ties keep the earlier frame).
//! 2. **Deterministic enhancement**: luma, fixed contrast stretch, fixed
//!    sharpening boost; achromatic output.
//! 3. **JPEG still** at quality 92.
//! 4. **Two-tier detection**: primary detector, one fallback hop, otherwise
//!    a `DetectionFailed` carrying both causes.
//!
//! A frame source has a single reader: a second capture while one is in
//! flight is rejected with `CaptureError::SourceBusy`.
//!
//! # Module Structure
//!
//! - `frame`: raw frame container
//! - `ingest`: frame sources (stub, HTTP/RTSP streams, V4L2 cameras)
//! - `capture`: scoring and best-of-N sampling
//! - `enhance`, `encode`: still preparation
//! - `detect`: detector capability, variants, orchestrator
//! - `pipeline`: the capture-and-detect request
//! - `api`: HTTP request/response boundary
//! - `config`: file + environment configuration

pub mod api;
pub mod capture;
pub mod config;
pub mod detect;
pub mod encode;
pub mod enhance;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;

#[cfg(test)]
mod test_support;

pub use capture::{FrameSampler, FrameScore, FrameScorer, SamplerConfig};
pub use config::{DetectorKind, PipelineConfig, SourceKind};
pub use detect::{
    DetectionOrchestrator, DetectionResult, DetectionSource, Detector, DetectorHandle,
    DetectorRegistry, NativeDetection,
};
pub use encode::{EncodedStill, StillEncoder, StillFormat};
pub use enhance::{EnhancedImage, ImageEnhancer};
pub use error::{CaptureError, DetectionFailed, DetectorError, EncodeError, PipelineError};
pub use frame::Frame;
pub use ingest::{build_source, FrameSource, SharedSource, StubSource};
pub use pipeline::CapturePipeline;
