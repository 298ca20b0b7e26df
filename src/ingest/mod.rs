//! Frame sources.
//!
//! This module provides the `FrameSource` capability and its variants:
//! - `StubSource`: scripted or synthetic frames (tests, demos)
//! - `StreamUrlSource`: HTTP(S) MJPEG/JPEG streams, RTSP (feature: rtsp-gstreamer)
//! - `LiveCameraSource`: local V4L2 devices (feature: camera-v4l2)
//!
//! Sources are owned by a `SharedSource`, the single shared handle a capture
//! must acquire before reading. Only one capture may hold a source at a time;
//! a concurrent capture is rejected with `CaptureError::SourceBusy`.
//!
//! Sources MUST NOT:
//! - Store frames to disk
//! - Log pixel content

#[cfg(feature = "camera-v4l2")]
pub mod camera;
#[cfg(feature = "camera-v4l2")]
mod normalize;
#[cfg(feature = "rtsp-gstreamer")]
mod rtsp;
pub mod stream;
pub mod stub;

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use anyhow::Result;

use crate::config::{SourceKind, SourceSettings};
use crate::error::CaptureError;
use crate::frame::Frame;

#[cfg(feature = "camera-v4l2")]
pub use camera::{CameraConfig, LiveCameraSource};
pub use stream::{CctvEndpoint, StreamConfig, StreamUrlSource};
pub use stub::StubSource;

/// A live video source.
///
/// Readiness mirrors a video element: a source may exist before it can
/// deliver pixels. `wait_until_ready` blocks on the source's own readiness
/// signal; callers that need a deadline must enforce it themselves.
pub trait FrameSource: Send {
    /// Human-readable identifier for logs and errors.
    fn name(&self) -> &str;

    /// True when `read_frame` can deliver pixel data right away.
    fn is_ready(&self) -> bool;

    /// Block until the source is ready.
    ///
    /// Fails with `CaptureError::NoFrameAvailable` when the source can never
    /// become ready.
    fn wait_until_ready(&mut self) -> Result<(), CaptureError>;

    /// Read the frame currently presented by the source.
    ///
    /// Fails with `CaptureError::SourceUnavailable` on disconnect.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// Single shared handle over a frame source.
#[derive(Clone)]
pub struct SharedSource {
    name: String,
    inner: Arc<Mutex<Box<dyn FrameSource>>>,
}

impl SharedSource {
    pub fn new<S: FrameSource + 'static>(source: S) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn FrameSource>) -> Self {
        Self {
            name: source.name().to_string(),
            inner: Arc::new(Mutex::new(source)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take exclusive ownership of the source for one capture.
    ///
    /// Never blocks: if another capture holds the source this returns
    /// `CaptureError::SourceBusy`.
    pub fn acquire(&self) -> Result<SourceLease<'_>, CaptureError> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(SourceLease { guard }),
            Err(TryLockError::WouldBlock) => Err(CaptureError::SourceBusy(self.name.clone())),
            Err(TryLockError::Poisoned(_)) => Err(CaptureError::SourceUnavailable(format!(
                "{} was poisoned by a panicked capture",
                self.name
            ))),
        }
    }
}

/// Exclusive access to a source, released on drop.
pub struct SourceLease<'a> {
    guard: MutexGuard<'a, Box<dyn FrameSource>>,
}

impl SourceLease<'_> {
    pub fn source(&mut self) -> &mut dyn FrameSource {
        &mut **self.guard
    }
}

/// Build the source variant named by configuration.
pub fn build_source(settings: &SourceSettings) -> Result<SharedSource> {
    let source: Box<dyn FrameSource> = match settings.kind {
        SourceKind::Stub => Box::new(StubSource::synthetic(
            &settings.url,
            settings.width,
            settings.height,
        )),
        SourceKind::Stream => Box::new(StreamUrlSource::new(StreamConfig {
            url: settings.url.clone(),
            connect_timeout: settings.connect_timeout,
        })?),
        SourceKind::Camera => camera_source(settings)?,
    };
    log::info!("using {:?} source {}", settings.kind, source.name());
    Ok(SharedSource::from_boxed(source))
}

#[cfg(feature = "camera-v4l2")]
fn camera_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(LiveCameraSource::new(CameraConfig {
        device: settings.url.clone(),
        width: settings.width,
        height: settings.height,
        ..CameraConfig::default()
    })?))
}

#[cfg(not(feature = "camera-v4l2"))]
fn camera_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!(
        "camera source '{}' requires the camera-v4l2 feature",
        settings.url
    )
}
