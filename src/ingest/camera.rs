//! Live camera source.
//!
//! `LiveCameraSource` reads a local V4L2 device (e.g. a laptop webcam at
//! `/dev/video0`). It asks the driver for RGB3 at the configured resolution
//! and converts NV12/YUYV when the driver insists on a YUV format.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::FrameSource;
use crate::error::CaptureError;
use crate::frame::Frame;

/// Configuration for a V4L2 camera.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Requested frame rate; 0 keeps the driver default.
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1920,
            height: 1080,
            target_fps: 30,
        }
    }
}

pub struct LiveCameraSource {
    config: CameraConfig,
    state: Option<CameraState>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
}

#[self_referencing]
struct CameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl LiveCameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        Ok(Self {
            active_width: config.width,
            active_height: config.height,
            active_format: PixelFormat::Rgb24,
            config,
            state: None,
            frame_count: 0,
        })
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "LiveCameraSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "LiveCameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_format = PixelFormat::from_fourcc(&format.fourcc.repr)
            .with_context(|| format!("unsupported v4l2 pixel format {}", format.fourcc))?;
        self.active_width = format.width;
        self.active_height = format.height;

        let state = CameraStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "LiveCameraSource: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.active_width, self.active_height, self.active_format);
        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| normalize_to_rgb(buf, width, height, format))
        });
        let pixels = match captured {
            Ok(pixels) => pixels?,
            Err(err) => {
                self.state = None;
                return Err(anyhow::Error::new(err).context("capture v4l2 frame"));
            }
        };

        self.frame_count += 1;
        Ok(Frame::from_rgb(pixels, self.active_width, self.active_height)?)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

impl FrameSource for LiveCameraSource {
    fn name(&self) -> &str {
        &self.config.device
    }

    fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    fn wait_until_ready(&mut self) -> Result<(), CaptureError> {
        self.connect().map_err(|err| {
            log::warn!("LiveCameraSource: {} never became ready: {:#}", self.config.device, err);
            CaptureError::NoFrameAvailable(format!("{}: {:#}", self.config.device, err))
        })
    }

    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        self.next_frame()
            .map_err(|err| CaptureError::SourceUnavailable(format!("{}: {:#}", self.config.device, err)))
    }
}
