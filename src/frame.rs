//! Raw frame container.
//!
//! - `Frame`: one raster sampled from a source. Pixel bytes are private and
//!   read-only; there is no `Clone` and no mutable accessor, so a frame
//!   cannot change after capture.

use crate::error::CaptureError;

/// Minimum number of interleaved channels (R, G, B).
pub const MIN_CHANNELS: u8 = 3;

/// Raw frame sampled from a `FrameSource`.
///
/// Pixels are row-major and interleaved, 8 bits per channel. Channels past
/// the third (alpha, padding) are carried but ignored by scoring and
/// enhancement.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

// Explicitly NOT implementing Clone: the sampler owns a frame until it hands
// it to the enhancer.

impl Frame {
    /// Wrap a raster, validating dimensions against the buffer length.
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self, CaptureError> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidFrame(format!(
                "frame dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        if channels < MIN_CHANNELS {
            return Err(CaptureError::InvalidFrame(format!(
                "frame needs at least {} channels, got {}",
                MIN_CHANNELS, channels
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(channels as usize))
            .ok_or_else(|| CaptureError::InvalidFrame("frame dimensions overflow".to_string()))?;
        if data.len() != expected {
            return Err(CaptureError::InvalidFrame(format!(
                "expected {} bytes for {}x{}x{}, received {}",
                expected,
                width,
                height,
                channels,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Convenience constructor for packed RGB24 data.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, CaptureError> {
        Self::new(data, width, height, 3)
    }

    /// Read-only view of the interleaved bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Iterate over the (r, g, b) triple of every pixel in raster order.
    pub fn rgb_pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.data
            .chunks_exact(self.channels as usize)
            .map(|px| [px[0], px[1], px[2]])
    }
}
