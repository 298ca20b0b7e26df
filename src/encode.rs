//! Still encoding.
//!
//! - `StillEncoder` turns an `EnhancedImage` into a baseline JPEG.
//! - `EncodedStill` is the only thing a detector ever sees. Bytes are shared
//!   behind an `Arc`, so handing a still to a worker thread does not copy it.

use std::fmt;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use sha2::{Digest, Sha256};

use crate::enhance::EnhancedImage;
use crate::error::EncodeError;

/// JPEG quality used for captured stills.
pub const DEFAULT_JPEG_QUALITY: u8 = 92;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StillFormat {
    Jpeg,
    Png,
    Unknown,
}

impl StillFormat {
    /// Sniff the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Self {
        match image::guess_format(bytes) {
            Ok(ImageFormat::Jpeg) => StillFormat::Jpeg,
            Ok(ImageFormat::Png) => StillFormat::Png,
            _ => StillFormat::Unknown,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            StillFormat::Jpeg => "image/jpeg",
            StillFormat::Png => "image/png",
            StillFormat::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for StillFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StillFormat::Jpeg => "jpeg",
            StillFormat::Png => "png",
            StillFormat::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Compressed still submitted to detectors. Immutable.
#[derive(Clone)]
pub struct EncodedStill {
    format: StillFormat,
    bytes: Arc<[u8]>,
    dimensions: Option<(u32, u32)>,
}

impl EncodedStill {
    /// Wrap bytes received from outside (API upload, file on disk).
    ///
    /// The format is sniffed; dimensions stay unknown until a detector decodes
    /// the payload.
    pub fn from_upload(bytes: Vec<u8>) -> Self {
        Self {
            format: StillFormat::sniff(&bytes),
            bytes: bytes.into(),
            dimensions: None,
        }
    }

    pub fn format(&self) -> StillFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Pixel dimensions, when the still was produced locally.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Hex SHA-256 of the encoded bytes.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes[..]))
    }

    /// Short label for log lines: format, size and digest prefix.
    pub fn label(&self) -> String {
        let digest = self.digest();
        format!("{} {}B {}", self.format, self.len(), &digest[..12])
    }
}

impl fmt::Debug for EncodedStill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedStill")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StillEncoder {
    quality: u8,
}

impl Default for StillEncoder {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl StillEncoder {
    pub fn new(quality: u8) -> Result<Self, EncodeError> {
        if !(1..=100).contains(&quality) {
            return Err(EncodeError::InvalidQuality(quality));
        }
        Ok(Self { quality })
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode the image as baseline JPEG at the configured quality.
    pub fn encode(&self, image: EnhancedImage) -> Result<EncodedStill, EncodeError> {
        let mut bytes = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, self.quality);
            encoder.encode_image(image.raster())?;
        }
        Ok(EncodedStill {
            format: StillFormat::Jpeg,
            bytes: bytes.into(),
            dimensions: Some((image.width(), image.height())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhance::ImageEnhancer;
    use crate::frame::Frame;

    fn enhanced(width: u32, height: u32) -> EnhancedImage {
        let pixels = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
        ImageEnhancer::new().enhance(Frame::from_rgb(pixels, width, height).unwrap())
    }

    #[test]
    fn encodes_decodable_jpeg() -> anyhow::Result<()> {
        let still = StillEncoder::default().encode(enhanced(16, 8))?;
        assert_eq!(still.format(), StillFormat::Jpeg);
        assert_eq!(still.mime_type(), "image/jpeg");
        assert_eq!(still.dimensions(), Some((16, 8)));
        assert_eq!(StillFormat::sniff(still.bytes()), StillFormat::Jpeg);

        let decoded = image::load_from_memory(still.bytes())?;
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
        Ok(())
    }

    #[test]
    fn encoding_is_deterministic() -> anyhow::Result<()> {
        let encoder = StillEncoder::default();
        let a = encoder.encode(enhanced(8, 8))?;
        let b = encoder.encode(enhanced(8, 8))?;
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
        Ok(())
    }

    #[test]
    fn quality_is_validated() {
        assert!(matches!(
            StillEncoder::new(0),
            Err(EncodeError::InvalidQuality(0))
        ));
        assert!(StillEncoder::new(101).is_err());
        assert_eq!(StillEncoder::default().quality(), 92);
    }

    #[test]
    fn uploads_are_sniffed() {
        let png_magic = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec();
        assert_eq!(EncodedStill::from_upload(png_magic).format(), StillFormat::Png);

        let junk = EncodedStill::from_upload(b"hello".to_vec());
        assert_eq!(junk.format(), StillFormat::Unknown);
        assert_eq!(junk.dimensions(), None);
        assert!(!junk.is_empty());
    }
}
