//! Deterministic still enhancement.
//!
//! Every output pixel depends only on the matching input pixel: ITU-R 601
//! luma, a fixed contrast stretch around mid-gray, then a sharpening boost
//! proportional to how far the stretch moved the value. The result is
//! achromatic (R = G = B).

use image::{Rgb, RgbImage};

use crate::frame::Frame;

/// Contrast constant `C` of the stretch.
pub const CONTRAST: f32 = 1.5;
/// Sharpening constant `S`.
pub const SHARPNESS: f32 = 0.5;

const PIVOT: f32 = 128.0;

/// Grayscale-with-contrast raster derived from exactly one frame.
#[derive(Debug)]
pub struct EnhancedImage {
    raster: RgbImage,
}

impl EnhancedImage {
    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    /// Luminance value of the pixel at (x, y).
    pub fn value_at(&self, x: u32, y: u32) -> Option<u8> {
        if x < self.width() && y < self.height() {
            Some(self.raster.get_pixel(x, y)[0])
        } else {
            None
        }
    }

    pub fn raster(&self) -> &RgbImage {
        &self.raster
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageEnhancer {
    factor: f32,
}

impl Default for ImageEnhancer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageEnhancer {
    pub fn new() -> Self {
        Self {
            factor: (259.0 * (CONTRAST + 255.0)) / (255.0 * (259.0 - CONTRAST)),
        }
    }

    /// Contrast factor derived from `CONTRAST`.
    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// Enhanced value of one pixel before rounding to 8 bits.
    pub fn enhance_value(&self, r: u8, g: u8, b: u8) -> f32 {
        let gray = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        let enhanced = self.factor * (gray - PIVOT) + PIVOT;
        (enhanced + (enhanced - gray) * SHARPNESS).clamp(0.0, 255.0)
    }

    /// Consume a frame and produce its enhanced raster.
    pub fn enhance(&self, frame: Frame) -> EnhancedImage {
        let channels = frame.channels as usize;
        let row = frame.width as usize;
        let data = frame.data();
        let raster = RgbImage::from_fn(frame.width, frame.height, |x, y| {
            let offset = (y as usize * row + x as usize) * channels;
            let value = self
                .enhance_value(data[offset], data[offset + 1], data[offset + 2])
                .round() as u8;
            Rgb([value, value, value])
        });
        EnhancedImage { raster }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(r: u8, g: u8, b: u8) -> Frame {
        Frame::from_rgb(vec![r, g, b], 1, 1).unwrap()
    }

    #[test]
    fn mid_gray_is_a_fixed_point() {
        let enhancer = ImageEnhancer::new();
        assert!((enhancer.enhance_value(128, 128, 128) - 128.0).abs() < 1e-3);
        assert_eq!(enhancer.enhance(single(128, 128, 128)).value_at(0, 0), Some(128));
    }

    #[test]
    fn white_clamps_at_255() {
        let enhancer = ImageEnhancer::new();
        let gray = 255.0_f32;
        let enhanced = enhancer.factor() * (gray - 128.0) + 128.0;
        assert!(enhanced + (enhanced - gray) * SHARPNESS > 255.0);
        assert_eq!(enhancer.enhance_value(255, 255, 255), 255.0);
        assert_eq!(enhancer.enhance(single(255, 255, 255)).value_at(0, 0), Some(255));
    }

    #[test]
    fn black_clamps_at_zero() {
        let enhancer = ImageEnhancer::new();
        assert_eq!(enhancer.enhance_value(0, 0, 0), 0.0);
        assert_eq!(enhancer.enhance(single(0, 0, 0)).value_at(0, 0), Some(0));
    }

    #[test]
    fn colored_pixel_matches_formula() {
        let enhancer = ImageEnhancer::new();
        let gray = 0.299 * 200.0 + 0.587 * 50.0 + 0.114 * 50.0;
        let factor = (259.0 * 256.5) / (255.0 * 257.5);
        let enhanced = factor * (gray - 128.0) + 128.0;
        let expected = enhanced + (enhanced - gray) * 0.5;

        let value = enhancer.enhance_value(200, 50, 50);
        assert!((value as f64 - expected).abs() < 1e-3, "{} vs {}", value, expected);

        let image = enhancer.enhance(single(200, 50, 50));
        let px = image.raster().get_pixel(0, 0);
        assert_eq!(px.0, [94, 94, 94]);
    }

    #[test]
    fn reapplying_is_not_identity() {
        let enhancer = ImageEnhancer::new();
        let once = enhancer.enhance(single(200, 50, 50));
        let v = once.value_at(0, 0).unwrap();
        let twice = enhancer.enhance(single(v, v, v));
        assert_eq!(twice.value_at(0, 0), Some(93));
    }

    #[test]
    fn output_keeps_dimensions_and_drops_alpha() -> anyhow::Result<()> {
        let frame = Frame::new(vec![10, 20, 30, 0, 40, 50, 60, 255], 2, 1, 4)?;
        let image = ImageEnhancer::new().enhance(frame);
        assert_eq!((image.width(), image.height()), (2, 1));
        assert_eq!(image.raster().as_raw().len(), 6);
        for px in image.raster().pixels() {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
        }
        Ok(())
    }
}
