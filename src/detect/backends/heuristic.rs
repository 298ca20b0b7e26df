use serde_json::json;

use crate::detect::backend::Detector;
use crate::detect::result::NativeDetection;
use crate::encode::{EncodedStill, StillFormat};
use crate::error::DetectorError;

/// Luma difference from the background that counts as foreground.
const DEFAULT_FOREGROUND_THRESHOLD: u8 = 40;
/// Smallest share of the image the silhouette must cover.
const DEFAULT_MIN_FOREGROUND: f64 = 0.005;

/// Silhouette classifier used when the model is unavailable.
///
/// Estimates the background from the image border, boxes every pixel that
/// differs from it and classifies by the box's aspect ratio: narrow
/// silhouettes are two-wheelers, wide ones four-wheelers. Confidence grows
/// with how far the ratio is from square, within [0.5, 0.95].
pub struct HeuristicDetector {
    threshold: u8,
    min_foreground: f64,
}

impl HeuristicDetector {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_FOREGROUND_THRESHOLD,
            min_foreground: DEFAULT_MIN_FOREGROUND,
        }
    }
}

impl Default for HeuristicDetector {
    fn default() -> Self {
        Self::new()
    }
}

struct Silhouette {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    coverage: f64,
}

impl HeuristicDetector {
    fn silhouette(&self, luma: &image::GrayImage) -> Option<Silhouette> {
        let (width, height) = luma.dimensions();
        let background = border_mean(luma);

        let mut count = 0u64;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for (x, y, px) in luma.enumerate_pixels() {
            if (px[0] as f64 - background).abs() > self.threshold as f64 {
                count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        let coverage = count as f64 / (width as f64 * height as f64);
        if count == 0 || coverage < self.min_foreground {
            return None;
        }
        Some(Silhouette {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
            coverage,
        })
    }
}

fn border_mean(luma: &image::GrayImage) -> f64 {
    let (width, height) = luma.dimensions();
    let mut sum = 0u64;
    let mut count = 0u64;
    for (x, y, px) in luma.enumerate_pixels() {
        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
            sum += px[0] as u64;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

impl Detector for HeuristicDetector {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn run(&mut self, still: &EncodedStill) -> Result<NativeDetection, DetectorError> {
        if still.format() == StillFormat::Unknown {
            return Err(DetectorError::MalformedInput(format!(
                "unsupported image format ({} bytes)",
                still.len()
            )));
        }
        let decoded = image::load_from_memory(still.bytes())
            .map_err(|err| DetectorError::MalformedInput(format!("cannot decode still: {}", err)))?;
        let luma = decoded.to_luma8();

        let shape = self.silhouette(&luma).ok_or_else(|| {
            DetectorError::Internal("no foreground silhouette found".to_string())
        })?;

        let aspect = shape.width as f64 / shape.height as f64;
        let (vehicle_type, vehicle_class) = if aspect < 1.0 {
            ("2-wheeler", "motorcycle")
        } else {
            ("4-wheeler", "car")
        };
        let confidence = 0.5 + aspect.ln().abs().min(0.9) / 2.0;

        log::debug!(
            "HeuristicDetector: box {}x{} at ({}, {}), aspect {:.2}, coverage {:.3}",
            shape.width,
            shape.height,
            shape.x,
            shape.y,
            aspect,
            shape.coverage
        );

        Ok(NativeDetection::new(vehicle_type, confidence)
            .with_class(vehicle_class)
            .with_metadata("method", "silhouette")
            .with_metadata("aspectRatio", (aspect * 1000.0).round() / 1000.0)
            .with_metadata("foregroundRatio", (shape.coverage * 1000.0).round() / 1000.0)
            .with_metadata(
                "box",
                json!({
                    "x": shape.x,
                    "y": shape.y,
                    "width": shape.width,
                    "height": shape.height,
                }),
            )
            .with_metadata("imageWidth", luma.width())
            .with_metadata("imageHeight", luma.height()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::jpeg_with_box;

    fn classify(bytes: Vec<u8>) -> Result<NativeDetection, DetectorError> {
        HeuristicDetector::new().run(&EncodedStill::from_upload(bytes))
    }

    #[test]
    fn wide_silhouette_is_four_wheeler() -> anyhow::Result<()> {
        let native = classify(jpeg_with_box(96, 64, (16, 24, 64, 20)))?;
        assert_eq!(native.vehicle_type, "4-wheeler");
        assert_eq!(native.vehicle_class.as_deref(), Some("car"));
        assert!(native.confidence > 0.8 && native.confidence <= 0.95);
        assert_eq!(native.metadata["method"], "silhouette");
        Ok(())
    }

    #[test]
    fn tall_silhouette_is_two_wheeler() -> anyhow::Result<()> {
        let native = classify(jpeg_with_box(96, 64, (40, 8, 16, 48)))?;
        assert_eq!(native.vehicle_type, "2-wheeler");
        assert_eq!(native.vehicle_class.as_deref(), Some("motorcycle"));
        assert!((0.5..=0.95).contains(&native.confidence));
        Ok(())
    }

    #[test]
    fn blank_image_has_no_foreground() {
        let err = classify(jpeg_with_box(32, 32, (0, 0, 0, 0))).unwrap_err();
        assert!(matches!(err, DetectorError::Internal(_)));
    }

    #[test]
    fn garbage_is_malformed_input() {
        assert!(matches!(
            classify(b"definitely not an image".to_vec()),
            Err(DetectorError::MalformedInput(_))
        ));
        // valid magic, truncated body
        assert!(matches!(
            classify(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00]),
            Err(DetectorError::MalformedInput(_))
        ));
    }
}
