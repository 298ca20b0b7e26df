use std::cmp::Ordering;
use std::fmt;

use crate::frame::Frame;

/// Brightness the contrast score is measured against.
pub const MID_GRAY: f64 = 128.0;

/// Contrast score of one frame. Higher is more usable.
///
/// Always a finite, non-negative sum, so the ordering is total.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameScore(f64);

impl FrameScore {
    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialOrd for FrameScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.0.total_cmp(&other.0))
    }
}

impl fmt::Display for FrameScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// Cheap sharpness proxy: how far each pixel's brightness sits from mid-gray.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameScorer;

impl FrameScorer {
    /// Sum over all pixels of `|(r + g + b) / 3 - 128|`.
    pub fn score(&self, frame: &Frame) -> FrameScore {
        let total = frame
            .rgb_pixels()
            .map(|[r, g, b]| {
                let brightness = (r as f64 + g as f64 + b as f64) / 3.0;
                (brightness - MID_GRAY).abs()
            })
            .sum();
        FrameScore(total)
    }
}
