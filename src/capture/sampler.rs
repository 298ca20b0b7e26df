use std::thread;
use std::time::Duration;

use crate::error::CaptureError;
use crate::frame::Frame;
use crate::ingest::FrameSource;

use super::scorer::{FrameScore, FrameScorer};

/// Number of candidate frames read per capture.
pub const DEFAULT_CANDIDATES: usize = 3;
/// Pause between candidates so the source can advance to a new frame.
pub const DEFAULT_CANDIDATE_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamplerConfig {
    pub candidates: usize,
    pub delay: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES,
            delay: DEFAULT_CANDIDATE_DELAY,
        }
    }
}

/// Best-of-N frame selection.
///
/// The sampler is the only reader of the source for the duration of a
/// capture. It adds no timeout of its own: a source that blocks in
/// `wait_until_ready` blocks the capture.
#[derive(Clone, Debug, Default)]
pub struct FrameSampler {
    config: SamplerConfig,
    scorer: FrameScorer,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            scorer: FrameScorer,
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Read `candidates` frames and return the highest scoring one.
    ///
    /// Ties keep the earlier frame. A read failure aborts the capture.
    pub fn capture_best(&self, source: &mut dyn FrameSource) -> Result<Frame, CaptureError> {
        if !source.is_ready() {
            log::debug!("FrameSampler: waiting for {} to become ready", source.name());
            source.wait_until_ready()?;
        }

        let mut best: Option<(Frame, FrameScore)> = None;
        for index in 0..self.config.candidates {
            if index > 0 && !self.config.delay.is_zero() {
                thread::sleep(self.config.delay);
            }

            let frame = source.read_frame()?;
            let score = self.scorer.score(&frame);
            log::debug!(
                "FrameSampler: candidate {}/{} from {} scored {}",
                index + 1,
                self.config.candidates,
                source.name(),
                score
            );

            let better = best.as_ref().map_or(true, |(_, kept)| score > *kept);
            if better {
                best = Some((frame, score));
            }
        }

        match best {
            Some((frame, score)) => {
                log::info!(
                    "FrameSampler: selected {}x{} frame from {} (score {})",
                    frame.width,
                    frame.height,
                    source.name(),
                    score
                );
                Ok(frame)
            }
            None => Err(CaptureError::NoFrameAvailable(format!(
                "{} (sampler configured for zero candidates)",
                source.name()
            ))),
        }
    }
}
