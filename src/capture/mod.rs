//! Capture-quality stage: best-of-N frame selection.
//!
//! `FrameSampler` reads a short burst from a `FrameSource`, spaced by a fixed
//! delay, and keeps the frame `FrameScorer` rates highest.

mod sampler;
mod scorer;

pub use sampler::{FrameSampler, SamplerConfig, DEFAULT_CANDIDATES, DEFAULT_CANDIDATE_DELAY};
pub use scorer::{FrameScore, FrameScorer, MID_GRAY};
