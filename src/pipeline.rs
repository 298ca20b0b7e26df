//! Capture-and-detect request.
//!
//! ```text
//! SharedSource -> FrameSampler -> ImageEnhancer -> StillEncoder -> DetectionOrchestrator
//! ```
//!
//! Stages run strictly in order on the caller's thread. The source is held
//! only while the sampler reads from it; enhancement and detection run after
//! it has been released.

use anyhow::Result;

use crate::capture::FrameSampler;
use crate::config::PipelineConfig;
use crate::detect::{DetectionOrchestrator, DetectionResult, DetectorRegistry};
use crate::encode::{EncodedStill, StillEncoder};
use crate::enhance::ImageEnhancer;
use crate::error::{DetectionFailed, PipelineError};
use crate::ingest::SharedSource;

#[derive(Clone)]
pub struct CapturePipeline {
    sampler: FrameSampler,
    enhancer: ImageEnhancer,
    encoder: StillEncoder,
    orchestrator: DetectionOrchestrator,
}

impl CapturePipeline {
    pub fn new(
        sampler: FrameSampler,
        encoder: StillEncoder,
        orchestrator: DetectionOrchestrator,
    ) -> Self {
        Self {
            sampler,
            enhancer: ImageEnhancer::new(),
            encoder,
            orchestrator,
        }
    }

    /// Build every stage from configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let sampler = FrameSampler::new(config.sampler.clone());
        let encoder = StillEncoder::new(config.jpeg_quality)?;
        let orchestrator = DetectorRegistry::build_orchestrator(&config.detection)?;
        Ok(Self::new(sampler, encoder, orchestrator))
    }

    pub fn orchestrator(&self) -> &DetectionOrchestrator {
        &self.orchestrator
    }

    /// Sample, enhance and encode one still.
    ///
    /// Fails with `CaptureError::SourceBusy` when another capture holds the
    /// source.
    pub fn capture_still(&self, source: &SharedSource) -> Result<EncodedStill, PipelineError> {
        let frame = {
            let mut lease = source.acquire()?;
            self.sampler.capture_best(lease.source())?
        };
        let enhanced = self.enhancer.enhance(frame);
        let still = self.encoder.encode(enhanced)?;
        log::info!("pipeline: encoded {} from {}", still.label(), source.name());
        Ok(still)
    }

    /// Classify an already encoded still.
    pub fn detect_still(&self, still: &EncodedStill) -> Result<DetectionResult, DetectionFailed> {
        self.orchestrator.detect(still)
    }

    /// One full request: exactly one still, then exactly one result or error.
    pub fn capture_and_detect(&self, source: &SharedSource) -> Result<DetectionResult, PipelineError> {
        let still = self.capture_still(source)?;
        Ok(self.detect_still(&still)?)
    }
}
