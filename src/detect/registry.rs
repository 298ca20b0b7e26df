use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::config::{DetectionSettings, DetectorKind};

use super::backend::Detector;
use super::backends::{HeuristicDetector, ModelDetector, StubDetector};
use super::orchestrator::{DetectionOrchestrator, DetectorHandle};

/// Named detectors, selected by configuration.
///
/// Handles are shared: asking for the same name twice returns the same
/// detector instance. An orchestrator always pairs two distinct detectors.
pub struct DetectorRegistry {
    detectors: HashMap<String, DetectorHandle>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: HashMap::new(),
        }
    }

    /// Register a detector under its own name, replacing any previous one.
    pub fn register<D: Detector + 'static>(&mut self, detector: D) -> DetectorHandle {
        let handle = DetectorHandle::new(detector);
        self.detectors
            .insert(handle.name().to_string(), handle.clone());
        handle
    }

    pub fn get(&self, name: &str) -> Option<DetectorHandle> {
        self.detectors.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.detectors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the primary/fallback pair from registered detectors.
    pub fn orchestrator(&self, primary: &str, fallback: &str) -> Result<DetectionOrchestrator> {
        if primary == fallback {
            return Err(anyhow!(
                "primary and fallback must be different detectors, both are '{}'",
                primary
            ));
        }
        let primary = self
            .get(primary)
            .ok_or_else(|| anyhow!("primary detector '{}' not registered", primary))?;
        let fallback = self
            .get(fallback)
            .ok_or_else(|| anyhow!("fallback detector '{}' not registered", fallback))?;
        Ok(DetectionOrchestrator::new(primary, fallback))
    }

    /// Register the detectors named by `settings`.
    pub fn from_settings(settings: &DetectionSettings) -> Result<Self> {
        if settings.primary == settings.fallback {
            return Err(anyhow!(
                "detection.primary and detection.fallback must differ, both are '{}'",
                settings.primary
            ));
        }
        let mut registry = Self::new();
        registry.register_kind(settings.primary, settings)?;
        registry.register_kind(settings.fallback, settings)?;
        Ok(registry)
    }

    /// Orchestrator for the configured primary and fallback.
    pub fn build_orchestrator(settings: &DetectionSettings) -> Result<DetectionOrchestrator> {
        let registry = Self::from_settings(settings)?;
        log::info!(
            "detect: primary '{}', fallback '{}', budget {:?}",
            settings.primary,
            settings.fallback,
            settings.timeout
        );
        Ok(registry
            .orchestrator(&settings.primary.to_string(), &settings.fallback.to_string())?
            .with_budget(settings.timeout))
    }

    fn register_kind(&mut self, kind: DetectorKind, settings: &DetectionSettings) -> Result<()> {
        match kind {
            DetectorKind::Http => {
                self.register(ModelDetector::new(&settings.model_url, settings.timeout)?);
            }
            DetectorKind::Heuristic => {
                self.register(HeuristicDetector::new());
            }
            DetectorKind::Stub => {
                self.register(StubDetector::succeeding("4-wheeler", 0.5));
            }
            DetectorKind::Tract => self.register_tract(settings)?,
        }
        Ok(())
    }

    #[cfg(feature = "backend-tract")]
    fn register_tract(&mut self, settings: &DetectionSettings) -> Result<()> {
        let path = settings
            .onnx_model
            .as_ref()
            .ok_or_else(|| anyhow!("tract detector requires an ONNX model path"))?;
        let mut detector = super::backends::OnnxDetector::new(path, settings.onnx_input_size)?;
        if let Some(labels) = &settings.onnx_labels {
            detector = detector.with_labels(labels.clone());
        }
        detector
            .warm_up()
            .map_err(|err| anyhow!("tract warm-up failed: {}", err))?;
        self.register(detector);
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    fn register_tract(&mut self, _settings: &DetectionSettings) -> Result<()> {
        Err(anyhow!("the tract detector requires the backend-tract feature"))
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
