//! Vehicle detection.
//!
//! - `Detector`: capability implemented by every detector variant.
//! - `DetectionOrchestrator`: primary detector, then a single fallback hop.
//! - `DetectorRegistry`: selects variants by configured name.

mod backend;
mod backends;
mod orchestrator;
mod registry;
mod result;

pub use backend::Detector;
#[cfg(feature = "backend-tract")]
pub use backends::OnnxDetector;
pub use backends::{CallCounter, HeuristicDetector, ModelDetector, StubDetector};
pub use orchestrator::{DetectionOrchestrator, DetectorHandle, DEFAULT_DETECT_TIMEOUT};
pub use registry::DetectorRegistry;
pub use result::{DetectionResult, DetectionSource, NativeDetection};
