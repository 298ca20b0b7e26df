use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::detect::backend::Detector;
use crate::detect::result::NativeDetection;
use crate::encode::EncodedStill;
use crate::error::DetectorError;

/// Shared invocation counter, readable after the detector has been moved
/// into an orchestrator.
#[derive(Clone, Debug, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted detector for tests and demos.
pub struct StubDetector {
    name: &'static str,
    outcome: Result<NativeDetection, DetectorError>,
    calls: CallCounter,
    delay: Option<Duration>,
    journal: Option<Arc<Mutex<Vec<&'static str>>>>,
}

impl StubDetector {
    /// Always answers with the given classification.
    pub fn succeeding(vehicle_type: &str, confidence: f64) -> Self {
        Self::with_outcome(Ok(NativeDetection::new(vehicle_type, confidence)))
    }

    /// Always fails with `err`.
    pub fn failing(err: DetectorError) -> Self {
        Self::with_outcome(Err(err))
    }

    fn with_outcome(outcome: Result<NativeDetection, DetectorError>) -> Self {
        Self {
            name: "stub",
            outcome,
            calls: CallCounter::default(),
            delay: None,
            journal: None,
        }
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Append this detector's name to `journal` on every call.
    pub fn with_journal(mut self, journal: Arc<Mutex<Vec<&'static str>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&mut self, still: &EncodedStill) -> Result<NativeDetection, DetectorError> {
        self.calls.bump();
        if let Some(journal) = &self.journal {
            if let Ok(mut entries) = journal.lock() {
                entries.push(self.name);
            }
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        let native = self.outcome.clone()?;
        let digest = still.digest();
        Ok(native.with_metadata("stillDigest", &digest[..16]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_calls_and_tags_digest() -> anyhow::Result<()> {
        let mut detector = StubDetector::succeeding("4-wheeler", 0.9);
        let calls = detector.calls();
        let still = EncodedStill::from_upload(b"frame1".to_vec());

        let native = detector.run(&still)?;
        assert_eq!(native.vehicle_type, "4-wheeler");
        assert_eq!(native.metadata["stillDigest"], &still.digest()[..16]);

        assert!(StubDetector::failing(DetectorError::Internal("x".into()))
            .run(&still)
            .is_err());
        detector.run(&still)?;
        assert_eq!(calls.get(), 2);
        Ok(())
    }
}
