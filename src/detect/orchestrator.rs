//! Primary/fallback detection.
//!
//! ```text
//! Start --run primary--> ok  --> Done(source = primary)
//!                    \-> err --> Fallback
//! Fallback --run fallback--> ok  --> Done(source = fallback)
//!                        \-> err --> DetectionFailed { primary, fallback }
//! ```
//!
//! Neither detector is retried. Each call is bounded by a budget that starts
//! once the detector is free; a detector that overruns it is reported as
//! `DetectorError::Timeout`.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::encode::EncodedStill;
use crate::error::{DetectionFailed, DetectorError};

use super::backend::Detector;
use super::result::{DetectionResult, DetectionSource, NativeDetection};

/// Budget for one detector call.
pub const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Calls that may be queued or running on one detector at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Shared handle to a detector.
///
/// Detectors take `&mut self`, so calls through the same handle queue on the
/// mutex. The budget of a call starts once it holds the detector, so time
/// spent queued behind another request is not charged to it. Queueing is
/// itself bounded by the budget, and at most `max_in_flight` workers exist
/// per handle; further calls are rejected as `Unavailable`.
#[derive(Clone)]
pub struct DetectorHandle {
    name: &'static str,
    inner: Arc<Mutex<dyn Detector>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

enum WorkerEvent {
    /// The worker holds the detector and is about to run it.
    Started,
    Finished(Result<NativeDetection, DetectorError>),
}

/// Releases one in-flight slot when the worker exits.
struct InFlightSlot(Arc<AtomicUsize>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DetectorHandle {
    pub fn new<D: Detector + 'static>(detector: D) -> Self {
        Self {
            name: detector.name(),
            inner: Arc::new(Mutex::new(detector)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Cap on queued plus running workers.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn reserve_slot(&self) -> Result<InFlightSlot, DetectorError> {
        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        let slot = InFlightSlot(Arc::clone(&self.in_flight));
        if previous >= self.max_in_flight {
            return Err(DetectorError::Unavailable(format!(
                "{} already has {} calls in flight",
                self.name, previous
            )));
        }
        Ok(slot)
    }

    /// Run the detector on a worker thread: wait at most `budget` for the
    /// detector to become free, then at most `budget` for its answer.
    ///
    /// On timeout the worker is abandoned; it finishes in the background and
    /// its answer is dropped. A worker whose caller gave up while it was
    /// queued never runs the detector.
    pub fn run_bounded(
        &self,
        still: &EncodedStill,
        budget: Duration,
    ) -> Result<NativeDetection, DetectorError> {
        let slot = self.reserve_slot()?;
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let still = still.clone();
        let name = self.name;

        thread::Builder::new()
            .name(format!("detect-{}", name))
            .spawn(move || {
                let _slot = slot;
                let mut detector = match inner.lock() {
                    Ok(detector) => detector,
                    Err(_) => {
                        let _ = tx.send(WorkerEvent::Finished(Err(DetectorError::Internal(
                            format!("{} detector lock poisoned", name),
                        ))));
                        return;
                    }
                };
                if tx.send(WorkerEvent::Started).is_err() {
                    log::debug!("detect: caller of '{}' left while queued", name);
                    return;
                }
                let outcome = detector.run(&still);
                // The receiver is gone when the caller already timed out.
                let _ = tx.send(WorkerEvent::Finished(outcome));
            })
            .map_err(|err| {
                DetectorError::Internal(format!("failed to spawn {} worker: {}", name, err))
            })?;

        match rx.recv_timeout(budget) {
            Ok(WorkerEvent::Started) => {}
            Ok(WorkerEvent::Finished(outcome)) => return outcome,
            Err(RecvTimeoutError::Timeout) => {
                return Err(DetectorError::Unavailable(format!(
                    "{} stayed busy with other requests for {:?}",
                    name, budget
                )))
            }
            Err(RecvTimeoutError::Disconnected) => return Err(worker_vanished(name)),
        }

        match rx.recv_timeout(budget) {
            Ok(WorkerEvent::Finished(outcome)) => outcome,
            Ok(WorkerEvent::Started) => Err(DetectorError::Internal(format!(
                "{} worker started twice",
                name
            ))),
            Err(RecvTimeoutError::Timeout) => Err(DetectorError::Timeout(budget)),
            Err(RecvTimeoutError::Disconnected) => Err(worker_vanished(name)),
        }
    }
}

fn worker_vanished(name: &str) -> DetectorError {
    DetectorError::Internal(format!("{} worker exited without an answer", name))
}

/// Two-tier detection: primary, then one fallback hop.
#[derive(Clone)]
pub struct DetectionOrchestrator {
    primary: DetectorHandle,
    fallback: DetectorHandle,
    budget: Duration,
}

impl DetectionOrchestrator {
    pub fn new(primary: DetectorHandle, fallback: DetectorHandle) -> Self {
        Self {
            primary,
            fallback,
            budget: DEFAULT_DETECT_TIMEOUT,
        }
    }

    /// Override the per-detector budget.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn primary_name(&self) -> &'static str {
        self.primary.name()
    }

    pub fn fallback_name(&self) -> &'static str {
        self.fallback.name()
    }

    /// Classify a still. Produces exactly one result or one error.
    pub fn detect(&self, still: &EncodedStill) -> Result<DetectionResult, DetectionFailed> {
        log::info!(
            "detect: submitting {} to primary '{}'",
            still.label(),
            self.primary.name()
        );

        let primary_err = match self.primary.run_bounded(still, self.budget) {
            Ok(native) => {
                log::info!(
                    "detect: primary '{}' classified {} as {}",
                    self.primary.name(),
                    still.label(),
                    native.vehicle_type
                );
                return Ok(DetectionResult::normalize(native, DetectionSource::Primary));
            }
            Err(err) => err,
        };

        log::warn!(
            "detect: primary '{}' failed ({}); falling back to '{}'",
            self.primary.name(),
            primary_err,
            self.fallback.name()
        );

        match self.fallback.run_bounded(still, self.budget) {
            Ok(native) => {
                log::info!(
                    "detect: fallback '{}' classified {} as {}",
                    self.fallback.name(),
                    still.label(),
                    native.vehicle_type
                );
                Ok(DetectionResult::normalize(native, DetectionSource::Fallback))
            }
            Err(fallback_err) => {
                let failed = DetectionFailed {
                    primary: primary_err,
                    fallback: fallback_err,
                };
                log::error!("detect: {}", failed);
                Err(failed)
            }
        }
    }
}
