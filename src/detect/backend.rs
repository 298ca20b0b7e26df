use crate::encode::EncodedStill;
use crate::error::DetectorError;

use super::result::NativeDetection;

/// Vehicle detector capability.
///
/// Implementations classify one encoded still per call. They must treat the
/// still as read-only and keep nothing from it beyond the call.
///
/// Failures are reported as:
/// - `DetectorError::Unavailable` when the model cannot be reached or loaded
/// - `DetectorError::MalformedInput` when the still is rejected
/// - `DetectorError::Internal` for anything else
pub trait Detector: Send {
    /// Detector identifier.
    fn name(&self) -> &'static str;

    /// Classify a still.
    fn run(&mut self, still: &EncodedStill) -> Result<NativeDetection, DetectorError>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<(), DetectorError> {
        Ok(())
    }
}
