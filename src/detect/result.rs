use serde::Serialize;
use serde_json::{Map, Value};

/// Which detector produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Primary,
    Fallback,
}

/// Result as reported by a single detector, before normalization.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NativeDetection {
    pub vehicle_type: String,
    pub confidence: f64,
    pub vehicle_class: Option<String>,
    pub metadata: Map<String, Value>,
}

impl NativeDetection {
    pub fn new(vehicle_type: impl Into<String>, confidence: f64) -> Self {
        Self {
            vehicle_type: vehicle_type.into(),
            confidence,
            ..Self::default()
        }
    }

    pub fn with_class(mut self, vehicle_class: impl Into<String>) -> Self {
        self.vehicle_class = Some(vehicle_class.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Normalized detection result.
///
/// Same field set whichever detector answered; read it without looking at
/// `source`. Serialized with the camelCase keys the surrounding application
/// expects (`vehicleType`, `vehicleClass`).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    vehicle_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vehicle_class: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
    source: DetectionSource,
}

impl DetectionResult {
    /// Wrap a detector's native answer. Confidence is clamped into [0, 1].
    pub fn normalize(native: NativeDetection, source: DetectionSource) -> Self {
        let confidence = if native.confidence.is_finite() {
            native.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            success: true,
            vehicle_type: Some(native.vehicle_type),
            confidence: Some(confidence),
            vehicle_class: native.vehicle_class,
            metadata: native.metadata,
            source,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn vehicle_type(&self) -> Option<&str> {
        self.vehicle_type.as_deref()
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn vehicle_class(&self) -> Option<&str> {
        self.vehicle_class.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn source(&self) -> DetectionSource {
        self.source
    }
}
