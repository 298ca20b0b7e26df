use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::detect::backend::Detector;
use crate::detect::result::NativeDetection;
use crate::encode::EncodedStill;
use crate::error::DetectorError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote model reached over HTTP.
///
/// POSTs the still as the raw request body with its MIME type and expects a
/// JSON reply shaped like
/// `{"success": true, "vehicleType": "...", "confidence": 0.9, "vehicleClass": "...", "metadata": {...}}`.
pub struct ModelDetector {
    endpoint: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelReply {
    success: Option<bool>,
    vehicle_type: Option<String>,
    confidence: Option<f64>,
    vehicle_confidence: Option<f64>,
    vehicle_class: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
    message: Option<String>,
}

impl ModelDetector {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(endpoint)
            .with_context(|| format!("invalid model endpoint {}", endpoint))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("model endpoint must be http(s), got {}", endpoint);
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build();
        Ok(Self {
            endpoint: endpoint.to_string(),
            agent,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn parse_reply(&self, body: &str) -> Result<NativeDetection, DetectorError> {
        let reply: ModelReply = serde_json::from_str(body).map_err(|err| {
            DetectorError::Internal(format!("unparseable reply from {}: {}", self.endpoint, err))
        })?;

        if reply.success == Some(false) {
            return Err(DetectorError::Internal(
                reply
                    .message
                    .unwrap_or_else(|| "model reported an unsuccessful detection".to_string()),
            ));
        }
        let vehicle_type = reply
            .vehicle_type
            .ok_or_else(|| DetectorError::Internal("model reply missing vehicleType".to_string()))?;
        let confidence = reply
            .confidence
            .or(reply.vehicle_confidence)
            .ok_or_else(|| DetectorError::Internal("model reply missing confidence".to_string()))?;

        Ok(NativeDetection {
            vehicle_type,
            confidence,
            vehicle_class: reply.vehicle_class,
            metadata: reply.metadata,
        })
    }
}

/// Pull `message` out of an error body when the service sent JSON.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ModelReply>(body)
        .ok()
        .and_then(|reply| reply.message)
        .unwrap_or_else(|| body.chars().take(200).collect())
}

impl Detector for ModelDetector {
    fn name(&self) -> &'static str {
        "http"
    }

    fn run(&mut self, still: &EncodedStill) -> Result<NativeDetection, DetectorError> {
        if still.is_empty() {
            return Err(DetectorError::MalformedInput("empty still".to_string()));
        }

        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", still.mime_type())
            .send_bytes(still.bytes());

        match response {
            Ok(response) => {
                let body = response.into_string().map_err(|err| {
                    DetectorError::Internal(format!("failed to read reply from {}: {}", self.endpoint, err))
                })?;
                self.parse_reply(&body)
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let message = format!("{} returned {}: {}", self.endpoint, code, error_message(&body));
                if (400..500).contains(&code) {
                    Err(DetectorError::MalformedInput(message))
                } else {
                    Err(DetectorError::Internal(message))
                }
            }
            Err(ureq::Error::Transport(err)) => Err(DetectorError::Unavailable(format!(
                "{}: {}",
                self.endpoint, err
            ))),
        }
    }
}
