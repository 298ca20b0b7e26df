use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::capture::{SamplerConfig, DEFAULT_CANDIDATES, DEFAULT_CANDIDATE_DELAY};
use crate::detect::DEFAULT_DETECT_TIMEOUT;
use crate::encode::DEFAULT_JPEG_QUALITY;
use crate::ingest::CctvEndpoint;

const DEFAULT_SOURCE_URL: &str = "stub://gate";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MODEL_URL: &str = "http://127.0.0.1:5001/detect";
const DEFAULT_ONNX_INPUT_SIZE: u32 = 224;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8790";
/// Largest accepted upload.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    source: Option<SourceConfigFile>,
    sampler: Option<SamplerConfigFile>,
    encoder: Option<EncoderConfigFile>,
    detection: Option<DetectionConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    kind: Option<String>,
    url: Option<String>,
    cctv: Option<CctvEndpoint>,
    width: Option<u32>,
    height: Option<u32>,
    connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SamplerConfigFile {
    candidates: Option<usize>,
    delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EncoderConfigFile {
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    primary: Option<String>,
    fallback: Option<String>,
    model_url: Option<String>,
    onnx_model: Option<PathBuf>,
    onnx_input_size: Option<u32>,
    onnx_labels: Option<Vec<String>>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
}

/// Which `FrameSource` variant to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Stub,
    Stream,
    Camera,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(SourceKind::Stub),
            "stream" => Ok(SourceKind::Stream),
            "camera" => Ok(SourceKind::Camera),
            other => Err(anyhow!(
                "unknown source kind '{}' (expected stub, stream or camera)",
                other
            )),
        }
    }
}

/// Which `Detector` variant to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    Http,
    Tract,
    Heuristic,
    Stub,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(DetectorKind::Http),
            "tract" => Ok(DetectorKind::Tract),
            "heuristic" => Ok(DetectorKind::Heuristic),
            "stub" => Ok(DetectorKind::Stub),
            other => Err(anyhow!(
                "unknown detector '{}' (expected http, tract, heuristic or stub)",
                other
            )),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectorKind::Http => "http",
            DetectorKind::Tract => "tract",
            DetectorKind::Heuristic => "heuristic",
            DetectorKind::Stub => "stub",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source: SourceSettings,
    pub sampler: SamplerConfig,
    pub jpeg_quality: u8,
    pub detection: DetectionSettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Stream URL, stub name or camera device path, depending on `kind`.
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub primary: DetectorKind,
    pub fallback: DetectorKind,
    pub model_url: String,
    pub onnx_model: Option<PathBuf>,
    pub onnx_input_size: u32,
    /// Class labels in model output order; `None` keeps the built-in pair.
    pub onnx_labels: Option<Vec<String>>,
    /// Budget for each detector call.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub max_body_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceSettings {
                kind: SourceKind::Stub,
                url: DEFAULT_SOURCE_URL.to_string(),
                width: DEFAULT_SOURCE_WIDTH,
                height: DEFAULT_SOURCE_HEIGHT,
                connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            },
            sampler: SamplerConfig {
                candidates: DEFAULT_CANDIDATES,
                delay: DEFAULT_CANDIDATE_DELAY,
            },
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            detection: DetectionSettings {
                primary: DetectorKind::Http,
                fallback: DetectorKind::Heuristic,
                model_url: DEFAULT_MODEL_URL.to_string(),
                onnx_model: None,
                onnx_input_size: DEFAULT_ONNX_INPUT_SIZE,
                onnx_labels: None,
                timeout: DEFAULT_DETECT_TIMEOUT,
            },
            api: ApiSettings {
                addr: DEFAULT_API_ADDR.to_string(),
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            },
        }
    }
}

impl PipelineConfig {
    /// Load from the file named by `CAPTURE_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTURE_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PipelineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(source) = file.source {
            let kind_given = source.kind.is_some();
            if let Some(kind) = source.kind {
                cfg.source.kind = kind.parse()?;
            }
            match (source.url, source.cctv) {
                (Some(_), Some(_)) => {
                    return Err(anyhow!("source.url and source.cctv are mutually exclusive"))
                }
                (Some(url), None) => cfg.source.url = url,
                (None, Some(cctv)) => {
                    cfg.source.url = cctv.to_url()?;
                    if !kind_given {
                        cfg.source.kind = SourceKind::Stream;
                    }
                }
                (None, None) => {}
            }
            cfg.source.width = source.width.unwrap_or(cfg.source.width);
            cfg.source.height = source.height.unwrap_or(cfg.source.height);
            if let Some(secs) = source.connect_timeout_secs {
                cfg.source.connect_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(sampler) = file.sampler {
            cfg.sampler.candidates = sampler.candidates.unwrap_or(cfg.sampler.candidates);
            if let Some(ms) = sampler.delay_ms {
                cfg.sampler.delay = Duration::from_millis(ms);
            }
        }

        if let Some(quality) = file.encoder.and_then(|encoder| encoder.jpeg_quality) {
            cfg.jpeg_quality = quality;
        }

        if let Some(detection) = file.detection {
            if let Some(primary) = detection.primary {
                cfg.detection.primary = primary.parse()?;
            }
            if let Some(fallback) = detection.fallback {
                cfg.detection.fallback = fallback.parse()?;
            }
            if let Some(url) = detection.model_url {
                cfg.detection.model_url = url;
            }
            cfg.detection.onnx_model = detection.onnx_model;
            cfg.detection.onnx_input_size = detection
                .onnx_input_size
                .unwrap_or(cfg.detection.onnx_input_size);
            cfg.detection.onnx_labels = detection.onnx_labels;
            if let Some(secs) = detection.timeout_secs {
                cfg.detection.timeout = Duration::from_secs(secs);
            }
        }

        if let Some(api) = file.api {
            cfg.api.addr = api.addr.unwrap_or(cfg.api.addr);
            cfg.api.max_body_bytes = api.max_body_bytes.unwrap_or(cfg.api.max_body_bytes);
        }

        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(kind) = env_value("CAPTURE_SOURCE_KIND") {
            self.source.kind = kind.parse().context("CAPTURE_SOURCE_KIND")?;
        }
        if let Some(url) = env_value("CAPTURE_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(primary) = env_value("CAPTURE_PRIMARY") {
            self.detection.primary = primary.parse().context("CAPTURE_PRIMARY")?;
        }
        if let Some(url) = env_value("CAPTURE_PRIMARY_URL") {
            self.detection.model_url = url;
        }
        if let Some(fallback) = env_value("CAPTURE_FALLBACK") {
            self.detection.fallback = fallback.parse().context("CAPTURE_FALLBACK")?;
        }
        if let Some(timeout) = env_value("CAPTURE_DETECT_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("CAPTURE_DETECT_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.detection.timeout = Duration::from_secs(seconds);
        }
        if let Some(addr) = env_value("CAPTURE_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(quality) = env_value("CAPTURE_JPEG_QUALITY") {
            self.jpeg_quality = quality
                .parse()
                .map_err(|_| anyhow!("CAPTURE_JPEG_QUALITY must be an integer in 1..=100"))?;
        }
        if let Some(limit) = env_value("CAPTURE_MAX_BODY_BYTES") {
            self.api.max_body_bytes = limit
                .parse()
                .map_err(|_| anyhow!("CAPTURE_MAX_BODY_BYTES must be a byte count"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.sampler.candidates == 0 {
            return Err(anyhow!("sampler.candidates must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "encoder.jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            ));
        }
        if self.detection.timeout.is_zero() {
            return Err(anyhow!("detection timeout must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be non-zero"));
        }
        if self.source.kind == SourceKind::Stream {
            url::Url::parse(&self.source.url)
                .with_context(|| format!("invalid stream url {}", self.source.url))?;
        }
        if self.detection.primary == self.detection.fallback {
            return Err(anyhow!(
                "detection.primary and detection.fallback must differ, both are '{}'",
                self.detection.primary
            ));
        }
        if self.uses(DetectorKind::Http) {
            url::Url::parse(&self.detection.model_url)
                .with_context(|| format!("invalid model url {}", self.detection.model_url))?;
        }
        if self.uses(DetectorKind::Tract) && self.detection.onnx_model.is_none() {
            return Err(anyhow!("the tract detector requires detection.onnx_model"));
        }
        if let Some(labels) = &self.detection.onnx_labels {
            if labels.is_empty() || labels.iter().any(|label| label.trim().is_empty()) {
                return Err(anyhow!("detection.onnx_labels must be non-empty names"));
            }
        }
        if self.api.max_body_bytes == 0 {
            return Err(anyhow!("api.max_body_bytes must be greater than zero"));
        }
        Ok(())
    }

    fn uses(&self, kind: DetectorKind) -> bool {
        self.detection.primary == kind || self.detection.fallback == kind
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sampler.candidates, 3);
        assert_eq!(cfg.sampler.delay, Duration::from_millis(100));
        assert_eq!(cfg.jpeg_quality, 92);
        assert_eq!(cfg.detection.timeout, Duration::from_secs(30));
    }

    #[test]
    fn kinds_parse_case_insensitively() -> Result<()> {
        assert_eq!("Stream".parse::<SourceKind>()?, SourceKind::Stream);
        assert_eq!(" HEURISTIC ".parse::<DetectorKind>()?, DetectorKind::Heuristic);
        assert!("yolo".parse::<DetectorKind>().is_err());
        Ok(())
    }

    #[test]
    fn cctv_parts_build_stream_url() -> Result<()> {
        let file: PipelineConfigFile = serde_json::from_str(
            r#"{"source":{"cctv":{"host":"10.0.0.7","username":"admin","password":"pw"}}}"#,
        )?;
        let cfg = PipelineConfig::from_file(file)?;
        assert_eq!(cfg.source.kind, SourceKind::Stream);
        assert_eq!(cfg.source.url, "rtsp://admin:pw@10.0.0.7:554/stream1");
        Ok(())
    }

    #[test]
    fn zero_candidates_rejected() -> Result<()> {
        let file: PipelineConfigFile = serde_json::from_str(r#"{"sampler":{"candidates":0}}"#)?;
        let cfg = PipelineConfig::from_file(file)?;
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn detector_cannot_be_its_own_fallback() -> Result<()> {
        let file: PipelineConfigFile = serde_json::from_str(
            r#"{"detection":{"primary":"heuristic","fallback":"heuristic"}}"#,
        )?;
        let cfg = PipelineConfig::from_file(file)?;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
        Ok(())
    }

    #[test]
    fn onnx_labels_come_from_file() -> Result<()> {
        let file: PipelineConfigFile = serde_json::from_str(
            r#"{"detection":{"onnx_labels":["bicycle","motorcycle","car","truck"]}}"#,
        )?;
        let cfg = PipelineConfig::from_file(file)?;
        cfg.validate()?;
        assert_eq!(
            cfg.detection.onnx_labels.as_deref(),
            Some(&["bicycle", "motorcycle", "car", "truck"].map(String::from)[..])
        );

        let file: PipelineConfigFile =
            serde_json::from_str(r#"{"detection":{"onnx_labels":[]}}"#)?;
        assert!(PipelineConfig::from_file(file)?.validate().is_err());
        Ok(())
    }

    #[test]
    fn tract_requires_model_path() -> Result<()> {
        let file: PipelineConfigFile =
            serde_json::from_str(r#"{"detection":{"primary":"tract"}}"#)?;
        let cfg = PipelineConfig::from_file(file)?;
        assert!(cfg.validate().is_err());
        Ok(())
    }
}
