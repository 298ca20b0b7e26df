use std::time::Duration;

use serde_json::Value;

use gate_capture::api::{ApiConfig, ApiHandle, ApiServer};
use gate_capture::capture::{FrameSampler, SamplerConfig};
use gate_capture::detect::{DetectionOrchestrator, DetectorHandle, StubDetector};
use gate_capture::{CapturePipeline, DetectorError, SharedSource, StillEncoder, StubSource};

fn pipeline(primary: StubDetector, fallback: StubDetector) -> CapturePipeline {
    CapturePipeline::new(
        FrameSampler::new(SamplerConfig {
            candidates: 3,
            delay: Duration::ZERO,
        }),
        StillEncoder::default(),
        DetectionOrchestrator::new(DetectorHandle::new(primary), DetectorHandle::new(fallback)),
    )
}

fn healthy_pipeline() -> CapturePipeline {
    pipeline(
        StubDetector::succeeding("4-wheeler", 0.91).named("model"),
        StubDetector::succeeding("2-wheeler", 0.55).named("heuristic"),
    )
}

fn spawn(pipeline: CapturePipeline, source: Option<SharedSource>, max_body_bytes: usize) -> ApiHandle {
    let cfg = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        max_body_bytes,
    };
    let mut server = ApiServer::new(cfg, pipeline);
    if let Some(source) = source {
        server = server.with_source(source);
    }
    server.spawn().expect("spawn api")
}

fn small_jpeg() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([120, 120, 120]));
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 92)
        .encode_image(&img)
        .expect("encode jpeg");
    bytes
}

/// Status and JSON body, for success and error statuses alike.
fn call(request: ureq::Request, body: Option<&[u8]>) -> (u16, Value) {
    let response = match body {
        Some(body) => request.send_bytes(body),
        None => request.call(),
    };
    let response = match response {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => panic!("transport error: {}", err),
    };
    let status = response.status();
    let text = response.into_string().expect("read body");
    (status, serde_json::from_str(&text).expect("json body"))
}

fn url(handle: &ApiHandle, path: &str) -> String {
    format!("http://{}{}", handle.addr, path)
}

#[test]
fn health_endpoint_answers() -> anyhow::Result<()> {
    let handle = spawn(healthy_pipeline(), None, 1024 * 1024);
    let (status, body) = call(ureq::get(&url(&handle, "/health")), None);
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    handle.stop()
}

#[test]
fn detect_returns_normalized_result() -> anyhow::Result<()> {
    let handle = spawn(healthy_pipeline(), None, 1024 * 1024);
    let (status, body) = call(
        ureq::post(&url(&handle, "/detect")).set("Content-Type", "image/jpeg"),
        Some(&small_jpeg()),
    );
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["vehicleType"], "4-wheeler");
    assert_eq!(body["confidence"], 0.91);
    assert_eq!(body["source"], "primary");
    handle.stop()
}

#[test]
fn detect_accepts_multipart_image_field() -> anyhow::Result<()> {
    let handle = spawn(healthy_pipeline(), None, 1024 * 1024);
    let mut body = Vec::new();
    body.extend_from_slice(
        b"--gate\r\nContent-Disposition: form-data; name=\"image\"; filename=\"capture.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
    );
    body.extend_from_slice(&small_jpeg());
    body.extend_from_slice(b"\r\n--gate--\r\n");

    let (status, json) = call(
        ureq::post(&url(&handle, "/detect"))
            .set("Content-Type", "multipart/form-data; boundary=gate"),
        Some(&body),
    );
    assert_eq!(status, 200);
    assert_eq!(json["vehicleType"], "4-wheeler");
    handle.stop()
}

#[test]
fn empty_upload_is_a_bad_request() -> anyhow::Result<()> {
    let handle = spawn(healthy_pipeline(), None, 1024 * 1024);
    let (status, body) = call(ureq::post(&url(&handle, "/detect")), Some(&[]));
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "No image data provided");
    handle.stop()
}

#[test]
fn total_failure_has_message_and_no_classification() -> anyhow::Result<()> {
    let failing = pipeline(
        StubDetector::failing(DetectorError::Unavailable("model offline".into())),
        StubDetector::failing(DetectorError::Internal("no foreground silhouette found".into())),
    );
    let handle = spawn(failing, None, 1024 * 1024);
    let (status, body) = call(ureq::post(&url(&handle, "/detect")), Some(&small_jpeg()));
    assert_eq!(status, 500);
    assert_eq!(body["success"], false);
    let message = body["message"].as_str().unwrap_or_default();
    assert!(message.contains("model offline"));
    assert!(message.contains("no foreground silhouette found"));
    assert!(body.get("vehicleType").is_none());
    assert!(body.get("confidence").is_none());
    handle.stop()
}

#[test]
fn test_camera_wraps_result_with_debug_info() -> anyhow::Result<()> {
    let handle = spawn(healthy_pipeline(), None, 1024 * 1024);
    let jpeg = small_jpeg();
    let (status, body) = call(ureq::post(&url(&handle, "/test-camera")), Some(&jpeg));
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["detectionResult"]["vehicleType"], "4-wheeler");
    assert_eq!(body["debug"]["receivedDataSize"], jpeg.len());
    assert_eq!(body["debug"]["mimeType"], "image/jpeg");
    handle.stop()
}

#[test]
fn capture_runs_against_configured_source() -> anyhow::Result<()> {
    let source = SharedSource::new(StubSource::synthetic("stub://gate", 16, 12));
    let handle = spawn(healthy_pipeline(), Some(source), 1024 * 1024);
    let (status, body) = call(ureq::post(&url(&handle, "/capture")), Some(&[]));
    assert_eq!(status, 200);
    assert_eq!(body["source"], "primary");
    handle.stop()
}

#[test]
fn capture_failures_are_camera_errors() -> anyhow::Result<()> {
    let handle = spawn(healthy_pipeline(), None, 1024 * 1024);
    let (status, body) = call(ureq::post(&url(&handle, "/capture")), Some(&[]));
    assert_eq!(status, 503);
    assert!(body["message"].as_str().unwrap_or_default().starts_with("camera error:"));
    handle.stop()?;

    let dark = SharedSource::new(StubSource::synthetic("stub://dark", 4, 4).never_ready());
    let handle = spawn(healthy_pipeline(), Some(dark), 1024 * 1024);
    let (status, body) = call(ureq::post(&url(&handle, "/capture")), Some(&[]));
    assert_eq!(status, 503);
    assert!(body["message"].as_str().unwrap_or_default().contains("stub://dark"));
    handle.stop()
}

#[test]
fn oversized_upload_is_rejected() -> anyhow::Result<()> {
    let handle = spawn(healthy_pipeline(), None, 64);
    let (status, body) = call(ureq::post(&url(&handle, "/detect")), Some(&[0u8; 256]));
    assert_eq!(status, 413);
    assert_eq!(body["success"], false);
    handle.stop()
}

#[test]
fn unknown_routes_and_methods() -> anyhow::Result<()> {
    let handle = spawn(healthy_pipeline(), None, 1024 * 1024);
    let (status, _) = call(ureq::get(&url(&handle, "/records")), None);
    assert_eq!(status, 404);
    let (status, _) = call(ureq::get(&url(&handle, "/detect")), None);
    assert_eq!(status, 405);
    handle.stop()
}

fn form_body(fields: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--gate\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        body.extend_from_slice(value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(b"--gate--\r\n");
    body
}

#[test]
fn base64_form_upload_is_decoded() -> anyhow::Result<()> {
    use base64::Engine as _;

    let handle = spawn(healthy_pipeline(), None, 1024 * 1024);
    let jpeg = small_jpeg();
    let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg);
    let body = form_body(&[("isBase64", b"true"), ("image", encoded.as_bytes())]);

    let (status, json) = call(
        ureq::post(&url(&handle, "/test-camera"))
            .set("Content-Type", "multipart/form-data; boundary=gate"),
        Some(&body),
    );
    assert_eq!(status, 200);
    assert_eq!(json["debug"]["receivedDataSize"], jpeg.len());
    assert_eq!(json["debug"]["mimeType"], "image/jpeg");

    let bad = form_body(&[("isBase64", b"true"), ("image", b"%%%")]);
    let (status, json) = call(
        ureq::post(&url(&handle, "/detect"))
            .set("Content-Type", "multipart/form-data; boundary=gate"),
        Some(&bad),
    );
    assert_eq!(status, 400);
    assert_eq!(json["success"], false);
    handle.stop()
}
