//! Detection request/response boundary.
//!
//! Minimal HTTP/1.1 server on a std `TcpListener`:
//! - `GET /health`
//! - `POST /detect`: classify an uploaded image (raw body or multipart `image`
//!   field, base64 when the form sets `isBase64`)
//! - `POST /test-camera`: same, wrapped with upload diagnostics
//! - `POST /capture`: capture from the configured source, then classify
//!
//! Failures always answer `{"success": false, "message": "..."}`.

mod request;

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::json;

use crate::config::{ApiSettings, DEFAULT_MAX_BODY_BYTES};
use crate::encode::EncodedStill;
use crate::error::{CaptureError, PipelineError};
use crate::ingest::SharedSource;
use crate::pipeline::CapturePipeline;

use request::{read_request, RequestError, UploadError};

/// Upper bound on bytes drained from a rejected upload.
const MAX_DISCARD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8790".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            addr: settings.addr.clone(),
            max_body_bytes: settings.max_body_bytes,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: CapturePipeline,
    source: Option<SharedSource>,
}

#[derive(Clone)]
struct ApiState {
    pipeline: CapturePipeline,
    source: Option<SharedSource>,
    max_body_bytes: usize,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: CapturePipeline) -> Self {
        Self {
            cfg,
            pipeline,
            source: None,
        }
    }

    /// Enable `POST /capture` against `source`.
    pub fn with_source(mut self, source: SharedSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let state = ApiState {
            pipeline: self.pipeline,
            source: self.source,
            max_body_bytes: self.cfg.max_body_bytes,
        };
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, state, shutdown_thread) {
                log::error!("detect api stopped: {}", err);
            }
        });

        log::info!("detect api listening on {}", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, state: ApiState, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let state = state.clone();
                let spawned = std::thread::Builder::new()
                    .name("detect-api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &state) {
                            log::warn!("detect api request failed: {}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("detect api could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        return write_failure(&mut stream, 403, "forbidden");
    }

    let request = match read_request(&mut stream, state.max_body_bytes) {
        Ok(request) => request,
        Err(RequestError::TooLarge(len)) => {
            log::warn!("detect api: rejected {} byte upload", len);
            write_failure(
                &mut stream,
                413,
                &format!("upload exceeds the {} byte limit", state.max_body_bytes),
            )?;
            discard_unread(&mut stream);
            return Ok(());
        }
        Err(RequestError::Malformed(reason)) => {
            return write_failure(&mut stream, 400, &reason);
        }
        Err(RequestError::Io(err)) => return Err(err.into()),
    };

    let allowed = match request.path.as_str() {
        "/health" => "GET",
        "/detect" | "/test-camera" | "/capture" => "POST",
        _ => return write_failure(&mut stream, 404, "not found"),
    };
    if request.method != allowed {
        return write_failure(&mut stream, 405, "method not allowed");
    }

    match request.path.as_str() {
        "/health" => write_json(&mut stream, 200, &json!({ "status": "ok" })),
        "/detect" => {
            let still = match request.image() {
                Ok(Some(image)) => EncodedStill::from_upload(image.into_owned()),
                Ok(None) => return write_failure(&mut stream, 400, "No image data provided"),
                Err(UploadError(reason)) => return write_failure(&mut stream, 400, &reason),
            };
            match state.pipeline.detect_still(&still) {
                Ok(result) => write_json(&mut stream, 200, &result),
                Err(failed) => write_failure(&mut stream, 500, &failed.to_string()),
            }
        }
        "/test-camera" => {
            let still = match request.image() {
                Ok(Some(image)) => EncodedStill::from_upload(image.into_owned()),
                Ok(None) => return write_failure(&mut stream, 400, "No camera data received"),
                Err(UploadError(reason)) => return write_failure(&mut stream, 400, &reason),
            };
            match state.pipeline.detect_still(&still) {
                Ok(result) => write_json(
                    &mut stream,
                    200,
                    &json!({
                        "success": true,
                        "detectionResult": result,
                        "debug": {
                            "receivedDataSize": still.len(),
                            "mimeType": still.mime_type(),
                        },
                    }),
                ),
                Err(failed) => write_failure(&mut stream, 500, &failed.to_string()),
            }
        }
        _ => {
            let Some(source) = &state.source else {
                return write_failure(&mut stream, 503, "camera error: no frame source configured");
            };
            match state.pipeline.capture_and_detect(source) {
                Ok(result) => write_json(&mut stream, 200, &result),
                Err(err) => {
                    let (status, message) = capture_failure(&err);
                    write_failure(&mut stream, status, &message)
                }
            }
        }
    }
}

/// Status and message for a failed `/capture`, keeping camera problems and
/// model problems apart.
fn capture_failure(err: &PipelineError) -> (u16, String) {
    match err {
        PipelineError::Capture(CaptureError::SourceBusy(name)) => (
            409,
            format!("camera error: {} is busy with another capture", name),
        ),
        PipelineError::Capture(inner) => (503, format!("camera error: {}", inner)),
        PipelineError::Encode(inner) => (503, format!("camera error: {}", inner)),
        PipelineError::Detection(failed) => (500, failed.to_string()),
    }
}

/// Half-close and drain what the client is still sending, so closing the
/// socket does not reset the connection before the reply is read.
fn discard_unread(stream: &mut TcpStream) {
    if stream.shutdown(Shutdown::Write).is_err() {
        return;
    }
    let _ = stream.set_read_timeout(Some(Duration::from_secs(1)));
    let mut buf = [0u8; 8192];
    let mut drained = 0usize;
    while drained < MAX_DISCARD_BYTES {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => drained += n,
        }
    }
}

fn write_failure(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    write_json(
        stream,
        status,
        &json!({ "success": false, "message": message }),
    )
}

fn write_json<T: serde::Serialize>(stream: &mut TcpStream, status: u16, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        413 => "HTTP/1.1 413 Payload Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}
