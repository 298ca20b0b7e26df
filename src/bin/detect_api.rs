//! detect_api - detection service for the gate capture kernel
//!
//! This daemon:
//! 1. Loads the pipeline configuration
//! 2. Opens the configured frame source for `POST /capture`
//! 3. Serves the detection API until Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::mpsc;

use gate_capture::{
    api::{ApiConfig, ApiServer},
    build_source, CapturePipeline, PipelineConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = PipelineConfig::load()?;
    let pipeline = CapturePipeline::from_config(&config)?;
    let source = build_source(&config.source)?;

    let api_handle = ApiServer::new(ApiConfig::from(&config.api), pipeline)
        .with_source(source.clone())
        .spawn()?;
    log::info!(
        "detect_api running on {} (source {}, primary {}, fallback {})",
        api_handle.addr,
        source.name(),
        config.detection.primary,
        config.detection.fallback
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("detect_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
