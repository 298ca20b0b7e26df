//! capture_detect - one-shot capture and vehicle classification
//!
//! This tool:
//! 1. Loads the pipeline configuration (CAPTURE_CONFIG + env overrides)
//! 2. Captures the best of N frames from the configured source, or reads `--image`
//! 3. Enhances and encodes the still, then runs primary/fallback detection
//! 4. Prints the detection result as JSON

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use gate_capture::{
    build_source, CapturePipeline, EncodedStill, PipelineConfig, PipelineError,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension). Overrides CAPTURE_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Classify this image instead of capturing from the source.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Write the encoded still here.
    #[arg(long)]
    save_still: Option<PathBuf>,
    /// Pretty-print the JSON result.
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load_from(Some(path))?,
        None => PipelineConfig::load()?,
    };
    let pipeline = CapturePipeline::from_config(&config)?;

    let still = match &args.image {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read image {}", path.display()))?;
            EncodedStill::from_upload(bytes)
        }
        None => {
            let source = build_source(&config.source)?;
            match pipeline.capture_still(&source) {
                Ok(still) => still,
                Err(err) => return Ok(report_failure(&err)),
            }
        }
    };

    if let Some(path) = &args.save_still {
        std::fs::write(path, still.bytes())
            .with_context(|| format!("failed to write still {}", path.display()))?;
        log::info!("saved {} to {}", still.label(), path.display());
    }

    match pipeline.detect_still(&still) {
        Ok(result) => {
            let json = if args.pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
        Err(failed) => Ok(report_failure(&PipelineError::Detection(failed))),
    }
}

fn report_failure(err: &PipelineError) -> ExitCode {
    let payload = serde_json::json!({ "success": false, "message": err.to_string() });
    println!("{}", payload);
    if err.is_capture_failure() {
        log::error!("camera problem: {}", err);
        ExitCode::from(2)
    } else {
        log::error!("model problem: {}", err);
        ExitCode::from(3)
    }
}
