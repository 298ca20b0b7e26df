#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::NativeDetection;
use crate::encode::EncodedStill;
use crate::error::DetectorError;

/// Class labels in model output order when none are configured.
const DEFAULT_LABELS: [&str; 2] = ["2-wheeler", "4-wheeler"];

/// Local ONNX vehicle classifier.
///
/// The still is decoded, resized to the model's square input and fed as a
/// normalized NCHW f32 tensor. The arg-max of the first output picks the
/// label; its score is the confidence.
pub struct OnnxDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    labels: Vec<String>,
}

impl OnnxDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
        })
    }

    /// Override the output labels, in model output order.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    fn build_input(&self, still: &EncodedStill) -> Result<Tensor, DetectorError> {
        let decoded = image::load_from_memory(still.bytes())
            .map_err(|err| DetectorError::MalformedInput(format!("cannot decode still: {}", err)))?;
        let rgb = image::imageops::resize(
            &decoded.to_rgb8(),
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );

        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            rgb.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn best_label(&self, outputs: TVec<TValue>) -> Result<(usize, f32), DetectorError> {
        let output = outputs
            .first()
            .ok_or_else(|| DetectorError::Internal("model produced no outputs".to_string()))?;
        let scores = output
            .to_array_view::<f32>()
            .map_err(|err| DetectorError::Internal(format!("model output was not f32: {}", err)))?;
        scores
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, score)| score.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| DetectorError::Internal("model produced no finite scores".to_string()))
    }
}

impl Detector for OnnxDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    /// One inference on a blank input, so model problems surface at startup
    /// and the first real request does not pay for lazy initialization.
    fn warm_up(&mut self) -> Result<(), DetectorError> {
        let side = self.input_size as usize;
        let blank = tract_ndarray::Array4::<f32>::zeros((1, 3, side, side)).into_tensor();
        let outputs = self
            .model
            .run(tvec!(blank.into()))
            .map_err(|err| DetectorError::Internal(format!("ONNX warm-up failed: {}", err)))?;
        let (index, _) = self.best_label(outputs)?;
        if index >= self.labels.len() {
            return Err(DetectorError::Internal(format!(
                "model has more outputs than the {} configured labels",
                self.labels.len()
            )));
        }
        Ok(())
    }

    fn run(&mut self, still: &EncodedStill) -> Result<NativeDetection, DetectorError> {
        let input = self.build_input(still)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|err| DetectorError::Internal(format!("ONNX inference failed: {}", err)))?;
        let (index, score) = self.best_label(outputs)?;
        let label = self.labels.get(index).cloned().ok_or_else(|| {
            DetectorError::Internal(format!("model output {} has no configured label", index))
        })?;

        Ok(NativeDetection::new(label, score as f64)
            .with_metadata("method", "onnx")
            .with_metadata("classIndex", index as u64))
    }
}
