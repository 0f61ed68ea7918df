#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use ndarray::Array2;
use tract_onnx::prelude::*;

use crate::detect::backend::ObjectDetector;
use crate::frame::Frame;

/// Square network input side for darknet-style YOLO models.
pub const DEFAULT_INPUT_SIZE: u32 = 416;

/// Tract-based detector for ONNX YOLO models.
///
/// The frame is resized to the square network input, scaled to `[0, 1]` and laid out NCHW.
/// Every model output is flattened to rows of its last dimension.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
}

impl TractDetector {
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

        Ok(Self { model, input_size })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(frame.pixels(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }
}

fn to_rows(output: &Tensor) -> Result<Array2<f32>> {
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    let shape = view.shape();
    let cols = *shape
        .last()
        .ok_or_else(|| anyhow!("model output has no dimensions"))?;
    let values: Vec<f32> = view.iter().copied().collect();
    let rows = if cols == 0 { 0 } else { values.len() / cols };
    Array2::from_shape_vec((rows, cols), values).context("model output is not row-shaped")
}

impl ObjectDetector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn forward(&mut self, frame: &Frame) -> Result<Vec<Array2<f32>>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        outputs.iter().map(|t| to_rows(t)).collect()
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = Frame::new(image::RgbImage::new(side, side), 0);
        self.forward(&blank).map(|_| ())
    }
}
