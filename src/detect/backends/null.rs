use anyhow::Result;
use ndarray::Array2;

use crate::detect::backend::ObjectDetector;
use crate::frame::Frame;

/// Detector that never finds anything. Used when no model is configured, so motion
/// notifications and live view still work.
#[derive(Default)]
pub struct NullDetector;

impl ObjectDetector for NullDetector {
    fn name(&self) -> &'static str {
        "null"
    }

    fn forward(&mut self, _frame: &Frame) -> Result<Vec<Array2<f32>>> {
        Ok(Vec::new())
    }
}
