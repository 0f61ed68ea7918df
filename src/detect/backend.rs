use anyhow::Result;
use ndarray::Array2;

use crate::frame::Frame;

/// Object-detection network capability.
///
/// `forward` returns one or more raw output tensors. Each row follows the YOLO darknet
/// layout: `[cx, cy, w, h, objectness, class scores...]`, with box values normalized to the
/// network input so they can be scaled by the frame size. Decoding, thresholding and
/// suppression happen in [`super::DetectionStage`], not in the backend.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the network on a frame.
    fn forward(&mut self, frame: &Frame) -> Result<Vec<Array2<f32>>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
