use anyhow::Result;
use ndarray::Array2;

use crate::detect::backend::ObjectDetector;
use crate::frame::Frame;

/// Brightness cutoff for "object" pixels.
const BRIGHT: u8 = 200;
const SCORE: f32 = 0.9;

/// Stub detector for synthetic sources and tests.
///
/// Reports the bounding box of all bright pixels as a single class-0 detection.
#[derive(Default)]
pub struct StubDetector;

impl StubDetector {
    pub fn new() -> Self {
        Self
    }
}

impl ObjectDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn forward(&mut self, frame: &Frame) -> Result<Vec<Array2<f32>>> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, px) in frame.pixels().enumerate_pixels() {
            if px.0.iter().all(|&c| c >= BRIGHT) {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }

        let Some((x0, y0, x1, y1)) = bounds else {
            return Ok(vec![Array2::zeros((0, 6))]);
        };
        let fw = frame.width() as f32;
        let fh = frame.height() as f32;
        let w = (x1 - x0 + 1) as f32;
        let h = (y1 - y0 + 1) as f32;
        let row = [
            (x0 as f32 + w / 2.0) / fw,
            (y0 as f32 + h / 2.0) / fh,
            w / fw,
            h / fh,
            1.0,
            SCORE,
        ];
        Ok(vec![Array2::from_shape_vec((1, 6), row.to_vec())?])
    }
}
