use anyhow::{bail, Result};
use image::{imageops, GrayImage, Luma};

use crate::frame::Frame;

/// Background-subtraction capability.
///
/// Implementations keep a model of the static scene and return a per-pixel foreground
/// intensity map for each frame. Larger values mean "more different from the background".
pub trait ForegroundExtractor: Send {
    /// Extractor identifier.
    fn name(&self) -> &'static str;

    /// Update the background model with `frame` and return its foreground map.
    fn apply(&mut self, frame: &Frame) -> Result<GrayImage>;

    /// Forget the background model.
    fn reset(&mut self) {}
}

/// Running-average background subtractor on grayscale frames.
///
/// The first frame (and any frame whose size differs from the model) seeds the background and
/// yields an all-zero map.
pub struct RunningAverageSubtractor {
    alpha: f32,
    background: Option<Background>,
}

struct Background {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl RunningAverageSubtractor {
    pub const DEFAULT_LEARNING_RATE: f32 = 0.05;

    pub fn new(alpha: f32) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            bail!("learning rate must be in (0, 1], got {}", alpha);
        }
        Ok(Self {
            alpha,
            background: None,
        })
    }
}

impl Default for RunningAverageSubtractor {
    fn default() -> Self {
        Self {
            alpha: Self::DEFAULT_LEARNING_RATE,
            background: None,
        }
    }
}

impl ForegroundExtractor for RunningAverageSubtractor {
    fn name(&self) -> &'static str {
        "running-average"
    }

    fn apply(&mut self, frame: &Frame) -> Result<GrayImage> {
        let gray = imageops::grayscale(frame.pixels());
        let (width, height) = gray.dimensions();

        let matches_model = self
            .background
            .as_ref()
            .is_some_and(|bg| bg.width == width && bg.height == height);
        if !matches_model {
            if self.background.is_some() {
                log::debug!(
                    "foreground model reset: frame size changed to {}x{}",
                    width,
                    height
                );
            }
            self.background = Some(Background {
                width,
                height,
                values: gray.pixels().map(|p| p[0] as f32).collect(),
            });
            return Ok(GrayImage::new(width, height));
        }
        let Some(background) = self.background.as_mut() else {
            return Ok(GrayImage::new(width, height));
        };

        let mut foreground = GrayImage::new(width, height);
        for ((out, px), bg) in foreground
            .pixels_mut()
            .zip(gray.pixels())
            .zip(background.values.iter_mut())
        {
            let value = px[0] as f32;
            let diff = (value - *bg).abs();
            *out = Luma([diff.round().min(255.0) as u8]);
            *bg += self.alpha * (value - *bg);
        }
        Ok(foreground)
    }

    fn reset(&mut self) {
        self.background = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(RgbImage::from_pixel(width, height, Rgb([value; 3])), 0)
    }

    #[test]
    fn first_frame_seeds_background() {
        let mut sub = RunningAverageSubtractor::default();
        let fg = sub.apply(&solid(6, 4, 200)).unwrap();
        assert_eq!(fg.dimensions(), (6, 4));
        assert!(fg.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn change_shows_up_and_fades_into_background() {
        let mut sub = RunningAverageSubtractor::new(0.5).unwrap();
        sub.apply(&solid(4, 4, 0)).unwrap();

        let first = sub.apply(&solid(4, 4, 200)).unwrap();
        assert_eq!(first.get_pixel(1, 1)[0], 200);

        let second = sub.apply(&solid(4, 4, 200)).unwrap();
        assert_eq!(second.get_pixel(1, 1)[0], 100);
    }

    #[test]
    fn size_change_reseeds() {
        let mut sub = RunningAverageSubtractor::default();
        sub.apply(&solid(4, 4, 0)).unwrap();
        let fg = sub.apply(&solid(8, 8, 255)).unwrap();
        assert_eq!(fg.dimensions(), (8, 8));
        assert!(fg.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn rejects_bad_learning_rate() {
        assert!(RunningAverageSubtractor::new(0.0).is_err());
        assert!(RunningAverageSubtractor::new(1.5).is_err());
        assert!(RunningAverageSubtractor::new(f32::NAN).is_err());
    }
}
