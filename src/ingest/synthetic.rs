use std::time::{Duration, Instant};

use anyhow::Result;
use image::{Rgb, RgbImage};
use rand::Rng;

use super::{FrameSource, SourceConfig};
use crate::frame::Frame;

/// Frames per phase: still background, then a moving square, alternating.
const PHASE_FRAMES: u64 = 50;
const SQUARE_SIZE: u32 = 60;
/// Peak sensor noise, kept well below motion thresholds.
const NOISE: i16 = 3;

/// Synthetic scene for `stub://` URLs.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            next_due: None,
        }
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.target_fps;
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + interval);
    }

    fn render(&self) -> RgbImage {
        let (width, height) = (self.config.width, self.config.height);
        let mut rng = rand::thread_rng();
        let mut pixels = RgbImage::from_fn(width, height, |x, y| {
            let base = (40 + (x * 60 / width.max(1)) + (y * 40 / height.max(1))) as i16;
            let v = (base + rng.gen_range(-NOISE..=NOISE)).clamp(0, 255) as u8;
            Rgb([v, v, v.saturating_add(10)])
        });

        let phase = self.frame_count / PHASE_FRAMES;
        if phase % 2 == 1 && width > SQUARE_SIZE && height > SQUARE_SIZE {
            let step = self.frame_count % PHASE_FRAMES;
            let travel = (width - SQUARE_SIZE) as u64;
            let x0 = (step * travel / PHASE_FRAMES) as u32;
            let y0 = (height - SQUARE_SIZE) / 2;
            for y in y0..y0 + SQUARE_SIZE {
                for x in x0..x0 + SQUARE_SIZE {
                    pixels.put_pixel(x, y, Rgb([250, 250, 250]));
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!(
            "{} (synthetic {}x{})",
            self.config.url, self.config.width, self.config.height
        )
    }

    fn open(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.config.url);
        self.next_due = None;
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        self.pace();
        let pixels = self.render();
        let frame = Frame::new(pixels, self.frame_count);
        self.frame_count += 1;
        Ok(Some(frame))
    }
}
