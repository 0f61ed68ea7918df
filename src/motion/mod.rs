//! Motion stage: foreground extraction, region counting and the episode state machine.

mod episode;
mod foreground;
mod regions;

use std::time::Duration;

use anyhow::Result;

use crate::frame::Frame;

pub use episode::{EpisodeState, MotionEpisode, MotionNotification};
pub use foreground::{ForegroundExtractor, RunningAverageSubtractor};
pub use regions::{count_motion_regions, MotionMeasurement};

#[derive(Clone, Debug, PartialEq)]
pub struct MotionConfig {
    /// Foreground values above this count as changed.
    pub binary_threshold: u8,
    /// Minimum contour area in square pixels.
    pub min_contour_area: f64,
    /// More regions than this in one frame is treated as noise.
    pub max_regions: usize,
    /// Episodes must last longer than this to report `Ended`.
    pub ended_min_duration: Duration,
    /// How far past a whole-second mark a frame may land and still report `Sustained` for it.
    /// A second with no frame inside the window is skipped.
    pub sustained_tolerance: Duration,
    pub learning_rate: f32,
}

impl MotionConfig {
    pub const DEFAULT_BINARY_THRESHOLD: u8 = 25;
    pub const DEFAULT_MIN_CONTOUR_AREA: f64 = 500.0;
    pub const DEFAULT_MAX_REGIONS: usize = 10;
    pub const DEFAULT_ENDED_MIN_DURATION: Duration = Duration::from_secs(3);
    pub const DEFAULT_SUSTAINED_TOLERANCE: Duration = Duration::from_millis(250);
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            binary_threshold: Self::DEFAULT_BINARY_THRESHOLD,
            min_contour_area: Self::DEFAULT_MIN_CONTOUR_AREA,
            max_regions: Self::DEFAULT_MAX_REGIONS,
            ended_min_duration: Self::DEFAULT_ENDED_MIN_DURATION,
            sustained_tolerance: Self::DEFAULT_SUSTAINED_TOLERANCE,
            learning_rate: RunningAverageSubtractor::DEFAULT_LEARNING_RATE,
        }
    }
}

/// Outcome of one frame through the motion stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionStep {
    pub measurement: MotionMeasurement,
    pub notification: Option<MotionNotification>,
}

/// Single-owner motion stage. Frames must be fed in capture order.
pub struct MotionStage {
    extractor: Box<dyn ForegroundExtractor>,
    config: MotionConfig,
    episode: MotionEpisode,
}

impl MotionStage {
    pub fn new(extractor: Box<dyn ForegroundExtractor>, config: MotionConfig) -> Self {
        let episode = MotionEpisode::new(config.ended_min_duration, config.sustained_tolerance);
        Self {
            extractor,
            config,
            episode,
        }
    }

    /// Stage with the default running-average extractor.
    pub fn with_defaults(config: MotionConfig) -> Result<Self> {
        let extractor = RunningAverageSubtractor::new(config.learning_rate)?;
        Ok(Self::new(Box::new(extractor), config))
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    pub fn episode(&self) -> &MotionEpisode {
        &self.episode
    }

    /// Drop the learned background. The next frame reseeds it and reports no motion.
    pub fn reset_background(&mut self) {
        self.extractor.reset();
    }

    /// Run one (already zone-masked) frame through the stage.
    pub fn process(&mut self, frame: &Frame) -> Result<MotionStep> {
        let foreground = self.extractor.apply(frame)?;
        let measurement = count_motion_regions(&foreground, &self.config);
        if measurement.suppressed {
            log::debug!(
                "frame {}: {} regions treated as noise",
                frame.sequence(),
                measurement.raw_regions
            );
        }
        let notification = self
            .episode
            .observe(measurement.regions, frame.captured_at());
        Ok(MotionStep {
            measurement,
            notification,
        })
    }
}
