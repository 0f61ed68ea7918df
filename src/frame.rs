//! Captured frames.
//!
//! `Frame` is the unit that flows through the pipeline:
//! - Pixels are RGB, shared behind an `Arc`.
//! - A frame is immutable once captured. Stages that change pixels (masking, annotation,
//!   resizing) derive a new frame that keeps the capture metadata.
//! - Cloning a frame before handing it to a concurrent stage never copies pixel data.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use image::imageops::{self, FilterType};
use image::RgbImage;

/// An immutable captured frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Arc<RgbImage>,
    /// Monotonic capture instant. Drives motion-episode timing.
    captured_at: Instant,
    /// Wall-clock capture time. Used for event timestamps.
    captured_wall: SystemTime,
    /// Per-source capture counter.
    sequence: u64,
}

impl Frame {
    /// Wrap freshly captured pixels. Called by frame sources.
    pub fn new(pixels: RgbImage, sequence: u64) -> Self {
        Self {
            pixels: Arc::new(pixels),
            captured_at: Instant::now(),
            captured_wall: SystemTime::now(),
            sequence,
        }
    }

    /// Same as [`Frame::new`] with an explicit capture instant.
    pub fn captured(pixels: RgbImage, sequence: u64, captured_at: Instant) -> Self {
        Self {
            pixels: Arc::new(pixels),
            captured_at,
            captured_wall: SystemTime::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// A zero-sized frame carries nothing to analyze.
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn captured_wall(&self) -> SystemTime {
        self.captured_wall
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Derive a frame with new pixels and the same capture metadata.
    pub fn with_pixels(&self, pixels: RgbImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
            captured_at: self.captured_at,
            captured_wall: self.captured_wall,
            sequence: self.sequence,
        }
    }

    /// Resize to `width`x`height`. Returns a cheap clone when the size already matches.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        let pixels = imageops::resize(self.pixels.as_ref(), width, height, FilterType::Triangle);
        self.with_pixels(pixels)
    }

    /// True when both frames point at the same pixel buffer.
    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}
