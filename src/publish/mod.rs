//! Event publisher: live view, detection events and motion notifications.
//!
//! Every subscriber owns a bounded buffer. When a buffer is full the oldest item is evicted,
//! so a stalled subscriber never blocks the stage that publishes. Subscribers that dropped
//! their receiver are pruned on the next publish.

mod broadcast;

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};

use crate::detect::DetectionOutcome;
use crate::event::{encode_thumbnail, DetectionEvent, LiveFrame};
use crate::frame::Frame;
use crate::motion::MotionNotification;

pub use broadcast::{Broadcast, Subscription};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Per-subscriber live-view buffer depth.
    pub live_buffer: usize,
    /// Per-subscriber buffer depth for detection and motion events.
    pub event_buffer: usize,
    pub jpeg_quality: u8,
    /// Detection thumbnails are scaled down to at most this width.
    pub thumbnail_width: u32,
}

impl PublisherConfig {
    pub const DEFAULT_LIVE_BUFFER: usize = 2;
    pub const DEFAULT_EVENT_BUFFER: usize = 16;
    pub const DEFAULT_JPEG_QUALITY: u8 = 80;
    pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 320;

    pub fn validate(&self) -> Result<()> {
        if self.live_buffer == 0 || self.event_buffer == 0 {
            bail!("publisher buffers must hold at least one item");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("JPEG quality must be in 1..=100, got {}", self.jpeg_quality);
        }
        Ok(())
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            live_buffer: Self::DEFAULT_LIVE_BUFFER,
            event_buffer: Self::DEFAULT_EVENT_BUFFER,
            jpeg_quality: Self::DEFAULT_JPEG_QUALITY,
            thumbnail_width: Self::DEFAULT_THUMBNAIL_WIDTH,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub live_frames: u64,
    pub detection_events: u64,
    pub motion_notifications: u64,
    pub encode_failures: u64,
    /// Items evicted from full subscriber buffers.
    pub evicted: u64,
}

/// Broadcasts to any number of subscribers. Shared between stages behind an `Arc`.
pub struct EventPublisher {
    config: PublisherConfig,
    live: Broadcast<LiveFrame>,
    detections: Broadcast<DetectionEvent>,
    motion: Broadcast<MotionNotification>,
    live_frames: AtomicU64,
    detection_events: AtomicU64,
    motion_notifications: AtomicU64,
    encode_failures: AtomicU64,
}

impl EventPublisher {
    pub fn new(config: PublisherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            live: Broadcast::new(config.live_buffer),
            detections: Broadcast::new(config.event_buffer),
            motion: Broadcast::new(config.event_buffer),
            config,
            live_frames: AtomicU64::new(0),
            detection_events: AtomicU64::new(0),
            motion_notifications: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
        })
    }

    pub fn subscribe_live(&self) -> Result<Subscription<LiveFrame>> {
        self.live.subscribe()
    }

    pub fn subscribe_detections(&self) -> Result<Subscription<DetectionEvent>> {
        self.detections.subscribe()
    }

    pub fn subscribe_motion(&self) -> Result<Subscription<MotionNotification>> {
        self.motion.subscribe()
    }

    /// Encode and broadcast one live-view frame. Encoding is skipped with no subscribers.
    pub fn publish_live(&self, frame: &Frame) -> Result<()> {
        if !self.live.has_subscribers()? {
            return Ok(());
        }
        let live = match LiveFrame::encode(frame, self.config.jpeg_quality) {
            Ok(live) => live,
            Err(e) => {
                self.encode_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("dropping live frame {}: {:#}", frame.sequence(), e);
                return Ok(());
            }
        };
        self.live.send(live)?;
        self.live_frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Build and broadcast a detection event. Nothing is published for an empty label list.
    pub fn publish_detection(&self, outcome: &DetectionOutcome) -> Result<Option<DetectionEvent>> {
        if outcome.labels.is_empty() {
            return Ok(None);
        }
        let thumbnail = match encode_thumbnail(
            outcome.frame.pixels(),
            self.config.thumbnail_width,
            self.config.jpeg_quality,
        ) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.encode_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("dropping detection event: {:#}", e);
                return Ok(None);
            }
        };
        let Some(event) = DetectionEvent::new(
            thumbnail,
            outcome.labels.clone(),
            outcome.frame.captured_wall(),
        ) else {
            return Ok(None);
        };
        log::info!("detected: {}", event.content);
        self.detections.send(event.clone())?;
        self.detection_events.fetch_add(1, Ordering::Relaxed);
        Ok(Some(event))
    }

    pub fn publish_motion(&self, notification: MotionNotification) -> Result<()> {
        self.motion.send(notification)?;
        self.motion_notifications.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            live_frames: self.live_frames.load(Ordering::Relaxed),
            detection_events: self.detection_events.load(Ordering::Relaxed),
            motion_notifications: self.motion_notifications.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            evicted: self.live.evicted() + self.detections.evicted() + self.motion.evicted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn outcome(labels: &[&str]) -> DetectionOutcome {
        DetectionOutcome {
            frame: Frame::new(RgbImage::new(640, 480), 9),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            detections: Vec::new(),
        }
    }

    #[test]
    fn live_frames_reach_every_subscriber() {
        let publisher = EventPublisher::new(PublisherConfig::default()).unwrap();
        let a = publisher.subscribe_live().unwrap();
        let b = publisher.subscribe_live().unwrap();

        publisher
            .publish_live(&Frame::new(RgbImage::new(32, 24), 5))
            .unwrap();

        for sub in [&a, &b] {
            let frame = sub.try_recv().unwrap();
            assert_eq!(frame.sequence, 5);
            assert_eq!((frame.width, frame.height), (32, 24));
            assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);
        }
        assert_eq!(publisher.stats().live_frames, 1);
    }

    #[test]
    fn live_frames_without_subscribers_are_not_encoded() {
        let publisher = EventPublisher::new(PublisherConfig::default()).unwrap();
        publisher
            .publish_live(&Frame::new(RgbImage::new(8, 8), 0))
            .unwrap();
        assert_eq!(publisher.stats().live_frames, 0);
    }

    #[test]
    fn empty_outcome_publishes_nothing() {
        let publisher = EventPublisher::new(PublisherConfig::default()).unwrap();
        let sub = publisher.subscribe_detections().unwrap();

        assert!(publisher.publish_detection(&outcome(&[])).unwrap().is_none());
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn detection_event_carries_labels_and_thumbnail() {
        let publisher = EventPublisher::new(PublisherConfig::default()).unwrap();
        let sub = publisher.subscribe_detections().unwrap();

        publisher
            .publish_detection(&outcome(&["person", "dog"]))
            .unwrap();

        let event = sub.try_recv().unwrap();
        assert_eq!(event.content, "person,dog");
        let thumb = image::load_from_memory(&event.thumbnail).unwrap();
        assert_eq!(thumb.width(), 320);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = PublisherConfig {
            jpeg_quality: 0,
            ..PublisherConfig::default()
        };
        assert!(EventPublisher::new(config).is_err());
    }
}
