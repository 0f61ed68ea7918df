//! Zonewatch
//!
//! Real-time single-camera analytics: ingest a live stream, restrict analysis to
//! operator-drawn zones, detect motion inside them and, when something moves, classify it.
//! A JPEG live view is published continuously and detection events on demand.
//!
//! # Module Structure
//!
//! - `zone`: zone configuration and viewport-to-frame coordinate mapping
//! - `mask`: zone masks applied to frames
//! - `motion`: foreground extraction, region counting, motion episodes
//! - `detect`: detector backends, candidate decoding, NMS, annotation
//! - `publish`, `event`: subscriber fan-out and event payloads
//! - `ingest`, `capture`: frame sources and the reconnecting capture loop
//! - `pipeline`: wiring and thread lifecycle
//! - `config`, `transport`: daemon configuration and MQTT forwarding

pub mod capture;
pub mod config;
pub mod detect;
pub mod event;
pub mod frame;
pub mod ingest;
pub mod labels;
pub mod mask;
pub mod motion;
pub mod pipeline;
pub mod publish;
pub mod shutdown;
pub mod transport;
pub mod zone;

pub use capture::{CaptureConfig, CaptureStats, MotionJob};
pub use detect::{
    Annotator, BoundingBox, Detection, DetectionConfig, DetectionOutcome, DetectionStage,
    ObjectDetector,
};
pub use event::{DetectionEvent, LiveFrame, DETECTION_EVENT_SCHEMA_VERSION};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceConfig};
pub use labels::LabelSet;
pub use mask::apply_zone_mask;
pub use motion::{
    ForegroundExtractor, MotionConfig, MotionNotification, MotionStage, RunningAverageSubtractor,
};
pub use pipeline::{Pipeline, PipelineConfig, PipelineHandle, TriggerPolicy};
pub use publish::{EventPublisher, PublisherConfig, Subscription};
pub use shutdown::Shutdown;
pub use zone::{MappedZones, Point, ZoneConfig, ZoneStore};
