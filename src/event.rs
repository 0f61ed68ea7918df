//! Payloads broadcast to subscribers.

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub const DETECTION_EVENT_SCHEMA_VERSION: u32 = 1;

/// Local-time format used in event payloads.
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// "What moved" notification, published once per detection run that kept at least one box.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub schema_version: u32,
    /// JPEG of the annotated frame. Base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub thumbnail: Vec<u8>,
    pub labels: Vec<String>,
    /// Labels joined with commas.
    pub content: String,
    pub time: String,
}

impl DetectionEvent {
    /// Returns `None` for an empty label list: no event is published for it.
    pub fn new(thumbnail: Vec<u8>, labels: Vec<String>, captured: SystemTime) -> Option<Self> {
        if labels.is_empty() {
            return None;
        }
        Some(Self {
            schema_version: DETECTION_EVENT_SCHEMA_VERSION,
            thumbnail,
            content: labels.join(","),
            labels,
            time: format_event_time(DateTime::<Local>::from(captured)),
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to serialize detection event")
    }
}

pub fn format_event_time(time: DateTime<Local>) -> String {
    time.format(EVENT_TIME_FORMAT).to_string()
}

/// One JPEG-encoded live-view frame. The encoded bytes are shared between subscribers.
#[derive(Clone, Debug)]
pub struct LiveFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Arc<Vec<u8>>,
}

impl LiveFrame {
    pub fn encode(frame: &Frame, quality: u8) -> Result<Self> {
        let jpeg = encode_jpeg(frame.pixels(), quality)?;
        Ok(Self {
            sequence: frame.sequence(),
            width: frame.width(),
            height: frame.height(),
            jpeg: Arc::new(jpeg),
        })
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("JPEG encoding failed")?;
    Ok(out)
}

/// JPEG thumbnail at most `max_width` wide, aspect ratio kept.
pub fn encode_thumbnail(image: &RgbImage, max_width: u32, quality: u8) -> Result<Vec<u8>> {
    if max_width == 0 || image.width() <= max_width {
        return encode_jpeg(image, quality);
    }
    let height = ((image.height() as u64 * max_width as u64) / image.width() as u64).max(1) as u32;
    let scaled = imageops::resize(image, max_width, height, FilterType::Triangle);
    encode_jpeg(&scaled, quality)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(de::Error::custom)
    }
}
