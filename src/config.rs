use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{CaptureConfig, DEFAULT_PUBLISH_HEIGHT, DEFAULT_PUBLISH_WIDTH};
use crate::detect::DetectionConfig;
use crate::ingest::SourceConfig;
use crate::motion::MotionConfig;
use crate::pipeline::{PipelineConfig, TriggerPolicy};
use crate::publish::PublisherConfig;
use crate::transport::MqttSettings;
use crate::zone::ZoneConfig;

const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_SOURCE_FPS: u32 = 15;
const DEFAULT_SOURCE_WIDTH: u32 = 1280;
const DEFAULT_SOURCE_HEIGHT: u32 = 720;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
const DEFAULT_MAX_BACKOFF_MS: u64 = 5_000;
const DEFAULT_DETECTOR_INPUT_SIZE: u32 = 416;
const DEFAULT_MQTT_CLIENT_ID: &str = "zonewatchd";
const DEFAULT_MQTT_TOPIC_PREFIX: &str = "zonewatch";

#[derive(Debug, Deserialize, Default)]
struct ZonewatchConfigFile {
    capture: Option<CaptureConfigFile>,
    motion: Option<MotionConfigFile>,
    detection: Option<DetectionConfigFile>,
    publish: Option<PublishConfigFile>,
    mqtt: Option<MqttConfigFile>,
    zones: Option<ZoneConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    publish_width: Option<u32>,
    publish_height: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    max_startup_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    binary_threshold: Option<u8>,
    min_contour_area: Option<f64>,
    max_regions: Option<usize>,
    ended_min_secs: Option<f64>,
    sustained_tolerance_ms: Option<u64>,
    learning_rate: Option<f32>,
    trigger_on_start: Option<bool>,
    trigger_on_sustained: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    font_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    iou: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PublishConfigFile {
    live_buffer: Option<usize>,
    event_buffer: Option<usize>,
    jpeg_quality: Option<u8>,
    thumbnail_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    client_id: Option<String>,
    topic_prefix: Option<String>,
    username: Option<String>,
    password: Option<String>,
    publish_live: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ZonewatchConfig {
    pub source: SourceConfig,
    pub capture: CaptureConfig,
    pub motion: MotionConfig,
    pub trigger: TriggerPolicy,
    pub detector: DetectorSettings,
    pub publish: PublisherConfig,
    pub mqtt: Option<MqttSettings>,
    /// Zones installed at startup, before any update arrives.
    pub zones: Option<ZoneConfig>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
    pub input_size: u32,
    pub thresholds: DetectionConfig,
}

impl ZonewatchConfig {
    /// Load from the file named by `ZONEWATCH_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ZONEWATCH_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            capture: self.capture.clone(),
            trigger: self.trigger,
            ..PipelineConfig::default()
        }
    }

    fn from_file(file: ZonewatchConfigFile) -> Result<Self> {
        let capture_file = file.capture.unwrap_or_default();
        let source = SourceConfig {
            url: capture_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            width: capture_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: capture_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            target_fps: capture_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
        };
        let capture = CaptureConfig {
            publish_width: capture_file.publish_width.unwrap_or(DEFAULT_PUBLISH_WIDTH),
            publish_height: capture_file.publish_height.unwrap_or(DEFAULT_PUBLISH_HEIGHT),
            initial_backoff: Duration::from_millis(
                capture_file
                    .initial_backoff_ms
                    .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS),
            ),
            max_backoff: Duration::from_millis(
                capture_file.max_backoff_ms.unwrap_or(DEFAULT_MAX_BACKOFF_MS),
            ),
            max_startup_attempts: capture_file.max_startup_attempts,
            ..CaptureConfig::default()
        };

        let motion_file = file.motion.unwrap_or_default();
        let ended_min_duration = match motion_file.ended_min_secs {
            Some(secs) if secs.is_finite() && secs >= 0.0 => Duration::from_secs_f64(secs),
            Some(secs) => bail!("motion.ended_min_secs must be a non-negative number, got {}", secs),
            None => MotionConfig::DEFAULT_ENDED_MIN_DURATION,
        };
        let motion = MotionConfig {
            binary_threshold: motion_file
                .binary_threshold
                .unwrap_or(MotionConfig::DEFAULT_BINARY_THRESHOLD),
            min_contour_area: motion_file
                .min_contour_area
                .unwrap_or(MotionConfig::DEFAULT_MIN_CONTOUR_AREA),
            max_regions: motion_file
                .max_regions
                .unwrap_or(MotionConfig::DEFAULT_MAX_REGIONS),
            ended_min_duration,
            sustained_tolerance: motion_file
                .sustained_tolerance_ms
                .map(Duration::from_millis)
                .unwrap_or(MotionConfig::DEFAULT_SUSTAINED_TOLERANCE),
            learning_rate: motion_file
                .learning_rate
                .unwrap_or(MotionConfig::default().learning_rate),
        };
        let trigger = TriggerPolicy {
            on_start: motion_file.trigger_on_start.unwrap_or(true),
            on_sustained: motion_file.trigger_on_sustained.unwrap_or(true),
        };

        let detection_file = file.detection.unwrap_or_default();
        let detector = DetectorSettings {
            model_path: detection_file.model_path,
            labels_path: detection_file.labels_path,
            font_path: detection_file.font_path,
            input_size: detection_file
                .input_size
                .unwrap_or(DEFAULT_DETECTOR_INPUT_SIZE),
            thresholds: DetectionConfig {
                confidence_threshold: detection_file
                    .confidence
                    .unwrap_or(DetectionConfig::DEFAULT_CONFIDENCE_THRESHOLD),
                iou_threshold: detection_file
                    .iou
                    .unwrap_or(DetectionConfig::DEFAULT_IOU_THRESHOLD),
                max_detections: detection_file
                    .max_detections
                    .unwrap_or(DetectionConfig::DEFAULT_MAX_DETECTIONS),
            },
        };

        let publish_file = file.publish.unwrap_or_default();
        let publish = PublisherConfig {
            live_buffer: publish_file
                .live_buffer
                .unwrap_or(PublisherConfig::DEFAULT_LIVE_BUFFER),
            event_buffer: publish_file
                .event_buffer
                .unwrap_or(PublisherConfig::DEFAULT_EVENT_BUFFER),
            jpeg_quality: publish_file
                .jpeg_quality
                .unwrap_or(PublisherConfig::DEFAULT_JPEG_QUALITY),
            thumbnail_width: publish_file
                .thumbnail_width
                .unwrap_or(PublisherConfig::DEFAULT_THUMBNAIL_WIDTH),
        };

        let mqtt = match file.mqtt {
            Some(mqtt) => match mqtt.broker {
                Some(broker) => Some(MqttSettings {
                    broker_addr: broker,
                    client_id: mqtt
                        .client_id
                        .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                    topic_prefix: mqtt
                        .topic_prefix
                        .unwrap_or_else(|| DEFAULT_MQTT_TOPIC_PREFIX.to_string()),
                    username: mqtt.username,
                    password: mqtt.password,
                    publish_live: mqtt.publish_live.unwrap_or(false),
                }),
                None => None,
            },
            None => None,
        };

        Ok(Self {
            source,
            capture,
            motion,
            trigger,
            detector,
            publish,
            mqtt,
            zones: file.zones,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("ZONEWATCH_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(path) = std::env::var("ZONEWATCH_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("ZONEWATCH_LABELS_PATH") {
            if !path.trim().is_empty() {
                self.detector.labels_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(value) = std::env::var("ZONEWATCH_CONFIDENCE") {
            self.detector.thresholds.confidence_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("ZONEWATCH_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(value) = std::env::var("ZONEWATCH_IOU") {
            self.detector.thresholds.iou_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("ZONEWATCH_IOU must be a number in [0, 1]"))?;
        }
        if let Ok(broker) = std::env::var("ZONEWATCH_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                match self.mqtt.as_mut() {
                    Some(mqtt) => mqtt.broker_addr = broker,
                    None => {
                        self.mqtt = Some(MqttSettings {
                            broker_addr: broker,
                            client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
                            topic_prefix: DEFAULT_MQTT_TOPIC_PREFIX.to_string(),
                            username: None,
                            password: None,
                            publish_live: false,
                        })
                    }
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            bail!("capture.url must not be empty");
        }
        self.capture.validate()?;
        self.detector.thresholds.validate()?;
        self.publish.validate()?;
        if !(self.motion.learning_rate > 0.0 && self.motion.learning_rate <= 1.0) {
            bail!(
                "motion.learning_rate must be in (0, 1], got {}",
                self.motion.learning_rate
            );
        }
        if !(self.motion.min_contour_area >= 0.0) {
            bail!("motion.min_contour_area must be non-negative");
        }
        if self.detector.input_size == 0 {
            bail!("detection.input_size must be non-zero");
        }
        if let Some(mqtt) = &self.mqtt {
            mqtt.validate()?;
        }
        if let Some(zones) = &self.zones {
            zones.validate()?;
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ZonewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
