//! zonewatchd - zone motion watcher daemon
//!
//! This daemon:
//! 1. Captures frames from the configured source, reconnecting on failure
//! 2. Masks each frame to the configured zones and tracks motion episodes
//! 3. Classifies what moved and publishes detection events
//! 4. Publishes a JPEG live view
//! 5. Optionally forwards events to MQTT

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Sender;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use zonewatch::config::{DetectorSettings, ZonewatchConfig};
use zonewatch::detect::{NullDetector, StubDetector};
use zonewatch::transport::MqttForwarder;
use zonewatch::{
    open_source, Annotator, DetectionStage, EventPublisher, LabelSet, MotionStage,
    ObjectDetector, Pipeline, SourceConfig, ZoneConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Zone motion watcher with object classification")]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "ZONEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Capture source URL (overrides the config file).
    #[arg(long)]
    source_url: Option<String>,

    /// Read newline-delimited JSON zone updates from stdin.
    #[arg(long)]
    zones_stdin: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ZonewatchConfig::load_from(args.config.as_deref())?;
    if let Some(url) = args.source_url {
        cfg.source.url = url;
    }
    log::info!(
        "zonewatchd {} starting on {}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url
    );

    let labels = load_labels(&cfg.detector, &cfg.source)?;
    let detector = build_detector(&cfg.detector, &cfg.source)?;
    let annotator = match &cfg.detector.font_path {
        Some(path) => Annotator::with_font_file(path)?,
        None => Annotator::new(),
    };
    if !annotator.has_font() && cfg.detector.model_path.is_some() {
        log::warn!(
            "no detection.font_path configured; thumbnails will show boxes without class labels"
        );
    }
    let detection = DetectionStage::new(
        detector,
        labels,
        annotator,
        cfg.detector.thresholds.clone(),
    )?;
    let motion = MotionStage::with_defaults(cfg.motion.clone())?;
    let publisher = Arc::new(EventPublisher::new(cfg.publish.clone())?);
    let source = open_source(&cfg.source)?;

    let pipeline = Pipeline::new(
        cfg.to_pipeline_config(),
        source,
        motion,
        detection,
        publisher.clone(),
    )?;

    let initial_zones = cfg.zones.clone().unwrap_or_else(|| {
        log::info!("no zones configured; analyzing the whole frame until an update arrives");
        ZoneConfig::new(
            cfg.capture.publish_width,
            cfg.capture.publish_height,
            Vec::new(),
        )
    });
    pipeline
        .zones()
        .update(&initial_zones)
        .context("install initial zones")?;

    let shutdown = pipeline.shutdown_signal();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.trigger()).context("error setting Ctrl-C handler")?;
    }

    let forwarder = match cfg.mqtt.clone() {
        Some(settings) => Some(MqttForwarder::start(settings, &publisher, shutdown.clone())?),
        None => None,
    };

    if args.zones_stdin {
        spawn_stdin_zone_reader(pipeline.zone_updates())?;
    }

    let handle = pipeline.spawn()?;
    log::info!("zonewatchd running (Ctrl-C to stop)");
    let result = handle.wait();

    shutdown.trigger();
    if let Some(forwarder) = forwarder {
        forwarder.join()?;
    }
    let stats = publisher.stats();
    log::info!(
        "zonewatchd stopped: {} detection events, {} motion notifications, {} live frames",
        stats.detection_events,
        stats.motion_notifications,
        stats.live_frames
    );
    result
}

fn load_labels(settings: &DetectorSettings, source: &SourceConfig) -> Result<LabelSet> {
    match &settings.labels_path {
        Some(path) => LabelSet::load(path),
        None if source.is_synthetic() && settings.model_path.is_none() => {
            Ok(LabelSet::from_names(["object"]))
        }
        None => {
            log::warn!("no labels file configured; detections will be labeled by class id");
            Ok(LabelSet::default())
        }
    }
}

fn build_detector(
    settings: &DetectorSettings,
    source: &SourceConfig,
) -> Result<Box<dyn ObjectDetector>> {
    if let Some(model_path) = &settings.model_path {
        #[cfg(feature = "backend-tract")]
        {
            let detector = zonewatch::detect::TractDetector::new(model_path, settings.input_size)?;
            log::info!("loaded detector model {}", model_path.display());
            return Ok(Box::new(detector));
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            anyhow::bail!(
                "model {} requires the backend-tract feature",
                model_path.display()
            );
        }
    }
    if source.is_synthetic() {
        return Ok(Box::new(StubDetector::new()));
    }
    log::warn!("no detector model configured; motion is reported but never classified");
    Ok(Box::new(NullDetector))
}

fn spawn_stdin_zone_reader(updates: Sender<ZoneConfig>) -> Result<()> {
    std::thread::Builder::new()
        .name("zonewatch-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::warn!("stdin zone reader stopped: {}", e);
                        return;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match ZoneConfig::from_json(&line) {
                    Ok(config) => {
                        if updates.send(config).is_err() {
                            return;
                        }
                    }
                    Err(e) => log::warn!("{:#}", e),
                }
            }
        })
        .context("failed to spawn stdin zone reader")?;
    Ok(())
}
