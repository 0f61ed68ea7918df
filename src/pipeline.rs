//! Pipeline coordinator: owns the zone state, wires the stages and runs them.
//!
//! Threads:
//! - `zonewatch-zones`: validates and installs zone updates.
//! - `zonewatch-capture`: the [`CaptureLoop`].
//! - `zonewatch-motion`: masks each frame and runs the [`MotionStage`], in capture order.
//! - `zonewatch-detect`: runs the [`DetectionStage`] on triggered frames.
//!
//! Handoffs into motion and detection use bounded channels with `try_send`, so a slow stage
//! drops work instead of stalling capture.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};

use crate::capture::{CaptureConfig, CaptureCounters, CaptureLoop, CaptureStats, MotionJob};
use crate::detect::DetectionStage;
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::mask::apply_zone_mask;
use crate::motion::{MotionNotification, MotionStage, MotionStep};
use crate::publish::EventPublisher;
use crate::shutdown::Shutdown;
use crate::zone::{MappedZones, ZoneConfig, ZoneStore};

/// Which motion notifications hand a frame to the detection stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerPolicy {
    pub on_start: bool,
    pub on_sustained: bool,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            on_start: true,
            on_sustained: true,
        }
    }
}

impl TriggerPolicy {
    pub fn triggers(&self, notification: &MotionNotification) -> bool {
        match notification {
            MotionNotification::Started => self.on_start,
            MotionNotification::Sustained { .. } => self.on_sustained,
            MotionNotification::Ended { .. } => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub trigger: TriggerPolicy,
    /// Frames waiting for the motion stage.
    pub motion_queue: usize,
    /// Frames waiting for the detection stage.
    pub detection_queue: usize,
    /// Zone updates waiting to be installed.
    pub zone_queue: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            trigger: TriggerPolicy::default(),
            motion_queue: 4,
            detection_queue: 1,
            zone_queue: 8,
        }
    }
}

/// An assembled, not yet running pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn FrameSource>,
    motion: MotionStage,
    detection: DetectionStage,
    publisher: Arc<EventPublisher>,
    zones: Arc<ZoneStore>,
    zone_tx: Sender<ZoneConfig>,
    zone_rx: Receiver<ZoneConfig>,
    shutdown: Shutdown,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        motion: MotionStage,
        detection: DetectionStage,
        publisher: Arc<EventPublisher>,
    ) -> Result<Self> {
        config.capture.validate()?;
        let zones = Arc::new(ZoneStore::new(
            config.capture.publish_width,
            config.capture.publish_height,
        ));
        let (zone_tx, zone_rx) = bounded(config.zone_queue.max(1));
        Ok(Self {
            config,
            source,
            motion,
            detection,
            publisher,
            zones,
            zone_tx,
            zone_rx,
            shutdown: Shutdown::new(),
        })
    }

    /// Channel for zone updates. Each message replaces the live configuration.
    pub fn zone_updates(&self) -> Sender<ZoneConfig> {
        self.zone_tx.clone()
    }

    pub fn zones(&self) -> Arc<ZoneStore> {
        self.zones.clone()
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn publisher(&self) -> Arc<EventPublisher> {
        self.publisher.clone()
    }

    /// Start every stage on its own thread.
    pub fn spawn(self) -> Result<PipelineHandle> {
        let Pipeline {
            config,
            source,
            motion,
            mut detection,
            publisher,
            zones,
            zone_tx,
            zone_rx,
            shutdown,
        } = self;

        detection.warm_up()?;

        let (motion_tx, motion_rx) = bounded::<MotionJob>(config.motion_queue.max(1));
        let (detect_tx, detect_rx) = bounded::<Frame>(config.detection_queue.max(1));

        let capture = CaptureLoop::new(
            source,
            config.capture.clone(),
            zones.clone(),
            publisher.clone(),
            motion_tx,
        )?;
        let counters = capture.counters();

        let mut threads = Vec::new();

        threads.push(spawn_named("zonewatch-zones", {
            let zones = zones.clone();
            let shutdown = shutdown.clone();
            move || run_zone_updates(zone_rx, zones, shutdown)
        })?);

        threads.push(spawn_named("zonewatch-detect", {
            let publisher = publisher.clone();
            let shutdown = shutdown.clone();
            move || run_detection(detect_rx, detection, publisher, shutdown)
        })?);

        threads.push(spawn_named("zonewatch-motion", {
            let publisher = publisher.clone();
            let shutdown = shutdown.clone();
            let trigger = config.trigger;
            move || run_motion(motion_rx, motion, detect_tx, trigger, publisher, shutdown)
        })?);

        threads.push(spawn_named("zonewatch-capture", {
            let shutdown = shutdown.clone();
            move || {
                let result = capture.run(&shutdown);
                if result.is_err() {
                    shutdown.trigger();
                }
                result
            }
        })?);

        Ok(PipelineHandle {
            threads,
            shutdown,
            counters,
            zone_tx,
            zones,
            publisher,
        })
    }
}

/// Running pipeline.
pub struct PipelineHandle {
    threads: Vec<(&'static str, JoinHandle<Result<()>>)>,
    shutdown: Shutdown,
    counters: Arc<CaptureCounters>,
    zone_tx: Sender<ZoneConfig>,
    zones: Arc<ZoneStore>,
    publisher: Arc<EventPublisher>,
}

impl PipelineHandle {
    pub fn capture_stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn zone_updates(&self) -> Sender<ZoneConfig> {
        self.zone_tx.clone()
    }

    pub fn zones(&self) -> Arc<ZoneStore> {
        self.zones.clone()
    }

    pub fn publisher(&self) -> Arc<EventPublisher> {
        self.publisher.clone()
    }

    /// Trigger shutdown and wait for every stage to stop.
    pub fn shutdown(self) -> Result<()> {
        self.shutdown.trigger();
        self.wait()
    }

    /// Wait for every stage to stop. Returns the first stage error.
    pub fn wait(self) -> Result<()> {
        let mut first_error = None;
        for (name, handle) in self.threads {
            let result = handle
                .join()
                .map_err(|_| anyhow!("{} thread panicked", name))
                .and_then(|r| r.with_context(|| format!("{} thread failed", name)));
            if let Err(e) = result {
                log::error!("{:#}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn spawn_named<F>(name: &'static str, body: F) -> Result<(&'static str, JoinHandle<Result<()>>)>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .with_context(|| format!("failed to spawn {} thread", name))?;
    Ok((name, handle))
}

fn run_zone_updates(
    updates: Receiver<ZoneConfig>,
    zones: Arc<ZoneStore>,
    shutdown: Shutdown,
) -> Result<()> {
    loop {
        select! {
            recv(shutdown.receiver()) -> _ => return Ok(()),
            recv(updates) -> msg => {
                let Ok(config) = msg else { return Ok(()) };
                match zones.update(&config) {
                    Ok(mapped) => log::info!(
                        "zones updated: {} polygon(s) from {}x{} viewport",
                        mapped.polygons().len(),
                        config.viewport_size.width,
                        config.viewport_size.height
                    ),
                    Err(e) => log::warn!("ignoring zone update: {:#}", e),
                }
            }
        }
    }
}

/// Masks frames with the zones they were captured under and feeds the motion stage.
///
/// A new zone configuration changes which pixels are blanked, so the background learned
/// under the old mask is dropped.
struct MaskedMotion {
    stage: MotionStage,
    zones: Option<Arc<MappedZones>>,
}

impl MaskedMotion {
    fn new(stage: MotionStage) -> Self {
        Self { stage, zones: None }
    }

    fn process(&mut self, job: &MotionJob) -> Result<(Frame, MotionStep)> {
        let changed = self
            .zones
            .as_ref()
            .map_or(true, |current| !Arc::ptr_eq(current, &job.zones));
        if changed {
            if self.zones.is_some() {
                log::debug!("motion: zones changed, relearning background");
            }
            self.stage.reset_background();
            self.zones = Some(job.zones.clone());
        }
        let masked = apply_zone_mask(&job.frame, &job.zones);
        let step = self.stage.process(&masked)?;
        Ok((masked, step))
    }
}

fn run_motion(
    jobs: Receiver<MotionJob>,
    stage: MotionStage,
    detection: Sender<Frame>,
    trigger: TriggerPolicy,
    publisher: Arc<EventPublisher>,
    shutdown: Shutdown,
) -> Result<()> {
    log::info!("motion: using {} extractor", stage.extractor_name());
    let mut motion = MaskedMotion::new(stage);
    loop {
        let job = select! {
            recv(shutdown.receiver()) -> _ => return Ok(()),
            recv(jobs) -> msg => match msg {
                Ok(job) => job,
                Err(_) => return Ok(()),
            },
        };

        let (masked, step) = match motion.process(&job) {
            Ok(processed) => processed,
            Err(e) => {
                log::warn!("motion: frame {} skipped: {:#}", job.frame.sequence(), e);
                continue;
            }
        };
        let Some(notification) = step.notification else {
            continue;
        };

        log::info!("motion: {:?} ({} regions)", notification, step.measurement.regions);
        publisher.publish_motion(notification)?;

        if trigger.triggers(&notification) {
            match detection.try_send(masked) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    log::debug!("detection busy; frame {} not classified", frame.sequence());
                }
                Err(TrySendError::Disconnected(_)) => return Ok(()),
            }
        }
    }
}

fn run_detection(
    frames: Receiver<Frame>,
    mut stage: DetectionStage,
    publisher: Arc<EventPublisher>,
    shutdown: Shutdown,
) -> Result<()> {
    log::info!(
        "detection: using {} detector (confidence > {}, iou > {}, at most {} boxes)",
        stage.detector_name(),
        stage.config().confidence_threshold,
        stage.config().iou_threshold,
        stage.config().max_detections
    );
    loop {
        let frame = select! {
            recv(shutdown.receiver()) -> _ => return Ok(()),
            recv(frames) -> msg => match msg {
                Ok(frame) => frame,
                Err(_) => return Ok(()),
            },
        };

        match stage.run(&frame) {
            Ok(outcome) => {
                publisher.publish_detection(&outcome)?;
            }
            Err(e) => log::warn!("detection: frame {} skipped: {:#}", frame.sequence(), e),
        }
    }
}
