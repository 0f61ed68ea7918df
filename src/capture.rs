//! Capture loop: read, reconnect on failure, resize, hand off.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use crossbeam_channel::{Sender, TrySendError};

use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::publish::EventPublisher;
use crate::shutdown::Shutdown;
use crate::zone::{MappedZones, ZoneStore};

/// Publish resolution used by the operator UI.
pub const DEFAULT_PUBLISH_WIDTH: u32 = 854;
pub const DEFAULT_PUBLISH_HEIGHT: u32 = 480;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    pub publish_width: u32,
    pub publish_height: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Give up after this many consecutive failures if no frame was ever captured.
    /// `None` retries forever.
    pub max_startup_attempts: Option<u32>,
    pub health_log_interval: Duration,
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.publish_width == 0 || self.publish_height == 0 {
            bail!(
                "publish resolution must be non-zero (got {}x{})",
                self.publish_width,
                self.publish_height
            );
        }
        if self.initial_backoff > self.max_backoff {
            bail!(
                "initial backoff {:?} exceeds max backoff {:?}",
                self.initial_backoff,
                self.max_backoff
            );
        }
        if self.max_startup_attempts == Some(0) {
            bail!("max startup attempts must be at least 1 when set");
        }
        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            publish_width: DEFAULT_PUBLISH_WIDTH,
            publish_height: DEFAULT_PUBLISH_HEIGHT,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_startup_attempts: None,
            health_log_interval: Duration::from_secs(5),
        }
    }
}

/// Exponential backoff between reopen attempts.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now. Doubles the next one, up to the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// A zone-masking and motion job for one captured frame.
#[derive(Clone, Debug)]
pub struct MotionJob {
    pub frame: Frame,
    pub zones: Arc<MappedZones>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    /// Failed opens and reads.
    pub read_failures: u64,
    pub reopen_attempts: u64,
    /// Frames not handed to the motion stage because it was busy.
    pub dropped_motion_jobs: u64,
}

#[derive(Debug, Default)]
pub struct CaptureCounters {
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
    reopen_attempts: AtomicU64,
    dropped_motion_jobs: AtomicU64,
}

impl CaptureCounters {
    pub fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            reopen_attempts: self.reopen_attempts.load(Ordering::Relaxed),
            dropped_motion_jobs: self.dropped_motion_jobs.load(Ordering::Relaxed),
        }
    }
}

/// Sequential capture loop. Runs until shutdown; read failures are never fatal unless a
/// startup attempt limit is configured and no frame was ever captured.
pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    config: CaptureConfig,
    zones: Arc<ZoneStore>,
    publisher: Arc<EventPublisher>,
    motion_jobs: Sender<MotionJob>,
    counters: Arc<CaptureCounters>,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        config: CaptureConfig,
        zones: Arc<ZoneStore>,
        publisher: Arc<EventPublisher>,
        motion_jobs: Sender<MotionJob>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            zones,
            publisher,
            motion_jobs,
            counters: Arc::new(CaptureCounters::default()),
        })
    }

    pub fn counters(&self) -> Arc<CaptureCounters> {
        self.counters.clone()
    }

    pub fn run(mut self, shutdown: &Shutdown) -> Result<()> {
        let description = self.source.describe();
        log::info!("capture: starting on {}", description);

        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut needs_open = true;
        let mut ever_captured = false;
        let mut consecutive_failures: u32 = 0;
        let mut last_health = Instant::now();

        while !shutdown.is_triggered() {
            if last_health.elapsed() >= self.config.health_log_interval {
                let stats = self.counters.snapshot();
                log::info!(
                    "capture health: frames={} failures={} reopens={} dropped_motion={}",
                    stats.frames_captured,
                    stats.read_failures,
                    stats.reopen_attempts,
                    stats.dropped_motion_jobs
                );
                last_health = Instant::now();
            }

            let step = if needs_open {
                self.counters.reopen_attempts.fetch_add(1, Ordering::Relaxed);
                self.source.open().map(|()| None)
            } else {
                self.source.read()
            };

            match step {
                Ok(_) if needs_open => {
                    needs_open = false;
                }
                Ok(None) => {}
                Ok(Some(frame)) if frame.is_empty() => {}
                Ok(Some(frame)) => {
                    ever_captured = true;
                    consecutive_failures = 0;
                    backoff.reset();
                    self.handle_frame(frame)?;
                }
                Err(e) => {
                    self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if !ever_captured {
                        if let Some(limit) = self.config.max_startup_attempts {
                            if consecutive_failures >= limit {
                                bail!(
                                    "capture source {} failed {} times before the first frame: {:#}",
                                    description,
                                    consecutive_failures,
                                    e
                                );
                            }
                        }
                    }
                    let delay = backoff.next_delay();
                    log::warn!(
                        "capture: {} failed ({:#}); reopening in {:?}",
                        description,
                        e,
                        delay
                    );
                    needs_open = true;
                    if shutdown.wait_timeout(delay) {
                        break;
                    }
                }
            }
        }

        log::info!("capture: stopped on {}", description);
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);

        let frame = frame.resized(self.config.publish_width, self.config.publish_height);
        if let Err(e) = self.publisher.publish_live(&frame) {
            log::warn!("capture: live view publish failed: {:#}", e);
        }

        let Some(zones) = self.zones.snapshot()? else {
            return Ok(());
        };
        match self.motion_jobs.try_send(MotionJob { frame, zones }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters
                    .dropped_motion_jobs
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("capture: motion stage is gone; frame not analyzed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn config_validation() {
        assert!(CaptureConfig::default().validate().is_ok());
        let zero = CaptureConfig {
            publish_width: 0,
            ..CaptureConfig::default()
        };
        assert!(zero.validate().is_err());
        let inverted = CaptureConfig {
            initial_backoff: Duration::from_secs(10),
            ..CaptureConfig::default()
        };
        assert!(inverted.validate().is_err());
    }
}
