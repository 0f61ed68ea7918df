use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use image::RgbImage;

use zonewatch::capture::{CaptureConfig, CaptureLoop, MotionJob};
use zonewatch::{EventPublisher, Frame, FrameSource, PublisherConfig, Shutdown, ZoneConfig, ZoneStore};

/// Source whose first `failures` reads fail; later reads yield frames, or nothing.
struct ScriptedSource {
    failures: u64,
    empty_reads: bool,
    opens: Arc<AtomicU64>,
    reads: Arc<AtomicU64>,
}

impl ScriptedSource {
    fn failing_forever() -> Self {
        Self {
            failures: u64::MAX,
            empty_reads: false,
            opens: Arc::new(AtomicU64::new(0)),
            reads: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn open(&mut self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(anyhow!("stream dropped"));
        }
        std::thread::sleep(Duration::from_millis(1));
        if self.empty_reads {
            return Ok(None);
        }
        Ok(Some(Frame::new(RgbImage::new(32, 24), n)))
    }
}

fn fast_config() -> CaptureConfig {
    CaptureConfig {
        publish_width: 16,
        publish_height: 12,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        ..CaptureConfig::default()
    }
}

fn publisher() -> Arc<EventPublisher> {
    Arc::new(EventPublisher::new(PublisherConfig::default()).unwrap())
}

fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn failing_source_is_reopened_until_shutdown() {
    let source = ScriptedSource::failing_forever();
    let opens = source.opens.clone();
    let (tx, _rx) = bounded::<MotionJob>(4);
    let capture = CaptureLoop::new(
        Box::new(source),
        fast_config(),
        Arc::new(ZoneStore::new(16, 12)),
        publisher(),
        tx,
    )
    .unwrap();
    let counters = capture.counters();

    let shutdown = Shutdown::new();
    let handle = std::thread::spawn({
        let shutdown = shutdown.clone();
        move || capture.run(&shutdown)
    });

    assert!(wait_for(Duration::from_secs(10), || {
        counters.snapshot().reopen_attempts >= 20
    }));
    assert!(!handle.is_finished(), "capture must keep retrying");

    shutdown.trigger();
    handle.join().unwrap().unwrap();

    let stats = counters.snapshot();
    assert_eq!(stats.frames_captured, 0);
    assert!(stats.read_failures >= 19);
    assert!(opens.load(Ordering::SeqCst) >= 20);
}

#[test]
fn startup_limit_gives_up_without_a_frame() {
    let (tx, _rx) = bounded::<MotionJob>(4);
    let config = CaptureConfig {
        max_startup_attempts: Some(3),
        ..fast_config()
    };
    let capture = CaptureLoop::new(
        Box::new(ScriptedSource::failing_forever()),
        config,
        Arc::new(ZoneStore::new(16, 12)),
        publisher(),
        tx,
    )
    .unwrap();

    let err = capture.run(&Shutdown::new()).unwrap_err();
    assert!(format!("{err:#}").contains("failed 3 times"));
}

#[test]
fn empty_frames_are_skipped_without_reopening() {
    let source = ScriptedSource {
        failures: 0,
        empty_reads: true,
        ..ScriptedSource::failing_forever()
    };
    let reads = source.reads.clone();
    let (tx, rx) = bounded::<MotionJob>(4);
    let zones = Arc::new(ZoneStore::new(16, 12));
    zones.update(&ZoneConfig::new(16, 12, Vec::new())).unwrap();
    let capture =
        CaptureLoop::new(Box::new(source), fast_config(), zones, publisher(), tx).unwrap();
    let counters = capture.counters();

    let shutdown = Shutdown::new();
    let handle = std::thread::spawn({
        let shutdown = shutdown.clone();
        move || capture.run(&shutdown)
    });
    assert!(wait_for(Duration::from_secs(10), || {
        reads.load(Ordering::SeqCst) >= 10
    }));
    shutdown.trigger();
    handle.join().unwrap().unwrap();

    let stats = counters.snapshot();
    assert_eq!(stats.reopen_attempts, 1);
    assert_eq!(stats.read_failures, 0);
    assert_eq!(stats.frames_captured, 0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn recovers_and_hands_resized_frames_to_motion() {
    let source = ScriptedSource {
        failures: 3,
        ..ScriptedSource::failing_forever()
    };
    let (tx, rx) = bounded::<MotionJob>(64);
    let zones = Arc::new(ZoneStore::new(16, 12));
    zones.update(&ZoneConfig::new(32, 24, Vec::new())).unwrap();
    let capture =
        CaptureLoop::new(Box::new(source), fast_config(), zones, publisher(), tx).unwrap();
    let counters = capture.counters();

    let shutdown = Shutdown::new();
    let handle = std::thread::spawn({
        let shutdown = shutdown.clone();
        move || capture.run(&shutdown)
    });

    let job = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(job.frame.dimensions(), (16, 12));
    assert!(job.zones.is_empty());

    shutdown.trigger();
    handle.join().unwrap().unwrap();

    let stats = counters.snapshot();
    assert_eq!(stats.read_failures, 3);
    assert_eq!(stats.reopen_attempts, 4);
    assert!(stats.frames_captured >= 1);
}

#[test]
fn frames_without_zone_config_are_not_analyzed() {
    let source = ScriptedSource {
        failures: 0,
        ..ScriptedSource::failing_forever()
    };
    let reads = source.reads.clone();
    let (tx, rx) = bounded::<MotionJob>(64);
    let capture = CaptureLoop::new(
        Box::new(source),
        fast_config(),
        Arc::new(ZoneStore::new(16, 12)),
        publisher(),
        tx,
    )
    .unwrap();
    let counters = capture.counters();

    let shutdown = Shutdown::new();
    let handle = std::thread::spawn({
        let shutdown = shutdown.clone();
        move || capture.run(&shutdown)
    });
    assert!(wait_for(Duration::from_secs(10), || {
        reads.load(Ordering::SeqCst) >= 5
    }));
    shutdown.trigger();
    handle.join().unwrap().unwrap();

    assert!(counters.snapshot().frames_captured >= 1);
    assert!(rx.try_recv().is_err());
}
