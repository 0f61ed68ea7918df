use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use image::RgbImage;

use super::{FrameSource, SourceConfig};
use crate::frame::Frame;

/// GStreamer-decoded stream (RTSP, HTTP, files).
///
/// Pipeline: `uridecodebin ! videoconvert ! video/x-raw,format=RGB ! appsink`. Each `open`
/// tears down the previous pipeline and builds a fresh one.
pub struct GstreamerSource {
    config: SourceConfig,
    pipeline: Option<gstreamer::Pipeline>,
    appsink: Option<gstreamer_app::AppSink>,
    frame_count: u64,
}

impl GstreamerSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self {
            config,
            pipeline: None,
            appsink: None,
            frame_count: 0,
        })
    }

    fn close(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                log::debug!("GstreamerSource: teardown of {} failed: {}", self.config.url, e);
            }
        }
        self.appsink = None;
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(8)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    /// Surface pipeline errors and EOS as read failures.
    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.as_ref().and_then(|p| p.bus()) else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Err(anyhow!("gstreamer reached EOS")),
                _ => {}
            }
        }
        Ok(())
    }
}

impl Drop for GstreamerSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl FrameSource for GstreamerSource {
    fn describe(&self) -> String {
        format!("{} (gstreamer)", self.config.url)
    }

    fn open(&mut self) -> Result<()> {
        self.close();

        let description = format!(
            "uridecodebin uri={} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            self.config.url
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("capture pipeline is not a Pipeline"))?;
        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set capture pipeline to Playing")?;
        log::info!("GstreamerSource: connected to {}", self.config.url);

        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        self.check_bus()?;
        let appsink = self
            .appsink
            .as_ref()
            .ok_or_else(|| anyhow!("source {} is not open", self.config.url))?;

        let timeout = gstreamer::ClockTime::from_mseconds(self.frame_timeout().as_millis() as u64);
        let sample = appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow!("stream {} stalled", self.config.url))?;

        let Some(pixels) = sample_to_image(&sample)? else {
            return Ok(None);
        };
        let frame = Frame::new(pixels, self.frame_count);
        self.frame_count += 1;
        Ok(Some(frame))
    }
}

fn sample_to_image(sample: &gstreamer::Sample) -> Result<Option<RgbImage>> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    if width == 0 || height == 0 {
        return Ok(None);
    }
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map sample buffer")?;
    let data = map.as_slice();

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("sample buffer is truncated")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("sample buffer row is out of bounds")?,
            );
        }
        pixels
    };

    RgbImage::from_raw(width, height, pixels)
        .map(Some)
        .ok_or_else(|| anyhow!("sample size does not match {}x{}", width, height))
}
