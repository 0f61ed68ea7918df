//! Frame sources.
//!
//! - `stub://...` URLs produce a synthetic scene with periodic motion (testing, demos).
//! - Everything else (`rtsp://`, `http://`, `file://`, ...) is decoded with GStreamer
//!   (feature: `rtsp-gstreamer`).
//!
//! Sources are blocking: `read` waits for the next frame. Reconnect policy lives in the
//! capture loop, not here.

#[cfg(feature = "rtsp-gstreamer")]
mod gst;
mod synthetic;

use anyhow::Result;

use crate::frame::Frame;

#[cfg(feature = "rtsp-gstreamer")]
pub use gst::GstreamerSource;
pub use synthetic::SyntheticSource;

/// Frame capture / device transport capability.
pub trait FrameSource: Send {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Open (or reopen) the underlying stream. Called again after every read failure.
    fn open(&mut self) -> Result<()>;

    /// Next frame. `Ok(None)` is an empty frame and is skipped; `Err` means the stream needs
    /// reopening.
    fn read(&mut self) -> Result<Option<Frame>>;
}

/// Configuration for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    /// Stream URL, e.g. `rtsp://192.168.1.100:554/stream` or `stub://demo`.
    pub url: String,
    /// Frame width for synthetic sources.
    pub width: u32,
    /// Frame height for synthetic sources.
    pub height: u32,
    /// Pace synthetic frames at this rate. Zero disables pacing.
    pub target_fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            width: 1280,
            height: 720,
            target_fps: 15,
        }
    }
}

impl SourceConfig {
    pub fn is_synthetic(&self) -> bool {
        self.url.starts_with("stub://")
    }
}

/// Build the source for `config.url`.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.is_synthetic() {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }
    #[cfg(feature = "rtsp-gstreamer")]
    {
        Ok(Box::new(GstreamerSource::new(config.clone())?))
    }
    #[cfg(not(feature = "rtsp-gstreamer"))]
    {
        anyhow::bail!(
            "source {} requires the rtsp-gstreamer feature",
            config.url
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_urls_open_synthetic_source() -> Result<()> {
        let config = SourceConfig {
            url: "stub://test".to_string(),
            width: 64,
            height: 48,
            target_fps: 0,
        };
        let mut source = open_source(&config)?;
        source.open()?;
        let frame = source.read()?.expect("synthetic frame");
        assert_eq!(frame.dimensions(), (64, 48));
        assert!(source.describe().contains("stub://test"));
        Ok(())
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    #[test]
    fn network_urls_need_gstreamer() {
        let config = SourceConfig {
            url: "rtsp://camera.local/stream".to_string(),
            ..SourceConfig::default()
        };
        assert!(open_source(&config).is_err());
    }
}
