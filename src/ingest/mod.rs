//! Frame sources.
//!
//! This module provides the capture side of the loop:
//! - V4L2 devices (feature: ingest-v4l2), with a synthetic `stub://` backend
//! - A directory of still images replayed in order (`dir:/path`)
//! - A scripted source for tests
//!
//! Every source normalizes to packed RGB24 `Frame`s. Capture is synchronous:
//! `next_frame` blocks for at most one device read.

use anyhow::{anyhow, Result};

use crate::frame::Frame;

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod scripted;
pub mod still;
pub mod v4l2;

pub use scripted::ScriptedSource;
pub use still::StillSource;
pub use v4l2::{V4l2Config, V4l2Source};

/// Prefix selecting a `StillSource`.
pub const STILL_PREFIX: &str = "dir:";

/// Capture device as seen by the loop.
pub trait FrameSource {
    /// Open the device. Called once before the first `next_frame`.
    fn connect(&mut self) -> Result<()>;

    /// Read the next frame. An error means "no frame this iteration", not a fatal fault.
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Release the device. Later `next_frame` calls fail until `connect` is called again.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }
}

/// Capture counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub failures: u64,
    pub source: String,
}

/// Capture settings shared by every source kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    /// `stub://name`, `dir:/path/to/images`, or a device path such as `/dev/video0`.
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            uri: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// Build the source named by `settings.uri`. The returned source is not connected yet.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let uri = settings.uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("source must not be empty"));
    }
    if let Some(dir) = uri.strip_prefix(STILL_PREFIX) {
        return Ok(Box::new(StillSource::new(dir)));
    }
    if uri.contains("://") && !uri.starts_with("stub://") {
        return Err(anyhow!("unsupported source scheme: {}", uri));
    }
    Ok(Box::new(V4l2Source::new(V4l2Config {
        device: uri.to_string(),
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    })?))
}
