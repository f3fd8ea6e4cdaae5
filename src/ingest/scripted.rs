use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Test source that hands out a fixed sequence of capture results.
///
/// `None` entries simulate a failed read. An exhausted script fails every read.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    frames: VecDeque<Option<Frame>>,
    connected: bool,
    released: bool,
    frame_count: u64,
    failures: u64,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = Option<Frame>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            ..Self::default()
        }
    }

    /// `count` copies of the same frame.
    pub fn repeat(frame: Frame, count: usize) -> Self {
        Self::new(std::iter::repeat(Some(frame)).take(count))
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for ScriptedSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        self.released = false;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("scripted source not connected"));
        }
        match self.frames.pop_front() {
            Some(Some(frame)) => {
                self.frame_count += 1;
                Ok(frame)
            }
            Some(None) => {
                self.failures += 1;
                Err(anyhow!("scripted capture failure"))
            }
            None => {
                self.failures += 1;
                Err(anyhow!("scripted source exhausted"))
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.connected && !self.frames.is_empty()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            failures: self.failures,
            source: "scripted".to_string(),
        }
    }

    fn release(&mut self) -> Result<()> {
        self.connected = false;
        self.released = true;
        Ok(())
    }
}
