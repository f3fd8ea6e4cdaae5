use anyhow::Result;

use super::Display;
use crate::frame::Frame;

/// Display that keeps only the dimensions of the last shown frame.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    shown: u64,
    last_size: Option<(u32, u32)>,
    closed: bool,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown
    }

    pub fn last_size(&self) -> Option<(u32, u32)> {
        self.last_size
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Display for HeadlessDisplay {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        self.shown += 1;
        self.last_size = Some((frame.width(), frame.height()));
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        false
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
