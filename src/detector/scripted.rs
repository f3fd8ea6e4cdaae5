use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::time::Duration;

use super::DetectorProcess;

/// One scripted poll result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    /// Deliver this line.
    Line(String),
    /// Nothing ready within the timeout.
    Silence,
    /// The process terminates; later polls see nothing until restarted.
    Exit,
}

/// Test double that replays a fixed script, one step per poll.
///
/// Polls never sleep. Once the script is exhausted every poll is `Silence`.
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    steps: VecDeque<ScriptStep>,
    running: bool,
    exited: bool,
    failing_starts: u32,
    starts: u32,
    stops: u32,
    polls: u64,
}

impl ScriptedDetector {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Script consisting only of lines.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(lines.into_iter().map(|l| ScriptStep::Line(l.into())))
    }

    /// Make the next `count` calls to `start` fail.
    pub fn fail_starts(mut self, count: u32) -> Self {
        self.failing_starts = count;
        self
    }

    pub fn starts(&self) -> u32 {
        self.starts
    }

    pub fn stops(&self) -> u32 {
        self.stops
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl DetectorProcess for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn start(&mut self) -> Result<()> {
        if self.failing_starts > 0 {
            self.failing_starts -= 1;
            return Err(anyhow!("scripted start failure"));
        }
        if !self.running {
            self.starts += 1;
        }
        self.running = true;
        self.exited = false;
        Ok(())
    }

    fn poll_line(&mut self, _timeout: Duration) -> Result<Option<String>> {
        if !self.running && !self.exited {
            return Err(anyhow!("scripted detector not started"));
        }
        self.polls += 1;
        if self.exited {
            return Ok(None);
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Line(line)) => Ok(Some(line)),
            Some(ScriptStep::Exit) => {
                self.running = false;
                self.exited = true;
                Ok(None)
            }
            Some(ScriptStep::Silence) | None => Ok(None),
        }
    }

    fn has_exited(&mut self) -> bool {
        self.exited
    }

    fn stop(&mut self) -> Result<()> {
        if self.running {
            self.stops += 1;
        }
        self.running = false;
        Ok(())
    }
}
