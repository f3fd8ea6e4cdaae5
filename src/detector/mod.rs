//! Detector process boundary.
//!
//! The detector is an out-of-process worker that writes line-delimited JSON.
//! The loop only sees the `DetectorProcess` trait:
//! - `ChildDetector`: a real child process with merged stdout/stderr
//! - `ScriptedDetector`: scripted lines for tests and demos
//! - `SupervisedDetector`: restarts an inner detector with bounded backoff

use anyhow::Result;
use std::time::Duration;

mod child;
mod scripted;
mod supervisor;

pub use child::{ChildDetector, DetectorCommand};
pub use scripted::{ScriptStep, ScriptedDetector};
pub use supervisor::{RestartPolicy, SupervisedDetector};

/// Capability boundary around the external detector.
pub trait DetectorProcess {
    /// Human-readable identifier used in logs.
    fn name(&self) -> &str;

    /// Launch the detector. Calling `start` on a running detector is a no-op.
    fn start(&mut self) -> Result<()>;

    /// Wait at most `timeout` for one line of output.
    ///
    /// Returns `Ok(None)` when nothing arrived in time or the output is exhausted.
    fn poll_line(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// True once the detector has terminated and all of its output was consumed.
    fn has_exited(&mut self) -> bool;

    /// Terminate the detector and release its resources. Idempotent.
    fn stop(&mut self) -> Result<()>;
}
