//! Child-process detector.
//!
//! stdout and stderr are read by one thread each and merged into a single
//! channel, so the loop sees the combined stream line by line. Polling is a
//! `recv_timeout` on that channel.

use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use super::DetectorProcess;

const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(500);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Fixed command used to launch the detector.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Extra environment for the child (e.g. the meeting room name the camera SDK reads).
    pub env: Vec<(String, String)>,
    /// How long `stop` waits after SIGTERM before killing.
    pub stop_grace: Duration,
}

impl DetectorCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

enum StreamEvent {
    Line(String),
    Closed,
}

/// Detector backed by a spawned child process.
pub struct ChildDetector {
    command: DetectorCommand,
    label: String,
    child: Option<Child>,
    lines: Option<Receiver<StreamEvent>>,
    open_streams: usize,
    exit_status: Option<ExitStatus>,
    lines_read: u64,
}

impl ChildDetector {
    pub fn new(command: DetectorCommand) -> Self {
        let label = command.display();
        Self {
            command,
            label,
            child: None,
            lines: None,
            open_streams: 0,
            exit_status: None,
            lines_read: 0,
        }
    }

    /// Exit status of the last run, once reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Lines delivered since construction (across restarts).
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// OS process id of the running child.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|child| child.id())
    }

    fn try_reap(&mut self) -> bool {
        if self.exit_status.is_some() {
            return true;
        }
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                log::info!("detector `{}` exited with {}", self.label, status);
                self.exit_status = Some(status);
                true
            }
            Ok(None) => false,
            Err(err) => {
                log::warn!("detector `{}`: wait failed: {}", self.label, err);
                false
            }
        }
    }
}

impl DetectorProcess for ChildDetector {
    fn name(&self) -> &str {
        &self.label
    }

    fn start(&mut self) -> Result<()> {
        if self.child.is_some() && self.exit_status.is_none() {
            return Ok(());
        }
        // Reap whatever is left of a previous run.
        self.stop()?;

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.command.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to launch detector `{}`", self.label))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("detector stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("detector stderr not captured"))?;

        let (tx, rx) = mpsc::channel();
        spawn_reader(stdout, tx.clone(), "stdout")?;
        spawn_reader(stderr, tx, "stderr")?;

        log::info!("detector `{}` started (pid {})", self.label, child.id());
        self.child = Some(child);
        self.lines = Some(rx);
        self.open_streams = 2;
        self.exit_status = None;
        Ok(())
    }

    fn poll_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(rx) = self.lines.as_ref() else {
                return Err(anyhow!("detector `{}` not started", self.label));
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.open_streams == 0 {
                // Output is exhausted; still honor the wait so callers do not spin.
                std::thread::sleep(remaining);
                return Ok(None);
            }
            match rx.recv_timeout(remaining) {
                Ok(StreamEvent::Line(line)) => {
                    self.lines_read += 1;
                    return Ok(Some(line));
                }
                Ok(StreamEvent::Closed) => {
                    self.open_streams = self.open_streams.saturating_sub(1);
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    self.open_streams = 0;
                }
            }
        }
    }

    fn has_exited(&mut self) -> bool {
        self.child.is_some() && self.open_streams == 0 && self.try_reap()
    }

    fn stop(&mut self) -> Result<()> {
        self.lines = None;
        self.open_streams = 0;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if self.exit_status.is_some() {
            return Ok(());
        }
        if child
            .try_wait()
            .context("poll detector before stop")?
            .is_none()
        {
            terminate(&mut child, self.command.stop_grace)
                .with_context(|| format!("failed to stop detector `{}`", self.label))?;
        }
        let status = child.wait().context("reap detector")?;
        log::info!("detector `{}` stopped ({})", self.label, status);
        self.exit_status = Some(status);
        Ok(())
    }
}

impl Drop for ChildDetector {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("{:#}", err);
        }
    }
}

fn spawn_reader<R>(stream: R, tx: Sender<StreamEvent>, stream_name: &'static str) -> Result<()>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("detector-{stream_name}"))
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf)
                            .trim_end_matches(&['\r', '\n'][..])
                            .to_string();
                        if tx.send(StreamEvent::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        log::warn!("detector {}: read failed: {}", stream_name, err);
                        break;
                    }
                }
            }
            let _ = tx.send(StreamEvent::Closed);
        })
        .with_context(|| format!("spawn detector {stream_name} reader"))?;
    Ok(())
}

/// SIGTERM, then SIGKILL once `grace` has passed.
#[cfg(target_os = "linux")]
fn terminate(child: &mut Child, grace: Duration) -> Result<()> {
    let pid = libc::pid_t::try_from(child.id()).context("detector pid out of range")?;
    // SAFETY: plain kill(2) on a pid we spawned and have not yet reaped.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
        log::warn!("detector pid {} ignored SIGTERM, killing", pid);
    }
    kill_if_running(child)
}

#[cfg(not(target_os = "linux"))]
fn terminate(child: &mut Child, _grace: Duration) -> Result<()> {
    kill_if_running(child)
}

fn kill_if_running(child: &mut Child) -> Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    child.kill()?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ChildDetector {
        ChildDetector::new(DetectorCommand::new("sh").with_args(["-c", script]))
    }

    fn drain(detector: &mut ChildDetector) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match detector.poll_line(Duration::from_millis(50))? {
                Some(line) => lines.push(line),
                None if detector.has_exited() => break,
                None => {}
            }
        }
        Ok(lines)
    }

    #[test]
    fn merges_stdout_and_stderr() -> Result<()> {
        let mut detector = sh("echo '[]'; echo 'warming up' >&2; printf 'no newline'");
        detector.start()?;

        let mut lines = drain(&mut detector)?;
        lines.sort();
        assert_eq!(lines, vec!["[]", "no newline", "warming up"]);
        assert!(detector.has_exited());
        assert!(detector.exit_status().is_some_and(|s| s.success()));
        Ok(())
    }

    #[test]
    fn poll_is_bounded_when_silent() -> Result<()> {
        let mut detector = sh("sleep 5");
        detector.start()?;

        let started = Instant::now();
        assert_eq!(detector.poll_line(Duration::from_millis(30))?, None);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!detector.has_exited());

        detector.stop()?;
        assert!(detector.exit_status().is_some());
        assert!(detector.pid().is_none());
        Ok(())
    }

    #[test]
    fn passes_environment_to_child() -> Result<()> {
        let mut detector = ChildDetector::new(
            DetectorCommand::new("sh")
                .with_args(["-c", "echo room=$HUDDLY_MEETING_ROOM"])
                .with_env("HUDDLY_MEETING_ROOM", "TEST_ROOM"),
        );
        detector.start()?;
        assert_eq!(drain(&mut detector)?, vec!["room=TEST_ROOM"]);
        Ok(())
    }

    #[test]
    fn launch_failure_is_an_error() {
        let mut detector = ChildDetector::new(DetectorCommand::new(
            "/nonexistent/detector-binary-for-tests",
        ));
        assert!(detector.start().is_err());
        assert!(detector.poll_line(Duration::from_millis(1)).is_err());
    }

    #[test]
    fn stop_is_idempotent() -> Result<()> {
        let mut detector = sh("sleep 5");
        detector.start()?;
        detector.stop()?;
        detector.stop()?;
        Ok(())
    }
}
