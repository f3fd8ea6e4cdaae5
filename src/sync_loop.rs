//! Synchronized poll loop.
//!
//! One iteration, in this order:
//! 1. poll the detector for one line (bounded by `poll_timeout`)
//! 2. decode it; non-batch lines are echoed as diagnostics
//! 3. pair a decoded batch with the previously captured frame and annotate it
//! 4. capture the next frame
//! 5. render the annotated frame, or the raw frame
//! 6. persist the paired frame and batch (when a store is attached)
//! 7. check for a quit request
//!
//! Pairing is "latest wins": `LoopState` holds one last frame and one
//! annotated frame, each overwritten unconditionally. Frames captured while
//! the detector is busy are dropped without being queued.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::detect::{annotate, decode_line, AnnotationStyle, DecodedLine, DetectionBatch, DiagnosticKind};
use crate::detector::DetectorProcess;
use crate::display::Display;
use crate::frame::{AnnotatedFrame, Frame};
use crate::ingest::FrameSource;
use crate::persist::{ArtifactKey, ArtifactStore};

/// Log target for detector diagnostic lines.
pub const DETECTOR_LOG_TARGET: &str = "detector";

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Longest wait for detector output per iteration.
    pub poll_timeout: Duration,
    pub annotation: AnnotationStyle,
    /// How often `run` logs a health line.
    pub health_interval: Duration,
    /// Stop after this many iterations (headless runs, tests).
    pub max_iterations: Option<u64>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(30),
            annotation: AnnotationStyle::default(),
            health_interval: Duration::from_secs(5),
            max_iterations: None,
        }
    }
}

/// Process-wide quit request, set from a signal handler.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the detector poll produced this iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineOutcome {
    Nothing,
    Batch { detections: usize },
    Diagnostic,
}

/// What was shown this iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rendered {
    Annotated,
    Raw,
    Nothing,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IterationReport {
    pub line: LineOutcome,
    /// The annotated frame was replaced this iteration.
    pub annotated: bool,
    pub frame_captured: bool,
    pub rendered: Rendered,
    pub persisted: Option<ArtifactKey>,
    pub quit: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub batches: u64,
    pub detections: u64,
    pub diagnostics: u64,
    pub annotations: u64,
    pub artifacts_written: u64,
    pub persist_failures: u64,
}

/// Everything the loop carries from one iteration to the next.
#[derive(Debug, Default)]
pub struct LoopState {
    last_frame: Option<Frame>,
    annotated: Option<AnnotatedFrame>,
    started: bool,
    consecutive_capture_failures: u64,
    stats: LoopStats,
}

impl LoopState {
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    pub fn annotated(&self) -> Option<&AnnotatedFrame> {
        self.annotated.as_ref()
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }
}

/// Drives detector, source, display and (optionally) a store through the loop.
pub struct SyncLoop<D, S, V> {
    settings: LoopSettings,
    detector: D,
    source: S,
    display: V,
    store: Option<Box<dyn ArtifactStore>>,
    shutdown: ShutdownFlag,
    state: LoopState,
    closed: bool,
}

impl<D, S, V> SyncLoop<D, S, V>
where
    D: DetectorProcess,
    S: FrameSource,
    V: Display,
{
    pub fn new(settings: LoopSettings, detector: D, source: S, display: V) -> Self {
        Self {
            settings,
            detector,
            source,
            display,
            store: None,
            shutdown: ShutdownFlag::new(),
            state: LoopState::default(),
            closed: false,
        }
    }

    /// Persist every non-empty batch with the frame it was paired with.
    pub fn with_store(mut self, store: impl ArtifactStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn display(&self) -> &V {
        &self.display
    }

    /// Run one iteration. The source is connected and the detector started on the first call.
    pub fn step(&mut self) -> Result<IterationReport> {
        if !self.state.started {
            self.source.connect()?;
            self.detector.start()?;
            self.state.started = true;
        }
        self.state.stats.iterations += 1;

        let (line, batch) = self.poll_detector()?;

        // Pair with the frame captured last iteration. Capture below replaces it either way.
        let paired = if batch.is_some() {
            self.state.last_frame.take()
        } else {
            None
        };
        let mut annotated = false;
        if let (Some(batch), Some(frame)) = (&batch, &paired) {
            self.state.annotated = Some(annotate(frame, batch, &self.settings.annotation));
            self.state.stats.annotations += 1;
            annotated = true;
        }

        self.capture();
        let frame_captured = self.state.last_frame.is_some();

        let rendered = self.render()?;

        let persisted = match (&batch, &paired) {
            (Some(batch), Some(frame)) if !batch.is_empty() => self.persist(batch, frame),
            _ => None,
        };

        let quit = self.shutdown.is_requested() || self.display.quit_requested();

        Ok(IterationReport {
            line,
            annotated,
            frame_captured,
            rendered,
            persisted,
            quit,
        })
    }

    /// Loop until quit (or the iteration limit), then shut everything down.
    pub fn run(&mut self) -> Result<LoopStats> {
        let result = self.run_until_quit();
        let closed = self.shutdown();
        result?;
        closed?;
        Ok(self.state.stats.clone())
    }

    /// Stop the detector, close the display and release the source. Idempotent.
    ///
    /// Every step is attempted; the first error is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let detector = self.detector.stop();
        let display = self.display.close();
        let source = self.source.release();
        log::info!(
            "loop stopped after {} iteration(s): {} frame(s), {} batch(es), {} artifact pair(s)",
            self.state.stats.iterations,
            self.state.stats.frames_captured,
            self.state.stats.batches,
            self.state.stats.artifacts_written
        );
        detector.and(display).and(source)
    }

    fn run_until_quit(&mut self) -> Result<()> {
        let mut last_health_log = Instant::now();
        loop {
            let report = self.step()?;

            if last_health_log.elapsed() >= self.settings.health_interval {
                self.log_health();
                last_health_log = Instant::now();
            }
            if report.quit {
                log::info!("quit requested");
                return Ok(());
            }
            if let Some(max) = self.settings.max_iterations {
                if self.state.stats.iterations >= max {
                    log::info!("iteration limit ({}) reached", max);
                    return Ok(());
                }
            }
        }
    }

    fn poll_detector(&mut self) -> Result<(LineOutcome, Option<DetectionBatch>)> {
        let Some(line) = self.detector.poll_line(self.settings.poll_timeout)? else {
            return Ok((LineOutcome::Nothing, None));
        };
        match decode_line(&line) {
            DecodedLine::Batch(batch) => {
                self.state.stats.batches += 1;
                self.state.stats.detections += batch.len() as u64;
                log::debug!("batch with {} detection(s)", batch.len());
                Ok((
                    LineOutcome::Batch {
                        detections: batch.len(),
                    },
                    Some(batch),
                ))
            }
            DecodedLine::Diagnostic { text, kind } => {
                self.state.stats.diagnostics += 1;
                match kind {
                    DiagnosticKind::NotJson => {
                        log::info!(target: DETECTOR_LOG_TARGET, "{}", text)
                    }
                    DiagnosticKind::UnexpectedShape => log::warn!(
                        target: DETECTOR_LOG_TARGET,
                        "JSON line is not a detection batch: {}",
                        text
                    ),
                }
                Ok((LineOutcome::Diagnostic, None))
            }
        }
    }

    fn capture(&mut self) {
        match self.source.next_frame() {
            Ok(frame) => {
                if self.state.consecutive_capture_failures > 0 {
                    log::info!(
                        "capture recovered after {} failed read(s)",
                        self.state.consecutive_capture_failures
                    );
                }
                self.state.consecutive_capture_failures = 0;
                self.state.stats.frames_captured += 1;
                self.state.last_frame = Some(frame);
            }
            Err(err) => {
                if self.state.consecutive_capture_failures == 0 {
                    log::warn!("capture failed: {:#}", err);
                } else {
                    log::debug!("capture failed: {:#}", err);
                }
                self.state.consecutive_capture_failures += 1;
                self.state.stats.capture_failures += 1;
                self.state.last_frame = None;
            }
        }
    }

    fn render(&mut self) -> Result<Rendered> {
        let Some(frame) = self.state.last_frame.as_ref() else {
            return Ok(Rendered::Nothing);
        };
        match self.state.annotated.as_ref() {
            Some(annotated) => {
                self.display.show(annotated.frame())?;
                Ok(Rendered::Annotated)
            }
            None => {
                self.display.show(frame)?;
                Ok(Rendered::Raw)
            }
        }
    }

    fn persist(&mut self, batch: &DetectionBatch, frame: &Frame) -> Option<ArtifactKey> {
        let store = self.store.as_mut()?;
        let key = ArtifactKey::from_datetime(&frame.captured_at());
        match store.store(&key, batch, frame) {
            Ok(used) => {
                self.state.stats.artifacts_written += 1;
                log::info!("{} {} detection(s) stored", used, batch.len());
                Some(used)
            }
            Err(err) => {
                self.state.stats.persist_failures += 1;
                log::error!("persisting {} failed: {:#}", key, err);
                None
            }
        }
    }

    fn log_health(&self) {
        let stats = &self.state.stats;
        let source = self.source.stats();
        log::info!(
            "health: source={} healthy={} iterations={} frames={} capture_failures={} batches={} diagnostics={} artifacts={}",
            source.source,
            self.source.is_healthy(),
            stats.iterations,
            stats.frames_captured,
            stats.capture_failures,
            stats.batches,
            stats.diagnostics,
            stats.artifacts_written
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
