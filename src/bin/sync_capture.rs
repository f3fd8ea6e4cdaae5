//! sync_capture - webcam capture synchronized with an external detector.
//!
//! 1. Starts the detector command (default `node ga_peoplecount.js`)
//! 2. Captures frames and pairs each detection batch with the previous frame
//! 3. Draws the target label's boxes and renders the result
//! 4. With `--persist`, writes `<timestamp>.json` + `<timestamp>.png` pairs
//!
//! Quit with the window's quit key (default `q`) or Ctrl+C.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use detection_sync::{
    open_display, open_source, ChildDetector, FilesystemArtifactStore, ShutdownFlag,
    SupervisedDetector, SyncConfig, SyncLoop,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Capture frames, pair them with detector output, overlay and persist"
)]
struct Args {
    /// JSON config file. Flags and SYNC_* variables override it.
    #[arg(long, env = "SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source: /dev/videoN, stub://name, or dir:/path/to/images.
    #[arg(long, env = "SYNC_SOURCE")]
    source: Option<String>,

    /// Detector command line, split on whitespace (e.g. "node ga_peoplecount.js").
    #[arg(long, env = "SYNC_DETECTOR_CMD")]
    detector_cmd: Option<String>,

    /// Extra detector arguments, appended after the command (pass after `--`).
    #[arg(last = true)]
    detector_args: Vec<String>,

    /// Detection label to draw. Empty draws every detection.
    #[arg(long, env = "SYNC_TARGET_LABEL")]
    target_label: Option<String>,

    /// Longest wait for detector output per iteration.
    #[arg(long, env = "SYNC_POLL_TIMEOUT_MS")]
    poll_timeout_ms: Option<u64>,

    /// Write detection artifacts (JSON + PNG) to the output directory.
    #[arg(long)]
    persist: bool,

    /// Directory for persisted artifacts.
    #[arg(long, env = "SYNC_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Display mode: window or headless.
    #[arg(long, env = "SYNC_DISPLAY")]
    display: Option<String>,

    /// Stop after this many iterations.
    #[arg(long, env = "SYNC_MAX_ITERATIONS")]
    max_iterations: Option<u64>,

    /// Detector restarts allowed before giving up (0 = first exit is fatal).
    #[arg(long, env = "SYNC_MAX_RESTARTS")]
    max_restarts: Option<u32>,
}

impl Args {
    fn apply(&self, cfg: &mut SyncConfig) -> Result<()> {
        if let Some(source) = &self.source {
            cfg.source.uri = source.trim().to_string();
        }
        if let Some(cmd) = &self.detector_cmd {
            let mut parts = cmd.split_whitespace();
            let program = parts
                .next()
                .ok_or_else(|| anyhow!("--detector-cmd must not be empty"))?;
            cfg.detector.command.program = program.to_string();
            cfg.detector.command.args = parts.map(str::to_string).collect();
        }
        cfg.detector
            .command
            .args
            .extend(self.detector_args.iter().cloned());
        if let Some(label) = &self.target_label {
            cfg.annotation.target_label = label.trim().to_string();
        }
        if let Some(ms) = self.poll_timeout_ms {
            cfg.poll_timeout = Duration::from_millis(ms);
        }
        if self.persist {
            cfg.persist.enabled = true;
        }
        if let Some(dir) = &self.output_dir {
            cfg.persist.output_dir = dir.clone();
        }
        if let Some(mode) = &self.display {
            cfg.display.mode = mode.parse()?;
        }
        if let Some(max) = self.max_restarts {
            cfg.detector.restart.max_restarts = max;
        }
        cfg.validate()
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SyncConfig::load_from(args.config.as_deref())?;
    args.apply(&mut cfg)?;

    let shutdown = ShutdownFlag::new();
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || handler_flag.request()).context("install Ctrl+C handler")?;

    log::info!(
        "sync_capture: source={} detector={} {} target_label={:?} poll_timeout={}ms",
        cfg.source.uri,
        cfg.detector.command.program,
        cfg.detector.command.args.join(" "),
        cfg.annotation.target_label,
        cfg.poll_timeout.as_millis()
    );

    let detector = SupervisedDetector::new(
        ChildDetector::new(cfg.detector.command.clone()),
        cfg.detector.restart,
    );
    let source = open_source(&cfg.source)?;
    let display = open_display(cfg.display.mode, &cfg.display.title, cfg.display.quit_key)?;

    let mut settings = cfg.loop_settings();
    settings.max_iterations = args.max_iterations;
    let mut sync = SyncLoop::new(settings, detector, source, display).with_shutdown(shutdown);
    if cfg.persist.enabled {
        log::info!(
            "persisting detections to {}",
            cfg.persist.output_dir.display()
        );
        sync = sync.with_store(FilesystemArtifactStore::new(cfg.persist.output_dir.clone()));
    }

    let stats = sync.run()?;
    log::info!(
        "done: iterations={} frames={} capture_failures={} batches={} diagnostics={} artifacts={} persist_failures={} restarts={}",
        stats.iterations,
        stats.frames_captured,
        stats.capture_failures,
        stats.batches,
        stats.diagnostics,
        stats.artifacts_written,
        stats.persist_failures,
        sync.detector().restarts()
    );
    Ok(())
}
