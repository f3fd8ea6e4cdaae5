use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::AnnotationStyle;
use crate::detector::{DetectorCommand, RestartPolicy};
use crate::display::{DisplayMode, QuitKey};
use crate::ingest::SourceSettings;
use crate::sync_loop::LoopSettings;

const DEFAULT_SOURCE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_DETECTOR_PROGRAM: &str = "node";
const DEFAULT_DETECTOR_SCRIPT: &str = "ga_peoplecount.js";
const DEFAULT_TARGET_LABEL: &str = "head";
const DEFAULT_BOX_COLOR: [u8; 3] = [0, 255, 0];
const DEFAULT_BOX_THICKNESS: u32 = 2;
const MAX_BOX_THICKNESS: u32 = 64;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 30;
const MAX_POLL_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_OUTPUT_DIR: &str = "data";
const DEFAULT_WINDOW_TITLE: &str = "frame";

#[derive(Debug, Deserialize, Default)]
struct SyncConfigFile {
    poll_timeout_ms: Option<u64>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    annotate: Option<AnnotateConfigFile>,
    persist: Option<PersistConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    program: Option<String>,
    args: Option<Vec<String>>,
    working_dir: Option<PathBuf>,
    env: Option<BTreeMap<String, String>>,
    restart: Option<RestartConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct RestartConfigFile {
    max_restarts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotateConfigFile {
    target_label: Option<String>,
    color: Option<[u8; 3]>,
    thickness: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PersistConfigFile {
    enabled: Option<bool>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    mode: Option<String>,
    title: Option<String>,
    quit_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_timeout: Duration,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub annotation: AnnotationStyle,
    pub persist: PersistSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub command: DetectorCommand,
    pub restart: RestartPolicy,
}

#[derive(Debug, Clone)]
pub struct PersistSettings {
    pub enabled: bool,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub mode: DisplayMode,
    pub title: String,
    pub quit_key: QuitKey,
}

impl SyncConfig {
    /// Defaults, then the JSON file named by `SYNC_CONFIG`, then `SYNC_*` env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SYNC_CONFIG").ok();
        let config_path = config_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(Path::new);
        Self::load_from(config_path)
    }

    /// Like `load`, with the config file given explicitly.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SyncConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Settings for the synchronization loop itself.
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            poll_timeout: self.poll_timeout,
            annotation: self.annotation.clone(),
            ..LoopSettings::default()
        }
    }

    fn from_file(file: SyncConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            uri: source_file
                .uri
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_FPS),
        };

        let detector_file = file.detector.unwrap_or_default();
        let defaults = RestartPolicy::default();
        let restart_file = detector_file.restart.unwrap_or_default();
        let restart = RestartPolicy {
            max_restarts: restart_file.max_restarts.unwrap_or(defaults.max_restarts),
            initial_backoff: restart_file
                .initial_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: restart_file
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
        };
        let mut command = match detector_file.program {
            Some(program) => DetectorCommand::new(program)
                .with_args(detector_file.args.unwrap_or_default()),
            None => DetectorCommand::new(DEFAULT_DETECTOR_PROGRAM)
                .with_args(detector_file.args.unwrap_or_else(|| {
                    vec![DEFAULT_DETECTOR_SCRIPT.to_string()]
                })),
        };
        command.working_dir = detector_file.working_dir;
        command.env = detector_file.env.unwrap_or_default().into_iter().collect();

        let annotate_file = file.annotate.unwrap_or_default();
        let annotation = AnnotationStyle {
            target_label: annotate_file
                .target_label
                .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string()),
            color: annotate_file.color.unwrap_or(DEFAULT_BOX_COLOR),
            thickness: annotate_file.thickness.unwrap_or(DEFAULT_BOX_THICKNESS),
        };

        let persist_file = file.persist.unwrap_or_default();
        let persist = PersistSettings {
            enabled: persist_file.enabled.unwrap_or(false),
            output_dir: persist_file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        };

        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            mode: match display_file.mode {
                Some(mode) => mode.parse()?,
                None => default_display_mode(),
            },
            title: display_file
                .title
                .unwrap_or_else(|| DEFAULT_WINDOW_TITLE.to_string()),
            quit_key: match display_file.quit_key {
                Some(key) => key.parse()?,
                None => QuitKey::default(),
            },
        };

        Ok(Self {
            poll_timeout: Duration::from_millis(
                file.poll_timeout_ms.unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
            ),
            source,
            detector: DetectorSettings { command, restart },
            annotation,
            persist,
            display,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("SYNC_SOURCE") {
            if !source.trim().is_empty() {
                self.source.uri = source.trim().to_string();
            }
        }
        if let Ok(cmd) = std::env::var("SYNC_DETECTOR_CMD") {
            let mut parts = cmd.split_whitespace();
            if let Some(program) = parts.next() {
                self.detector.command.program = program.to_string();
                self.detector.command.args = parts.map(str::to_string).collect();
            }
        }
        if let Ok(label) = std::env::var("SYNC_TARGET_LABEL") {
            self.annotation.target_label = label.trim().to_string();
        }
        if let Ok(timeout) = std::env::var("SYNC_POLL_TIMEOUT_MS") {
            let ms: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("SYNC_POLL_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.poll_timeout = Duration::from_millis(ms);
        }
        if let Ok(persist) = std::env::var("SYNC_PERSIST") {
            self.persist.enabled = parse_bool(&persist)
                .ok_or_else(|| anyhow!("SYNC_PERSIST must be true/false/1/0"))?;
        }
        if let Ok(dir) = std::env::var("SYNC_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.persist.output_dir = PathBuf::from(dir.trim());
            }
        }
        if let Ok(mode) = std::env::var("SYNC_DISPLAY") {
            self.display.mode = mode.parse()?;
        }
        if let Ok(restarts) = std::env::var("SYNC_MAX_RESTARTS") {
            self.detector.restart.max_restarts = restarts
                .trim()
                .parse()
                .map_err(|_| anyhow!("SYNC_MAX_RESTARTS must be a non-negative integer"))?;
        }
        Ok(())
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let timeout_ms = self.poll_timeout.as_millis();
        if timeout_ms == 0 || timeout_ms > u128::from(MAX_POLL_TIMEOUT_MS) {
            return Err(anyhow!(
                "poll timeout must be between 1 and {} ms, got {}",
                MAX_POLL_TIMEOUT_MS,
                timeout_ms
            ));
        }
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "capture size must be non-zero, got {}x{}",
                self.source.width,
                self.source.height
            ));
        }
        if self.detector.command.program.trim().is_empty() {
            return Err(anyhow!("detector program must not be empty"));
        }
        if !(1..=MAX_BOX_THICKNESS).contains(&self.annotation.thickness) {
            return Err(anyhow!(
                "box thickness must be between 1 and {}, got {}",
                MAX_BOX_THICKNESS,
                self.annotation.thickness
            ));
        }
        let restart = &self.detector.restart;
        if restart.max_backoff < restart.initial_backoff {
            return Err(anyhow!(
                "restart max_backoff ({}ms) is below initial_backoff ({}ms)",
                restart.max_backoff.as_millis(),
                restart.initial_backoff.as_millis()
            ));
        }
        Ok(())
    }
}

fn default_display_mode() -> DisplayMode {
    if cfg!(feature = "display-minifb") {
        DisplayMode::Window
    } else {
        DisplayMode::Headless
    }
}

fn read_config_file(path: &Path) -> Result<SyncConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
