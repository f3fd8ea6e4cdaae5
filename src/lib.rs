//! Detection Sync
//!
//! Keeps a webcam stream and an external detector process in step: every
//! detection batch the detector prints is paired with the frame captured just
//! before it, drawn onto a copy of that frame, rendered, and optionally written
//! to disk as a `<timestamp>.json` / `<timestamp>.png` pair.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and `AnnotatedFrame`
//! - `detect`: detection records, line decoding, rectangle drawing
//! - `detector`: the external detector process (child, scripted, supervised)
//! - `ingest`: frame sources (V4L2, still images, scripted)
//! - `display`: headless or windowed rendering
//! - `persist`: artifact keys and stores
//! - `sync_loop`: the poll loop tying everything together
//! - `config`: file/env configuration

pub mod config;
pub mod detect;
pub mod detector;
pub mod display;
pub mod frame;
pub mod ingest;
pub mod persist;
pub mod sync_loop;

pub use config::SyncConfig;
pub use detect::{
    annotate, decode_line, AnnotationStyle, BoundingBox, DecodedLine, Detection, DetectionBatch,
    DiagnosticKind, PixelRect,
};
pub use detector::{
    ChildDetector, DetectorCommand, DetectorProcess, RestartPolicy, ScriptStep, ScriptedDetector,
    SupervisedDetector,
};
pub use display::{open_display, Display, DisplayMode, HeadlessDisplay, QuitKey};
pub use frame::{AnnotatedFrame, Frame};
pub use ingest::{open_source, FrameSource, ScriptedSource, SourceSettings, SourceStats, StillSource};
pub use persist::{ArtifactKey, ArtifactStore, FilesystemArtifactStore, InMemoryArtifactStore};
pub use sync_loop::{
    IterationReport, LineOutcome, LoopSettings, LoopState, LoopStats, Rendered, ShutdownFlag,
    SyncLoop,
};
