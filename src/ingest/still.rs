//! Still-image source.
//!
//! Replays the images of a local directory (png/jpg/jpeg, sorted by file name)
//! in a loop. Useful to reproduce a recorded session without a camera: point it
//! at a directory of persisted `<key>.png` artifacts.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats, STILL_PREFIX};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct StillSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next_index: usize,
    frame_count: u64,
    failures: u64,
    last_ok: bool,
}

impl StillSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            next_index: 0,
            frame_count: 0,
            failures: 0,
            last_ok: true,
        }
    }

    /// Number of images found by `connect`.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn load(path: &Path) -> Result<Frame> {
        let img = image::open(path)
            .with_context(|| format!("decode {}", path.display()))?
            .to_rgb8();
        Frame::from_rgb_image(img)
    }
}

impl FrameSource for StillSource {
    fn connect(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("read image directory {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", self.dir.display()));
        }
        files.sort();
        log::info!(
            "StillSource: {} image(s) in {}",
            files.len(),
            self.dir.display()
        );
        self.files = files;
        self.next_index = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.files.is_empty() {
            return Err(anyhow!("{} is not connected", self.dir.display()));
        }
        let path = &self.files[self.next_index];
        self.next_index = (self.next_index + 1) % self.files.len();
        match Self::load(path) {
            Ok(frame) => {
                self.frame_count += 1;
                self.last_ok = true;
                Ok(frame)
            }
            Err(err) => {
                self.failures += 1;
                self.last_ok = false;
                Err(err)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        !self.files.is_empty() && self.last_ok
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            failures: self.failures,
            source: format!("{}{}", STILL_PREFIX, self.dir.display()),
        }
    }

    fn release(&mut self) -> Result<()> {
        self.files.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, name: &str, rgb: [u8; 3]) -> Result<()> {
        Frame::filled(4, 2, rgb)?
            .to_rgb_image()?
            .save(dir.join(name))?;
        Ok(())
    }

    #[test]
    fn replays_images_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_png(dir.path(), "b.png", [0, 0, 255])?;
        write_png(dir.path(), "a.png", [255, 0, 0])?;
        std::fs::write(dir.path().join("a.json"), "[]")?;

        let mut source = StillSource::new(dir.path());
        source.connect()?;
        assert_eq!(source.len(), 2);

        assert_eq!(source.next_frame()?.pixel(0, 0), Some([255, 0, 0]));
        assert_eq!(source.next_frame()?.pixel(0, 0), Some([0, 0, 255]));
        assert_eq!(source.next_frame()?.pixel(0, 0), Some([255, 0, 0]));
        assert_eq!(source.stats().frames_captured, 3);
        Ok(())
    }

    #[test]
    fn empty_directory_fails_to_connect() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = StillSource::new(dir.path());
        assert!(source.connect().is_err());
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn corrupt_image_is_a_capture_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("broken.png"), b"not a png")?;
        write_png(dir.path(), "good.png", [9, 9, 9])?;

        let mut source = StillSource::new(dir.path());
        source.connect()?;
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_ok());
        assert!(source.is_healthy());
        assert_eq!(source.stats().failures, 1);
        Ok(())
    }
}
