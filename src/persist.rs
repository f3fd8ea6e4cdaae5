//! Detection artifact persistence.
//!
//! A detection event is written as two files sharing one timestamp-derived
//! stem: `<key>.json` (the batch) and `<key>.png` (the frame it was paired
//! with). Keys never contain `:` so they are valid file names everywhere.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::detect::DetectionBatch;
use crate::frame::Frame;

pub const JSON_EXTENSION: &str = "json";
pub const IMAGE_EXTENSION: &str = "png";

/// Upper bound on `-N` suffixes tried when a stem is already taken.
const MAX_KEY_SUFFIX: u32 = 1000;

/// File stem shared by a JSON/PNG artifact pair.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// ISO-8601 local timestamp with microseconds, `:` replaced by `-`.
    ///
    /// `2024-05-01T13:45:12.123456` becomes `2024-05-01T13-45-12.123456`.
    pub fn from_datetime(at: &DateTime<Local>) -> Self {
        let iso = at
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        Self(iso.replace(':', "-"))
    }

    pub fn now() -> Self {
        Self::from_datetime(&Local::now())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn with_suffix(&self, n: u32) -> Self {
        Self(format!("{}-{}", self.0, n))
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sink for paired detection artifacts.
pub trait ArtifactStore {
    /// Persist `batch` and `frame` under `key`. Returns the key actually used,
    /// which differs from `key` only when the stem was already taken.
    fn store(
        &mut self,
        key: &ArtifactKey,
        batch: &DetectionBatch,
        frame: &Frame,
    ) -> Result<ArtifactKey>;
}

// ----------------------------------------------------------------------------
// Filesystem store
// ----------------------------------------------------------------------------

/// Writes artifact pairs into one directory.
#[derive(Clone, Debug)]
pub struct FilesystemArtifactStore {
    dir: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `(json, image)` paths for `key`.
    pub fn paths_for(&self, key: &ArtifactKey) -> (PathBuf, PathBuf) {
        (
            self.dir.join(format!("{}.{}", key, JSON_EXTENSION)),
            self.dir.join(format!("{}.{}", key, IMAGE_EXTENSION)),
        )
    }

    /// Stems that have both a JSON and an image file, sorted.
    pub fn complete_keys(&self) -> Result<Vec<ArtifactKey>> {
        let mut json = BTreeSet::new();
        let mut images = BTreeSet::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("list {}", self.dir.display()))
            }
        };
        for entry in entries {
            let path = entry?.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };
            match ext {
                JSON_EXTENSION => {
                    json.insert(stem.to_string());
                }
                IMAGE_EXTENSION => {
                    images.insert(stem.to_string());
                }
                _ => {}
            }
        }
        Ok(json
            .intersection(&images)
            .map(|stem| ArtifactKey(stem.clone()))
            .collect())
    }

    fn free_key(&self, key: &ArtifactKey) -> Result<ArtifactKey> {
        for n in 0..=MAX_KEY_SUFFIX {
            let candidate = if n == 0 { key.clone() } else { key.with_suffix(n) };
            let (json, image) = self.paths_for(&candidate);
            if !json.exists() && !image.exists() {
                return Ok(candidate);
            }
        }
        Err(anyhow!(
            "no free artifact name for {} in {}",
            key,
            self.dir.display()
        ))
    }
}

impl ArtifactStore for FilesystemArtifactStore {
    fn store(
        &mut self,
        key: &ArtifactKey,
        batch: &DetectionBatch,
        frame: &Frame,
    ) -> Result<ArtifactKey> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create output directory {}", self.dir.display()))?;
        let key = self.free_key(key)?;
        let (json_path, image_path) = self.paths_for(&key);

        let json = batch.to_json()?;
        let png = encode_png(frame)?;
        write_pair(&json_path, json.as_bytes(), &image_path, &png)?;

        log::debug!("stored artifacts {} ({} detection(s))", key, batch.len());
        Ok(key)
    }
}

fn encode_png(frame: &Frame) -> Result<Vec<u8>> {
    let mut png = std::io::Cursor::new(Vec::new());
    frame
        .to_rgb_image()?
        .write_to(&mut png, image::ImageFormat::Png)
        .context("encode frame as png")?;
    Ok(png.into_inner())
}

/// Writes both halves of a pair; a failed image write takes the JSON back out.
fn write_pair(json_path: &Path, json: &[u8], image_path: &Path, png: &[u8]) -> Result<()> {
    std::fs::write(json_path, json).with_context(|| format!("write {}", json_path.display()))?;
    if let Err(err) = std::fs::write(image_path, png) {
        if let Err(cleanup) = std::fs::remove_file(json_path) {
            log::warn!("could not remove {}: {}", json_path.display(), cleanup);
        }
        return Err(err).with_context(|| format!("write {}", image_path.display()));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

/// One stored pair.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredArtifact {
    pub key: ArtifactKey,
    pub json: String,
    pub frame: Frame,
}

/// Keeps artifacts in memory; for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    stored: Vec<StoredArtifact>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(&self) -> &[StoredArtifact] {
        &self.stored
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn store(
        &mut self,
        key: &ArtifactKey,
        batch: &DetectionBatch,
        frame: &Frame,
    ) -> Result<ArtifactKey> {
        let mut used = key.clone();
        let mut n = 0;
        while self.stored.iter().any(|a| a.key == used) {
            n += 1;
            used = key.with_suffix(n);
        }
        self.stored.push(StoredArtifact {
            key: used.clone(),
            json: batch.to_json()?,
            frame: frame.clone(),
        });
        Ok(used)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use chrono::TimeZone;

    fn batch() -> DetectionBatch {
        DetectionBatch::new(vec![Detection::new(
            "head",
            BoundingBox {
                x: 0.1,
                y: 0.2,
                width: 0.5,
                height: 0.6,
            },
        )])
    }

    fn fixed_time() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 1, 13, 45, 12)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn key_is_iso_timestamp_without_colons() {
        let key = ArtifactKey::from_datetime(&fixed_time());
        assert_eq!(key.as_str(), "2024-05-01T13-45-12.000000");
        assert!(!ArtifactKey::now().as_str().contains(':'));
    }

    #[test]
    fn writes_one_json_and_one_png_with_same_stem() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = FilesystemArtifactStore::new(dir.path().join("data"));
        let frame = Frame::filled(8, 6, [10, 20, 30])?;
        let key = ArtifactKey::from_datetime(&fixed_time());

        let used = store.store(&key, &batch(), &frame)?;
        assert_eq!(used, key);

        let (json_path, image_path) = store.paths_for(&key);
        let json = std::fs::read_to_string(json_path)?;
        assert_eq!(
            json,
            r#"[{"label":"head","bbox":{"x":0.1,"y":0.2,"width":0.5,"height":0.6}}]"#
        );
        let img = image::open(image_path)?.to_rgb8();
        assert_eq!(img.dimensions(), (8, 6));
        assert_eq!(img.get_pixel(0, 0).0, [10, 20, 30]);

        assert_eq!(std::fs::read_dir(store.dir())?.count(), 2);
        assert_eq!(store.complete_keys()?, vec![key]);
        Ok(())
    }

    #[test]
    fn taken_stem_gets_suffix_on_both_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = FilesystemArtifactStore::new(dir.path());
        let frame = Frame::filled(2, 2, [0, 0, 0])?;
        let key = ArtifactKey::from_datetime(&fixed_time());

        store.store(&key, &batch(), &frame)?;
        let second = store.store(&key, &batch(), &frame)?;

        assert_eq!(second.as_str(), "2024-05-01T13-45-12.000000-1");
        assert_eq!(store.complete_keys()?.len(), 2);
        Ok(())
    }

    #[test]
    fn failed_image_write_leaves_no_orphan_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FilesystemArtifactStore::new(dir.path());
        let key = ArtifactKey::from_datetime(&fixed_time());
        let (json_path, image_path) = store.paths_for(&key);
        // a directory where the image should go makes the write fail
        std::fs::create_dir(&image_path)?;

        let png = encode_png(&Frame::filled(2, 2, [0, 0, 0])?)?;
        let err = write_pair(&json_path, batch().to_json()?.as_bytes(), &image_path, &png)
            .expect_err("image path is a directory");
        assert!(format!("{:#}", err).contains(".png"));
        assert!(!json_path.exists());
        assert!(store.complete_keys()?.is_empty());
        Ok(())
    }

    #[test]
    fn missing_directory_lists_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FilesystemArtifactStore::new(dir.path().join("absent"));
        assert!(store.complete_keys()?.is_empty());
        Ok(())
    }
}
