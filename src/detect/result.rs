use serde::{Deserialize, Serialize};

/// Normalized bounding box as emitted by the detector.
///
/// All fields are fractions of the frame dimensions. `width`/`height` are
/// consumed as absolute second-corner coordinates, see `PixelRect::from_bbox`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One labeled box.
///
/// Fields beyond `label` and `bbox` (confidence, track ids, ...) are carried in
/// `extra` so a decoded batch re-encodes to the same records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub bbox: BoundingBox,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            bbox,
            extra: serde_json::Map::new(),
        }
    }
}

/// All detections decoded from a single detector line.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionBatch(Vec<Detection>);

impl DetectionBatch {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self(detections)
    }

    pub fn detections(&self) -> &[Detection] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.0.iter()
    }

    /// Compact JSON encoding, as persisted next to the paired image.
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Vec<Detection>> for DetectionBatch {
    fn from(detections: Vec<Detection>) -> Self {
        Self(detections)
    }
}
