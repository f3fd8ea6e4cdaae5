//! Detector line decoding.
//!
//! A line is either a JSON array of detections or free-form diagnostic text.
//! Decoding never fails: anything that is not a batch is handed back as a
//! diagnostic so the loop can echo it and move on.

use super::result::DetectionBatch;

/// Why a line was not treated as a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Not JSON at all (log output, stack traces, blank lines).
    NotJson,
    /// Valid JSON, but not an array of `{label, bbox}` objects.
    UnexpectedShape,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecodedLine {
    Batch(DetectionBatch),
    Diagnostic { text: String, kind: DiagnosticKind },
}

/// Decode one line of detector output.
pub fn decode_line(line: &str) -> DecodedLine {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => {
            return DecodedLine::Diagnostic {
                text: line.to_string(),
                kind: DiagnosticKind::NotJson,
            }
        }
    };
    match serde_json::from_value::<DetectionBatch>(value) {
        Ok(batch) => DecodedLine::Batch(batch),
        Err(_) => DecodedLine::Diagnostic {
            text: line.to_string(),
            kind: DiagnosticKind::UnexpectedShape,
        },
    }
}
