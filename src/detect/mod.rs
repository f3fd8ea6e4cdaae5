mod annotate;
mod decode;
mod result;

pub use annotate::{annotate, AnnotationStyle, PixelRect};
pub use decode::{decode_line, DecodedLine, DiagnosticKind};
pub use result::{BoundingBox, Detection, DetectionBatch};
