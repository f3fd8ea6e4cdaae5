//! Rectangle overlay for detection batches.

use crate::frame::{AnnotatedFrame, Frame};

use super::result::{BoundingBox, DetectionBatch};

/// Integer pixel corners of one drawn rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl PixelRect {
    /// Scale a normalized box to pixel corners.
    ///
    /// The first corner is `(x * W, y * H)` and the second corner is
    /// `(width * W, height * H)`: `width`/`height` are read as absolute
    /// coordinates of the opposite corner, not as extents added to `x`/`y`.
    /// The recorded detector output is interpreted this way; changing it moves
    /// every drawn box.
    pub fn from_bbox(bbox: &BoundingBox, width: u32, height: u32) -> Self {
        let w = f64::from(width);
        let h = f64::from(height);
        Self {
            x0: (bbox.x * w).round() as i64,
            y0: (bbox.y * h).round() as i64,
            x1: (bbox.width * w).round() as i64,
            y1: (bbox.height * h).round() as i64,
        }
    }
}

/// How boxes are drawn and which detections get one.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationStyle {
    /// Only detections with this label are drawn. Empty matches every label.
    pub target_label: String,
    pub color: [u8; 3],
    pub thickness: u32,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            target_label: "head".to_string(),
            color: [0, 255, 0],
            thickness: 2,
        }
    }
}

impl AnnotationStyle {
    pub fn matches(&self, label: &str) -> bool {
        self.target_label.is_empty() || self.target_label == label
    }
}

/// Copy `frame` and draw one rectangle per detection matching the style's label.
pub fn annotate(frame: &Frame, batch: &DetectionBatch, style: &AnnotationStyle) -> AnnotatedFrame {
    let mut canvas = frame.clone();
    let rects: Vec<PixelRect> = batch
        .iter()
        .filter(|det| style.matches(&det.label))
        .map(|det| PixelRect::from_bbox(&det.bbox, frame.width(), frame.height()))
        .collect();
    for rect in &rects {
        draw_rect(&mut canvas, rect, style.color, style.thickness);
    }
    AnnotatedFrame::new(canvas, rects)
}

/// Draw a hollow rectangle, growing inward by `thickness`, clipped to the frame.
///
/// Passes past the larger frame dimension add nothing, so at most that many run.
/// Edges are clamped just outside the frame, one pass-count away, which keeps
/// far-off edges invisible and the arithmetic in range.
fn draw_rect(frame: &mut Frame, rect: &PixelRect, color: [u8; 3], thickness: u32) {
    let max_x = i64::from(frame.width()) - 1;
    let max_y = i64::from(frame.height()) - 1;
    let passes = i64::from(thickness.max(1)).min(max_x.max(max_y) + 1);
    let clamp_x = |v: i64| v.clamp(-passes - 1, max_x + passes + 1);
    let clamp_y = |v: i64| v.clamp(-passes - 1, max_y + passes + 1);
    let (left, right) = (clamp_x(rect.x0.min(rect.x1)), clamp_x(rect.x0.max(rect.x1)));
    let (top, bottom) = (clamp_y(rect.y0.min(rect.y1)), clamp_y(rect.y0.max(rect.y1)));

    for t in 0..passes {
        for y in [top + t, bottom - t] {
            if y < 0 || y > max_y {
                continue;
            }
            for x in left.max(0)..=right.min(max_x) {
                frame.set_pixel(x as u32, y as u32, color);
            }
        }
        for x in [left + t, right - t] {
            if x < 0 || x > max_x {
                continue;
            }
            for y in top.max(0)..=bottom.min(max_y) {
                frame.set_pixel(x as u32, y as u32, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;

    fn head(x: f64, y: f64, width: f64, height: f64) -> Detection {
        Detection::new("head", BoundingBox { x, y, width, height })
    }

    #[test]
    fn head_box_on_vga_frame() -> anyhow::Result<()> {
        let frame = Frame::filled(640, 480, [0, 0, 0])?;
        let batch = DetectionBatch::new(vec![head(0.1, 0.2, 0.5, 0.6)]);

        let annotated = annotate(&frame, &batch, &AnnotationStyle::default());

        assert_eq!(
            annotated.rects(),
            &[PixelRect {
                x0: 64,
                y0: 96,
                x1: 320,
                y1: 288
            }]
        );
        let out = annotated.frame();
        assert_eq!(out.pixel(64, 96), Some([0, 255, 0]));
        assert_eq!(out.pixel(320, 288), Some([0, 255, 0]));
        assert_eq!(out.pixel(200, 200), Some([0, 0, 0]));
        // source frame untouched
        assert_eq!(frame.pixel(64, 96), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn corners_scale_exactly_across_sizes() {
        let cases = [
            (head(0.0, 0.0, 1.0, 1.0), 640, 480, (0, 0, 640, 480)),
            (head(0.25, 0.5, 0.75, 1.0), 1920, 1080, (480, 540, 1440, 1080)),
            (head(0.5, 0.5, 0.5, 0.5), 2, 2, (1, 1, 1, 1)),
        ];
        for (det, w, h, (x0, y0, x1, y1)) in cases {
            assert_eq!(
                PixelRect::from_bbox(&det.bbox, w, h),
                PixelRect { x0, y0, x1, y1 }
            );
        }
    }

    #[test]
    fn only_target_label_is_drawn() -> anyhow::Result<()> {
        let frame = Frame::filled(100, 100, [0, 0, 0])?;
        let batch = DetectionBatch::new(vec![
            Detection::new(
                "person",
                BoundingBox {
                    x: 0.1,
                    y: 0.1,
                    width: 0.9,
                    height: 0.9,
                },
            ),
            head(0.2, 0.2, 0.4, 0.4),
        ]);

        let annotated = annotate(&frame, &batch, &AnnotationStyle::default());
        assert_eq!(annotated.rects().len(), 1);
        assert_eq!(annotated.frame().pixel(10, 10), Some([0, 0, 0]));

        let every = AnnotationStyle {
            target_label: String::new(),
            ..AnnotationStyle::default()
        };
        assert_eq!(annotate(&frame, &batch, &every).rects().len(), 2);
        Ok(())
    }

    #[test]
    fn out_of_range_boxes_are_clipped() -> anyhow::Result<()> {
        let frame = Frame::filled(10, 10, [0, 0, 0])?;
        let batch = DetectionBatch::new(vec![head(-0.5, -0.5, 1.5, 1.5)]);

        let annotated = annotate(&frame, &batch, &AnnotationStyle::default());
        assert_eq!(annotated.frame().width(), 10);
        assert_eq!(annotated.frame().pixel(5, 5), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn huge_coordinates_do_not_overflow() -> anyhow::Result<()> {
        let frame = Frame::filled(16, 12, [0, 0, 0])?;
        let style = AnnotationStyle::default();

        let off = annotate(&frame, &DetectionBatch::new(vec![head(1e300, 0.1, 1e300, 0.5)]), &style);
        assert_eq!(off.rects()[0].x0, i64::MAX);
        assert_eq!(off.frame(), &frame);

        // spans the whole width: horizontal edges only
        let wide = annotate(&frame, &DetectionBatch::new(vec![head(-1e300, 0.1, 1e300, 0.5)]), &style);
        assert_eq!(wide.rects()[0].x0, i64::MIN);
        assert_eq!(wide.frame().pixel(8, 1), Some([0, 255, 0]));
        assert_eq!(wide.frame().pixel(8, 3), Some([0, 0, 0]));
        assert_eq!(wide.frame().pixel(0, 3), Some([0, 0, 0]));

        let corner = annotate(&frame, &DetectionBatch::new(vec![head(-1e300, -1e300, 0.5, 0.5)]), &style);
        assert_eq!(corner.frame().pixel(8, 3), Some([0, 255, 0]));
        assert_eq!(corner.frame().pixel(3, 3), Some([0, 0, 0]));
        assert_eq!(corner.frame().pixel(0, 0), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn thickness_beyond_frame_size_fills_at_most_the_frame() -> anyhow::Result<()> {
        let frame = Frame::filled(6, 4, [0, 0, 0])?;
        let batch = DetectionBatch::new(vec![head(0.0, 0.0, 1.0, 1.0)]);
        let style = AnnotationStyle {
            thickness: u32::MAX,
            ..AnnotationStyle::default()
        };

        let annotated = annotate(&frame, &batch, &style);
        assert!(annotated
            .frame()
            .pixels()
            .chunks_exact(3)
            .all(|px| px == [0, 255, 0]));
        Ok(())
    }

    #[test]
    fn empty_batch_yields_plain_copy() -> anyhow::Result<()> {
        let frame = Frame::filled(8, 8, [1, 2, 3])?;
        let annotated = annotate(&frame, &DetectionBatch::default(), &AnnotationStyle::default());
        assert!(annotated.rects().is_empty());
        assert_eq!(annotated.frame(), &frame);
        Ok(())
    }
}
