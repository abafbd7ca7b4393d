//! Overlay layout: turns detections and statistics into draw operations.
//!
//! Layout is pure; [`super::compositor::Compositor`] executes the operations.
//! Every operation is clipped to the frame so the compositor never receives
//! an out-of-bounds request.

use vision_hal::{Detection, FontRasterizer, FontSize};
use vision_stats::{CpuLoad, StatInfo, TimeStat};

/// Detection rectangle color (opaque white).
pub const BOX_COLOR: u32 = 0xffff_ffff;

/// Longest text line drawn.
pub const MAX_LINE_CHARS: usize = 64;

/// Largest detection count shown by the badge.
pub const MAX_BADGE_COUNT: usize = 9;

const STATUS_X: u32 = 16;
const BADGE_POS: (u32, u32) = (16, 16);
const STATUS_LINES_FROM_BOTTOM: u32 = 4;
const DEBUG_COLUMNS: u32 = 41;

/// Axis-aligned rectangle in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

/// One compositor operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOp {
    /// One-pixel rectangle outline.
    Rect {
        /// Outline bounds.
        rect: PixelRect,
        /// ARGB8888 color.
        color: u32,
    },
    /// Text line with its top-left corner at `(x, y)`.
    Text {
        /// Left edge.
        x: u32,
        /// Top edge.
        y: u32,
        /// Glyph size.
        font: FontSize,
        /// Characters to draw, already clipped.
        text: String,
    },
}

/// Places overlay elements on a frame of fixed size.
#[derive(Debug, Clone)]
pub struct OverlayLayout {
    width: u32,
    height: u32,
    small: (u32, u32),
    medium: (u32, u32),
    large: (u32, u32),
}

impl OverlayLayout {
    /// Layout for a `width`×`height` frame using the glyph metrics of
    /// `fonts`.
    pub fn new(width: u32, height: u32, fonts: &dyn FontRasterizer) -> Self {
        Self {
            width,
            height,
            small: fonts.glyph_size(FontSize::Small),
            medium: fonts.glyph_size(FontSize::Medium),
            large: fonts.glyph_size(FontSize::Large),
        }
    }

    fn glyph(&self, font: FontSize) -> (u32, u32) {
        match font {
            FontSize::Small => self.small,
            FontSize::Medium => self.medium,
            FontSize::Large => self.large,
        }
    }

    /// Converts a normalized detection into a frame rectangle, clamped to the
    /// frame. Returns `None` when nothing of it remains visible.
    #[must_use]
    pub fn detection_box(&self, det: &Detection) -> Option<PixelRect> {
        let (w, h) = (self.width as f32, self.height as f32);
        let xc = (w * det.x_center) as i32;
        let yc = (h * det.y_center) as i32;
        let half_w = ((w * det.width) as i32 + 1) / 2;
        let half_h = ((h * det.height) as i32 + 1) / 2;

        let (x0, y0) = self.clamp(xc - half_w, yc - half_h);
        let (x1, y1) = self.clamp(xc + half_w, yc + half_h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    fn clamp(&self, x: i32, y: i32) -> (u32, u32) {
        let cx = x.clamp(0, self.width.saturating_sub(1) as i32) as u32;
        let cy = y.clamp(0, self.height.saturating_sub(1) as i32) as u32;
        (cx, cy)
    }

    /// Pushes a text operation, truncated to what fits right of `x`.
    fn text(&self, ops: &mut Vec<DrawOp>, font: FontSize, x: u32, y: u32, text: &str) {
        let (gw, gh) = self.glyph(font);
        if gw == 0 || x >= self.width || y.saturating_add(gh) > self.height {
            return;
        }
        let fits = ((self.width - x) / gw) as usize;
        let text: String = text.chars().take(fits.min(MAX_LINE_CHARS)).collect();
        if text.is_empty() {
            return;
        }
        ops.push(DrawOp::Text { x, y, font, text });
    }

    /// Full overlay for one frame.
    ///
    /// Draws each detection box with its confidence, the inference time and
    /// one-second CPU load near the bottom left, a detection count badge in
    /// the top left, and, when `debug` is set, the per-task timing table in
    /// the top right.
    #[must_use]
    pub fn build(
        &self,
        detections: &[Detection],
        stats: &StatInfo,
        cpu: &CpuLoad,
        debug: bool,
    ) -> Vec<DrawOp> {
        let mut ops = Vec::with_capacity(detections.len() * 2 + 9);

        for det in detections {
            let Some(rect) = self.detection_box(det) else {
                continue;
            };
            ops.push(DrawOp::Rect {
                rect,
                color: BOX_COLOR,
            });
            let label = format!("{:5.1} %", det.confidence * 100.0);
            self.text(&mut ops, FontSize::Medium, rect.x, rect.y, &label);
        }

        let line_h = self.medium.1.max(1);
        if let Some(line) = (self.height / line_h).checked_sub(STATUS_LINES_FROM_BOTTOM) {
            let inference = format!(" Inference : {:4.1} ms ", f64::from(stats.nn_inference.last));
            self.text(&mut ops, FontSize::Medium, STATUS_X, line * line_h, &inference);
            let load = format!(" Cpu load  : {:4.1}  % ", cpu.one_second);
            self.text(&mut ops, FontSize::Medium, STATUS_X, (line + 1) * line_h, &load);
        }

        let badge = detections.len().min(MAX_BADGE_COUNT).to_string();
        self.text(&mut ops, FontSize::Large, BADGE_POS.0, BADGE_POS.1, &badge);

        if debug {
            self.debug_table(&mut ops, stats);
        }
        ops
    }

    fn debug_table(&self, ops: &mut Vec<DrawOp>, stats: &StatInfo) {
        let rows: [(&TimeStat, &str, usize); 6] = [
            (&stats.nn_total, "NN thread stats  ", 0),
            (&stats.nn_inference, "inference    ", 4),
            (&stats.disp_total, "DISP thread stats", 0),
            (&stats.nn_pp, "pp           ", 4),
            (&stats.disp_display, "display      ", 4),
            (&stats.disp_enc, "encode       ", 4),
        ];
        let (gw, gh) = self.small;
        let x = self.width.saturating_sub(DEBUG_COLUMNS * gw);
        for (line, (stat, label, indent)) in (1u32..).zip(rows) {
            let text = format!(
                "{:width$}{label} : {:3} ms / {:5.1} ms ",
                "",
                stat.last,
                stat.mean,
                width = indent + 1
            );
            self.text(ops, FontSize::Small, x, line * gh, &text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_driver_mock::MockRasterizer;

    fn layout(width: u32, height: u32) -> OverlayLayout {
        OverlayLayout::new(width, height, &MockRasterizer::new())
    }

    fn det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Detection {
        Detection {
            x_center: x,
            y_center: y,
            width: w,
            height: h,
            confidence: conf,
            class_index: 0,
        }
    }

    fn texts(ops: &[DrawOp]) -> Vec<&str> {
        ops.iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                DrawOp::Rect { .. } => None,
            })
            .collect()
    }

    #[test]
    fn centered_box_maps_to_pixels() {
        let rect = layout(100, 100)
            .detection_box(&det(0.5, 0.5, 0.5, 0.5, 0.9))
            .unwrap();
        assert_eq!(
            rect,
            PixelRect {
                x: 25,
                y: 25,
                width: 50,
                height: 50
            }
        );
    }

    #[test]
    fn boxes_are_clamped_to_the_frame() {
        let l = layout(100, 80);
        let rect = l.detection_box(&det(0.95, 0.05, 0.4, 0.4, 0.5)).unwrap();
        assert_eq!(rect.x + rect.width, 99);
        assert_eq!(rect.y, 0);
        assert!(rect.y + rect.height < 80);

        assert_eq!(l.detection_box(&det(0.5, 0.5, 0.0, 0.0, 0.5)), None);
        assert_eq!(l.detection_box(&det(2.0, 2.0, 0.1, 0.1, 0.5)), None);
    }

    #[test]
    fn overlay_without_debug_table() {
        let l = layout(640, 480);
        let stats = StatInfo {
            nn_inference: TimeStat {
                last: 12,
                ..TimeStat::default()
            },
            ..StatInfo::default()
        };
        let cpu = CpuLoad {
            one_second: 42.5,
            ..CpuLoad::default()
        };
        let ops = l.build(&[det(0.5, 0.5, 0.2, 0.2, 0.875)], &stats, &cpu, false);

        assert!(matches!(ops[0], DrawOp::Rect { color: BOX_COLOR, .. }));
        assert_eq!(
            texts(&ops),
            vec![" 87.5 %", " Inference : 12.0 ms ", " Cpu load  : 42.5  % ", "1"]
        );

        // status lines sit four lines above the bottom
        let status_y: Vec<u32> = ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text {
                    y,
                    font: FontSize::Medium,
                    x: STATUS_X,
                    ..
                } => Some(*y),
                _ => None,
            })
            .collect();
        assert_eq!(status_y, vec![26 * 16, 27 * 16]);
    }

    #[test]
    fn debug_table_lists_every_stage() {
        let l = layout(640, 480);
        let mut stats = StatInfo::default();
        stats.nn_total = TimeStat {
            last: 33,
            total: 2,
            acc: 63,
            mean: 31.5,
        };
        let ops = l.build(&[], &stats, &CpuLoad::default(), true);
        let lines = texts(&ops);

        assert_eq!(lines.len(), 3 + 6);
        assert_eq!(lines[3], " NN thread stats   :  33 ms /  31.5 ms ");
        assert_eq!(lines[4], "     inference     :   0 ms /   0.0 ms ");
        assert!(lines[5].starts_with(" DISP thread stats"));

        let first_row = ops
            .iter()
            .find(|op| matches!(op, DrawOp::Text { font: FontSize::Small, .. }))
            .unwrap();
        assert!(matches!(
            first_row,
            DrawOp::Text { x, y: 12, .. } if *x == 640 - 41 * 7
        ));
    }

    #[test]
    fn badge_saturates_at_nine() {
        let l = layout(640, 480);
        let many = vec![det(0.5, 0.5, 0.1, 0.1, 0.5); 12];
        let ops = l.build(&many, &StatInfo::default(), &CpuLoad::default(), false);
        assert!(ops.contains(&DrawOp::Text {
            x: 16,
            y: 16,
            font: FontSize::Large,
            text: "9".to_string(),
        }));
    }

    #[test]
    fn text_is_clipped_to_small_frames() {
        let l = layout(60, 40);
        let ops = l.build(
            &[det(0.5, 0.5, 0.5, 0.5, 0.5)],
            &StatInfo::default(),
            &CpuLoad::default(),
            true,
        );
        for op in &ops {
            if let DrawOp::Text { x, y, font, text } = op {
                let (gw, gh) = l.glyph(*font);
                assert!(x + gw * text.chars().count() as u32 <= 60, "{text:?}");
                assert!(y + gh <= 40, "{text:?}");
            }
        }
    }
}
