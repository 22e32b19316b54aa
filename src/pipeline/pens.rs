//! Pen model: per-sample width, colour and opacity for every tool.
//!
//! A [`PenModel`] is resolved once per stroke from its static fields (tool,
//! palette colour, brush size). Evaluating a sample afterwards is a pure
//! function of that sample's dynamics, so the renderer never needs to know
//! which tool it is drawing with.
//!
//! Inputs used in the formulas below: pressure `p`, speed `s`, device width
//! `w`, base width `b` and tilt `t`, where `t` is the encoded direction
//! mapped from `[0, 255]` onto `[0, 2π)`.

use crate::model::{PenType, SamplePoint, Stroke};
use std::f32::consts::TAU;

/// RGB triple.
pub type Rgb = [u8; 3];

const BLACK: Rgb = [0, 0, 0];
const WHITE: Rgb = [255, 255, 255];

/// Device colour palette, indexed by colour id.
const PALETTE: [Rgb; 14] = [
    [0, 0, 0],       // black
    [144, 144, 144], // gray
    [255, 255, 255], // white
    [251, 247, 25],  // yellow
    [0, 255, 0],     // green
    [255, 192, 203], // pink
    [78, 105, 201],  // blue
    [179, 62, 57],   // red
    [125, 125, 125], // gray overlap
    [251, 247, 25],  // highlight
    [161, 216, 125], // green 2
    [139, 208, 229], // cyan
    [183, 130, 205], // magenta
    [247, 232, 81],  // yellow 2
];

const FINELINER_WIDTH_FACTOR: f32 = 1.8;
const ERASER_WIDTH_FACTOR: f32 = 2.0;
/// Device units; highlighter width does not follow the brush size.
pub const HIGHLIGHTER_WIDTH: f32 = 15.0;
pub const HIGHLIGHTER_OPACITY: f32 = 0.45;
const MECHANICAL_PENCIL_OPACITY: f32 = 0.7;
const TILT_PENCIL_MAX_WIDTH_FACTOR: f32 = 10.0;
const BALLPOINT_MAX_GRAY: f32 = 60.0;
const WHITE_BRUSH_GRAY: f32 = 250.0;
const WHITE_BRUSH_GRAY_RANGE: f32 = 15.0;

/// Resolve a palette id; unknown ids fall back to black.
pub fn palette_color(id: u32) -> Rgb {
    PALETTE.get(id as usize).copied().unwrap_or(BLACK)
}

/// Mix a colour with white, the pastel tint highlighters are drawn with.
pub fn lighten(c: Rgb) -> Rgb {
    c.map(|v| (v as f32 * 0.7 + 255.0 * 0.3) as u8)
}

/// Instantaneous appearance of one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenSample {
    pub width: f32,
    pub color: Rgb,
    pub opacity: f32,
}

/// Per-stroke pen state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenModel {
    pen: PenType,
    base_color: Rgb,
    base_width: f32,
}

impl PenModel {
    pub fn new(pen: PenType, color_id: u32, brush_size: f32) -> Self {
        let base_color = match pen {
            PenType::Eraser | PenType::EraseArea => WHITE,
            PenType::Highlighter => lighten(palette_color(color_id)),
            _ => palette_color(color_id),
        };
        Self {
            pen,
            base_color,
            base_width: brush_size,
        }
    }

    pub fn for_stroke(stroke: &Stroke) -> Self {
        Self::new(stroke.pen, stroke.color, stroke.brush_size)
    }

    pub fn pen(&self) -> PenType {
        self.pen
    }

    /// Colour before any per-sample modulation.
    pub fn base_color(&self) -> Rgb {
        self.base_color
    }

    pub fn sample(&self, pt: &SamplePoint) -> PenSample {
        PenSample {
            width: self.width(pt),
            color: self.color(pt),
            opacity: self.opacity(pt),
        }
    }

    pub fn width(&self, pt: &SamplePoint) -> f32 {
        let (p, s, w, b) = (pt.pressure, pt.speed, pt.width, self.base_width);
        let t = tilt(pt.direction);
        match self.pen {
            PenType::Brush => 0.7 * (((1.0 + 1.4 * p) * (w / 4.0)) - 0.5 * t - (s / 4.0) / 50.0),
            PenType::Ballpoint => (0.5 + p) + (w / 4.0) - 0.5 * ((s / 4.0) / 50.0),
            PenType::Fineliner => b * FINELINER_WIDTH_FACTOR,
            PenType::Marker => 0.9 * ((w / 4.0) - 0.4 * t),
            PenType::TiltPencil => {
                let width = 0.7
                    * (((0.8 * b + 0.5 * p) * (w / 4.0))
                        - 0.25 * t.max(0.0).powf(1.8)
                        - 0.6 * ((s / 4.0) / 50.0));
                width.min(b * TILT_PENCIL_MAX_WIDTH_FACTOR)
            }
            PenType::MechanicalPencil => b * b,
            PenType::Highlighter => HIGHLIGHTER_WIDTH,
            PenType::Eraser => b * ERASER_WIDTH_FACTOR,
            PenType::EraseArea => b,
            PenType::Unknown => b * (0.5 + 0.5 * p),
        }
    }

    pub fn color(&self, pt: &SamplePoint) -> Rgb {
        let (p, s) = (pt.pressure, pt.speed);
        match self.pen {
            PenType::Brush => {
                let intensity = clamp01((p.max(0.0).powf(1.5) - 0.2 * ((s / 4.0) / 50.0)) * 1.5);
                if self.base_color == WHITE {
                    let gray = (WHITE_BRUSH_GRAY - intensity * WHITE_BRUSH_GRAY_RANGE) as u8;
                    [gray; 3]
                } else {
                    // Full intensity is the base colour, zero fades to white.
                    self.base_color
                        .map(|c| (c as f32 + (255.0 - c as f32) * (1.0 - intensity)) as u8)
                }
            }
            PenType::Ballpoint => {
                let intensity = clamp01(0.1 * -((s / 4.0) / 35.0) + 1.2 * p + 0.5);
                let gray = ((intensity - 1.0).abs() * 255.0).min(BALLPOINT_MAX_GRAY) as u8;
                [gray; 3]
            }
            _ => self.base_color,
        }
    }

    pub fn opacity(&self, pt: &SamplePoint) -> f32 {
        match self.pen {
            PenType::TiltPencil => {
                let o = clamp01(0.1 * -((pt.speed / 4.0) / 35.0) + pt.pressure) - 0.1;
                o.max(0.0)
            }
            PenType::MechanicalPencil => MECHANICAL_PENCIL_OPACITY,
            PenType::Highlighter => HIGHLIGHTER_OPACITY,
            PenType::EraseArea => 0.0,
            _ => 1.0,
        }
    }
}

/// Encoded direction (0–255) to radians.
fn tilt(direction: f32) -> f32 {
    direction * TAU / 255.0
}

/// NaN maps to 0.
fn clamp01(v: f32) -> f32 {
    if v > 1.0 {
        1.0
    } else if v > 0.0 {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pressure: f32, speed: f32, direction: f32, width: f32) -> SamplePoint {
        SamplePoint {
            x: 0.0,
            y: 0.0,
            speed,
            direction,
            width,
            pressure,
        }
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn palette_lookup_and_fallback() {
        assert_eq!(palette_color(0), [0, 0, 0]);
        assert_eq!(palette_color(6), [78, 105, 201]);
        assert_eq!(palette_color(13), [247, 232, 81]);
        assert_eq!(palette_color(14), [0, 0, 0]);
        assert_eq!(palette_color(u32::MAX), [0, 0, 0]);
    }

    #[test]
    fn constant_width_pens_ignore_dynamics() {
        let a = sample(0.1, 0.0, 0.0, 2.0);
        let b = sample(0.9, 400.0, 128.0, 40.0);
        let fine = PenModel::new(PenType::Fineliner, 0, 2.0);
        assert!(approx(fine.width(&a), 3.6));
        assert_eq!(fine.width(&a), fine.width(&b));

        let mech = PenModel::new(PenType::MechanicalPencil, 0, 3.0);
        assert!(approx(mech.width(&a), 9.0));
        assert_eq!(mech.opacity(&b), 0.7);

        let hl = PenModel::new(PenType::Highlighter, 3, 2.0);
        assert_eq!(hl.width(&a), HIGHLIGHTER_WIDTH);
        assert_eq!(hl.width(&b), HIGHLIGHTER_WIDTH);
        assert_eq!(hl.opacity(&a), HIGHLIGHTER_OPACITY);

        let eraser = PenModel::new(PenType::Eraser, 6, 2.5);
        assert!(approx(eraser.width(&b), 5.0));
    }

    #[test]
    fn dynamic_width_formulas() {
        let pt = sample(0.5, 40.0, 0.0, 8.0);
        // (0.5+0.5) + 2 - 0.5*(10/50)
        let ball = PenModel::new(PenType::Ballpoint, 0, 2.0);
        assert!(approx(ball.width(&pt), 2.9));
        // 0.7*((1.7*2) - 0 - 0.2)
        let brush = PenModel::new(PenType::Brush, 0, 2.0);
        assert!(approx(brush.width(&pt), 2.24));
        // 0.9*(2 - 0)
        let marker = PenModel::new(PenType::Marker, 0, 2.0);
        assert!(approx(marker.width(&pt), 1.8));
        // 2 * (0.5 + 0.25)
        let unknown = PenModel::new(PenType::Unknown, 0, 2.0);
        assert!(approx(unknown.width(&pt), 1.5));
    }

    #[test]
    fn tilt_narrows_marker() {
        let marker = PenModel::new(PenType::Marker, 0, 2.0);
        let upright = marker.width(&sample(0.5, 0.0, 0.0, 8.0));
        let tilted = marker.width(&sample(0.5, 0.0, 64.0, 8.0));
        assert!(tilted < upright);
    }

    #[test]
    fn tilt_pencil_width_is_capped() {
        let pencil = PenModel::new(PenType::TiltPencil, 0, 1.0);
        let w = pencil.width(&sample(1.0, 0.0, 0.0, 400.0));
        assert!(approx(w, 10.0));
    }

    #[test]
    fn tilt_pencil_opacity_floors_at_zero() {
        let pencil = PenModel::new(PenType::TiltPencil, 0, 2.0);
        assert_eq!(pencil.opacity(&sample(0.0, 0.0, 0.0, 2.0)), 0.0);
        assert!(approx(pencil.opacity(&sample(0.8, 0.0, 0.0, 2.0)), 0.7));
        assert!(approx(pencil.opacity(&sample(2.0, 0.0, 0.0, 2.0)), 0.9));
    }

    #[test]
    fn erasers_are_white() {
        let pt = sample(0.5, 0.0, 0.0, 2.0);
        let eraser = PenModel::new(PenType::Eraser, 6, 2.0);
        assert_eq!(eraser.color(&pt), WHITE);
        assert_eq!(eraser.opacity(&pt), 1.0);
        let area = PenModel::new(PenType::EraseArea, 6, 2.0);
        assert_eq!(area.color(&pt), WHITE);
        assert_eq!(area.opacity(&pt), 0.0);
    }

    #[test]
    fn ballpoint_gray_is_capped() {
        let ball = PenModel::new(PenType::Ballpoint, 6, 2.0);
        // Light pressure: intensity 0.5 → 127.5, capped.
        assert_eq!(ball.color(&sample(0.0, 0.0, 0.0, 2.0)), [60, 60, 60]);
        // Firm pressure saturates to black.
        assert_eq!(ball.color(&sample(1.0, 0.0, 0.0, 2.0)), [0, 0, 0]);
    }

    #[test]
    fn brush_blends_toward_base_color() {
        let black = PenModel::new(PenType::Brush, 0, 2.0);
        assert_eq!(black.color(&sample(1.0, 0.0, 0.0, 2.0)), [0, 0, 0]);
        assert_eq!(black.color(&sample(0.0, 0.0, 0.0, 2.0)), [255, 255, 255]);

        let blue = PenModel::new(PenType::Brush, 6, 2.0);
        assert_eq!(blue.color(&sample(1.0, 0.0, 0.0, 2.0)), [78, 105, 201]);

        let white = PenModel::new(PenType::Brush, 2, 2.0);
        assert_eq!(white.color(&sample(1.0, 0.0, 0.0, 2.0)), [235, 235, 235]);
        assert_eq!(white.color(&sample(0.0, 0.0, 0.0, 2.0)), [250, 250, 250]);
    }

    #[test]
    fn highlighter_uses_pastel_base() {
        let hl = PenModel::new(PenType::Highlighter, 6, 2.0);
        // 78*0.7+76.5, 105*0.7+76.5, 201*0.7+76.5
        assert_eq!(hl.base_color(), [131, 150, 217]);
        assert_eq!(hl.color(&sample(0.5, 0.0, 0.0, 2.0)), [131, 150, 217]);
    }

    #[test]
    fn sample_bundles_all_three() {
        let fine = PenModel::new(PenType::Fineliner, 7, 2.0);
        let s = fine.sample(&sample(0.5, 0.0, 0.0, 2.0));
        assert_eq!(s.color, [179, 62, 57]);
        assert_eq!(s.opacity, 1.0);
        assert!(approx(s.width, 3.6));
    }
}
