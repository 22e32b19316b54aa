//! Canvas primitives: blended discs, filled quads, ribbons and capsules.
//!
//! Every primitive composites with the source-over operator and clips
//! silently at the canvas edges. Coordinates are signed so callers can pass
//! points that fall outside the canvas.

use super::pens::Rgb;
use image::{Rgba, RgbaImage};

/// Source-over blend of `fg` at opacity `alpha/255` onto `bg`. The result is
/// always opaque.
pub fn blend(bg: Rgba<u8>, fg: Rgb, alpha: u8) -> Rgba<u8> {
    let a = alpha as f32 / 255.0;
    let inv = 1.0 - a;
    let mix = |f: u8, b: u8| (f as f32 * a + b as f32 * inv) as u8;
    Rgba([mix(fg[0], bg[0]), mix(fg[1], bg[1]), mix(fg[2], bg[2]), 255])
}

/// Convert an opacity in `[0, 1]` to an 8-bit alpha. Out-of-range and NaN
/// saturate.
pub fn alpha_of(opacity: f32) -> u8 {
    (255.0 * opacity) as u8
}

fn blend_at(img: &mut RgbaImage, x: i64, y: i64, color: Rgb, alpha: u8) {
    if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
        return;
    }
    let (x, y) = (x as u32, y as u32);
    let bg = *img.get_pixel(x, y);
    img.put_pixel(x, y, blend(bg, color, alpha));
}

/// Filled disc of integer `radius` centred on `(cx, cy)`.
pub fn fill_disc(img: &mut RgbaImage, cx: i64, cy: i64, radius: i64, color: Rgb, alpha: u8) {
    if radius <= 0 {
        return;
    }
    let r2 = radius * radius;
    let (w, h) = (img.width() as i64, img.height() as i64);
    let y0 = (cy - radius).max(0);
    let y1 = (cy + radius).min(h - 1);
    let x0 = (cx - radius).max(0);
    let x1 = (cx + radius).min(w - 1);
    for y in y0..=y1 {
        let dy = y - cy;
        for x in x0..=x1 {
            let dx = x - cx;
            if dx * dx + dy * dy <= r2 {
                blend_at(img, x, y, color, alpha);
            }
        }
    }
}

/// Even-odd ray cast against an integer polygon.
fn point_in_polygon(x: i64, y: i64, poly: &[(i64, i64)]) -> bool {
    let mut inside = false;
    let mut j = poly.len() - 1;
    for i in 0..poly.len() {
        let (xi, yi) = poly[i];
        let (xj, yj) = poly[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Fill a simple polygon, blending every covered pixel once.
pub fn fill_polygon(img: &mut RgbaImage, poly: &[(i64, i64)], color: Rgb, alpha: u8) {
    if poly.len() < 3 {
        return;
    }
    let (w, h) = (img.width() as i64, img.height() as i64);
    let min_x = poly.iter().map(|p| p.0).min().unwrap_or(0).max(0);
    let max_x = poly.iter().map(|p| p.0).max().unwrap_or(0).min(w - 1);
    let min_y = poly.iter().map(|p| p.1).min().unwrap_or(0).max(0);
    let max_y = poly.iter().map(|p| p.1).max().unwrap_or(0).min(h - 1);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if point_in_polygon(x, y, poly) {
                blend_at(img, x, y, color, alpha);
            }
        }
    }
}

/// Constant-width translucent band through `points`, with round caps at
/// both ends. Each segment is filled as its own quad, so a band that folds
/// back over itself compounds where it overlaps.
pub fn ribbon(img: &mut RgbaImage, points: &[(i64, i64)], width: i64, color: Rgb, alpha: u8) {
    if points.len() < 2 {
        return;
    }
    let half = width as f32 / 2.0;
    for pair in points.windows(2) {
        let ((x1, y1), (x2, y2)) = (pair[0], pair[1]);
        let dx = (x2 - x1) as f32;
        let dy = (y2 - y1) as f32;
        let len = (dx * dx + dy * dy).sqrt();
        if len == 0.0 {
            continue;
        }
        // Unit normal scaled to half the band width.
        let nx = -dy / len * half;
        let ny = dx / len * half;
        let (x1, y1, x2, y2) = (x1 as f32, y1 as f32, x2 as f32, y2 as f32);
        let quad = [
            ((x1 + nx) as i64, (y1 + ny) as i64),
            ((x1 - nx) as i64, (y1 - ny) as i64),
            ((x2 - nx) as i64, (y2 - ny) as i64),
            ((x2 + nx) as i64, (y2 + ny) as i64),
        ];
        fill_polygon(img, &quad, color, alpha);
    }
    let (sx, sy) = points[0];
    let (ex, ey) = points[points.len() - 1];
    fill_disc(img, ex, ey, width / 2, color, alpha);
    fill_disc(img, sx, sy, width / 2, color, alpha);
}

/// One end of a capsule segment: canvas position plus pen state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Knot {
    pub x: i64,
    pub y: i64,
    pub radius: i64,
    pub color: Rgb,
    pub opacity: f32,
}

/// Variable-width segment drawn as a run of discs, one per device pixel,
/// with radius, colour and opacity interpolated linearly between the ends.
pub fn capsule(img: &mut RgbaImage, a: Knot, b: Knot) {
    let dx = (b.x - a.x) as f32;
    let dy = (b.y - a.y) as f32;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        fill_disc(img, a.x, a.y, a.radius, a.color, alpha_of(a.opacity));
        return;
    }

    let steps = ((len as i64) + 1).max(2);
    let lerp = |from: f32, to: f32, t: f32| from + (to - from) * t;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let x = lerp(a.x as f32, b.x as f32, t);
        let y = lerp(a.y as f32, b.y as f32, t);
        let radius = (lerp(a.radius as f32, b.radius as f32, t) + 0.5) as i64;
        let color = [0, 1, 2].map(|c| lerp(a.color[c] as f32, b.color[c] as f32, t) as u8);
        let opacity = lerp(a.opacity, b.opacity, t);
        fill_disc(
            img,
            (x + 0.5) as i64,
            (y + 0.5) as i64,
            radius.max(1),
            color,
            alpha_of(opacity),
        );
    }
}
