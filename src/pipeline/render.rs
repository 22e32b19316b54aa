//! Page rasterisation: stroke graph → RGBA canvas.
//!
//! ## Layout
//!
//! The output width is fixed; the height follows the content. The canvas
//! frames the bounding box of every drawable stroke plus a border of
//! `max(extent × padding_percent, min_padding)` on each side, scaled
//! uniformly so the framed width fills the target width.
//!
//! ## Two passes
//!
//! Highlighters are drawn first as translucent ribbons so ink always sits on
//! top of them, whatever the layer order. Every other stroke is drawn second
//! as a chain of variable-width capsules driven by the pen model. Within each
//! pass strokes are drawn in layer-then-stroke order and composited with the
//! source-over operator, so the output is a deterministic function of the
//! page and config.
//!
//! ## Why spawn_blocking?
//!
//! Rasterising a dense page touches millions of pixels. [`render_on_pool`]
//! moves that work onto the blocking thread pool so Tokio worker threads keep
//! driving recognition calls for other pages.

use super::pens::{self, PenModel};
use super::raster::{self, Knot};
use crate::config::RenderConfig;
use crate::error::PageError;
use crate::model::{Page, SamplePoint, Stroke, StrokeDocument};
use image::{Rgba, RgbaImage};
use std::sync::Arc;
use tracing::debug;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

const HIGHLIGHTER_WIDTH_FACTOR: f32 = 4.0;
const HIGHLIGHTER_MIN_WIDTH: i64 = 20;
const HIGHLIGHTER_MAX_WIDTH: i64 = 100;

/// Largest canvas side the renderer will allocate. Content that would be
/// taller is scaled down to fit, leaving a margin on the right.
pub const MAX_CANVAS_DIMENSION: u32 = 16_384;

/// Content extent in document units, plus the padding on each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl BoundingBox {
    /// Width including padding on both sides.
    pub fn framed_width(&self) -> f32 {
        self.max_x - self.min_x + 2.0 * self.pad_x
    }

    pub fn framed_height(&self) -> f32 {
        self.max_y - self.min_y + 2.0 * self.pad_y
    }
}

/// Bounding box of every drawable stroke, or `None` for a blank page.
pub fn bounding_box(page: &Page, cfg: &RenderConfig) -> Option<BoundingBox> {
    let mut points = page
        .strokes()
        .filter(|s| s.is_drawable())
        .flat_map(|s| s.points.iter());
    let first = points.next()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    Some(BoundingBox {
        min_x,
        min_y,
        max_x,
        max_y,
        pad_x: ((max_x - min_x) * cfg.padding_percent).max(cfg.min_padding),
        pad_y: ((max_y - min_y) * cfg.padding_percent).max(cfg.min_padding),
    })
}

/// Document → canvas mapping.
#[derive(Debug, Clone, Copy)]
struct Frame {
    bbox: BoundingBox,
    scale: f32,
}

impl Frame {
    fn map(&self, p: &SamplePoint) -> (i64, i64) {
        let x = (p.x - self.bbox.min_x + self.bbox.pad_x) * self.scale;
        let y = (p.y - self.bbox.min_y + self.bbox.pad_y) * self.scale;
        (x as i64, y as i64)
    }
}

/// Render one page to a `target_width`-wide canvas.
///
/// Never fails: a page with nothing drawable yields an all-white
/// `target_width × min_height` canvas. Height is capped at
/// [`MAX_CANVAS_DIMENSION`] by shrinking the scale, so a sliver of content
/// with no padding cannot ask for an unbounded allocation.
pub fn render_page(page: &Page, target_width: u32, cfg: &RenderConfig) -> RgbaImage {
    let Some(bbox) = bounding_box(page, cfg) else {
        debug!("Blank page → {}x{} canvas", target_width, cfg.min_height);
        return RgbaImage::from_pixel(target_width, cfg.min_height, WHITE);
    };

    let max_height = MAX_CANVAS_DIMENSION.max(cfg.min_height);
    let framed_w = bbox.framed_width();
    let framed_h = bbox.framed_height();
    let (scale, height) = if framed_w > 0.0 {
        let scale = target_width as f32 / framed_w;
        if framed_h * scale > max_height as f32 {
            debug!(
                "Content {:.2}x{:.2} too tall at scale {:.3}, fitting to {} px",
                framed_w, framed_h, scale, max_height
            );
            (max_height as f32 / framed_h, max_height)
        } else {
            let height = (framed_h * scale) as u32;
            (scale, height.max(cfg.min_height))
        }
    } else {
        (1.0, cfg.min_height)
    };
    let frame = Frame { bbox, scale };
    let mut img = RgbaImage::from_pixel(target_width, height, WHITE);

    let drawable = || page.strokes().filter(|s| s.is_drawable());

    let mut highlighters = 0usize;
    for stroke in drawable().filter(|s| s.pen.is_highlighter()) {
        draw_highlighter(&mut img, stroke, &frame, cfg);
        highlighters += 1;
    }
    let mut inked = 0usize;
    for stroke in drawable().filter(|s| !s.pen.is_highlighter()) {
        draw_ink(&mut img, stroke, &frame, cfg);
        inked += 1;
    }

    debug!(
        "Rendered {}x{} (scale {:.3}): {} highlighter + {} ink strokes",
        target_width, height, scale, highlighters, inked
    );
    img
}

fn draw_highlighter(img: &mut RgbaImage, stroke: &Stroke, frame: &Frame, cfg: &RenderConfig) {
    let pen = PenModel::for_stroke(stroke);
    let width = ((pens::HIGHLIGHTER_WIDTH * cfg.stroke_width_scale * HIGHLIGHTER_WIDTH_FACTOR)
        as i64)
        .clamp(HIGHLIGHTER_MIN_WIDTH, HIGHLIGHTER_MAX_WIDTH);
    let points: Vec<(i64, i64)> = stroke.points.iter().map(|p| frame.map(p)).collect();
    raster::ribbon(
        img,
        &points,
        width,
        pen.base_color(),
        raster::alpha_of(pens::HIGHLIGHTER_OPACITY),
    );
}

fn draw_ink(img: &mut RgbaImage, stroke: &Stroke, frame: &Frame, cfg: &RenderConfig) {
    // Every capsule stamps both ends, so the chain already covers the first knot.
    for pair in ink_knots(stroke, frame, cfg).windows(2) {
        raster::capsule(img, pair[0], pair[1]);
    }
}

fn ink_knots(stroke: &Stroke, frame: &Frame, cfg: &RenderConfig) -> Vec<Knot> {
    let pen = PenModel::for_stroke(stroke);
    let min_r = cfg.min_stroke_width as i64;
    let max_r = cfg.max_stroke_width as i64;
    stroke
        .points
        .iter()
        .map(|p| {
            let s = pen.sample(p);
            let (x, y) = frame.map(p);
            Knot {
                x,
                y,
                radius: ((s.width * cfg.stroke_width_scale) as i64).clamp(min_r, max_r),
                color: s.color,
                opacity: s.opacity,
            }
        })
        .collect()
}

/// Render `doc.pages[index]` on the blocking thread pool.
pub async fn render_on_pool(
    doc: Arc<StrokeDocument>,
    index: usize,
    target_width: u32,
    cfg: RenderConfig,
) -> Result<RgbaImage, PageError> {
    tokio::task::spawn_blocking(move || {
        doc.page(index)
            .map(|page| render_page(page, target_width, &cfg))
            .ok_or_else(|| PageError::RenderFailed {
                page: index + 1,
                detail: format!("document has no page {}", index + 1),
            })
    })
    .await
    .map_err(|e| PageError::RenderFailed {
        page: index + 1,
        detail: format!("render task panicked: {e}"),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Layer;
    use crate::pipeline::raster::blend;

    fn pt(x: f32, y: f32) -> SamplePoint {
        SamplePoint {
            x,
            y,
            speed: 0.0,
            direction: 0.0,
            width: 8.0,
            pressure: 0.5,
        }
    }

    fn stroke(code: u32, color: u32, coords: &[(f32, f32)]) -> Stroke {
        Stroke::new(code, color, 2.0, coords.iter().map(|&(x, y)| pt(x, y)).collect())
    }

    fn page(layers: Vec<Vec<Stroke>>) -> Page {
        Page {
            layers: layers.into_iter().map(|strokes| Layer { strokes }).collect(),
        }
    }

    fn all_white(img: &RgbaImage) -> bool {
        img.pixels().all(|p| *p == WHITE)
    }

    #[test]
    fn blank_pages_are_minimum_white_canvas() {
        let cfg = RenderConfig::default();
        let cases = [
            Page::default(),
            page(vec![vec![]]),
            page(vec![vec![stroke(8, 0, &[(10.0, 10.0), (500.0, 500.0)])]]),
            page(vec![vec![stroke(17, 0, &[(10.0, 10.0)]), stroke(2, 0, &[(90.0, 90.0)])]]),
        ];
        for p in &cases {
            let img = render_page(p, 1404, &cfg);
            assert_eq!(img.dimensions(), (1404, 100));
            assert!(all_white(&img));
        }
    }

    #[test]
    fn bounding_box_of_fineliner_triangle() {
        let p = page(vec![vec![stroke(
            17,
            0,
            &[(100.0, 100.0), (200.0, 200.0), (300.0, 100.0)],
        )]]);
        let bb = bounding_box(&p, &RenderConfig::default()).unwrap();
        assert_eq!((bb.min_x, bb.max_x, bb.min_y, bb.max_y), (100.0, 300.0, 100.0, 200.0));
        assert_eq!(bb.pad_x, 50.0);
        assert_eq!(bb.pad_y, 50.0);
        assert_eq!(bb.framed_width(), 300.0);
    }

    #[test]
    fn bounding_box_ignores_erase_area_and_single_points() {
        let p = page(vec![vec![
            stroke(8, 0, &[(-900.0, -900.0), (19_000.0, 19_000.0)]),
            stroke(2, 0, &[(5000.0, 5000.0)]),
            stroke(2, 0, &[(0.0, 0.0), (1000.0, 2000.0)]),
        ]]);
        let bb = bounding_box(&p, &RenderConfig::default()).unwrap();
        assert_eq!((bb.min_x, bb.max_x, bb.min_y, bb.max_y), (0.0, 1000.0, 0.0, 2000.0));
        // 5% of the extent beats the 50-unit floor.
        assert_eq!(bb.pad_y, 100.0);
    }

    #[test]
    fn height_follows_aspect_ratio() {
        let p = page(vec![vec![stroke(
            17,
            0,
            &[(100.0, 100.0), (200.0, 200.0), (300.0, 100.0)],
        )]]);
        let img = render_page(&p, 1404, &RenderConfig::default());
        assert_eq!(img.width(), 1404);
        // (100 + 2·50) · 1404/300
        assert!((935..=936).contains(&img.height()), "h={}", img.height());
        assert!(!all_white(&img));
    }

    #[test]
    fn rendering_is_deterministic() {
        let p = page(vec![
            vec![
                stroke(17, 6, &[(100.0, 100.0), (200.0, 250.0), (300.0, 100.0)]),
                stroke(5, 3, &[(80.0, 150.0), (320.0, 150.0)]),
            ],
            vec![stroke(1, 7, &[(120.0, 90.0), (130.0, 260.0), (290.0, 210.0)])],
        ]);
        let cfg = RenderConfig::default();
        let a = render_page(&p, 1404, &cfg);
        let b = render_page(&p, 1404, &cfg);
        assert_eq!(a.dimensions(), b.dimensions());
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn overlapping_highlighters_compound() {
        let line = [(100.0, 100.0), (300.0, 100.0)];
        let p = page(vec![vec![stroke(5, 0, &line), stroke(5, 0, &line)]]);
        let img = render_page(&p, 1404, &RenderConfig::default());
        let px = *img.get_pixel(img.width() / 2, img.height() / 2);

        let tint = pens::lighten([0, 0, 0]);
        let alpha = raster::alpha_of(pens::HIGHLIGHTER_OPACITY);
        let once = blend(WHITE, tint, alpha);
        let twice = blend(once, tint, alpha);
        assert_eq!(px, twice);
        assert_ne!(px, once);

        let a = alpha as f32 / 255.0;
        let coverage = (255.0 - px[0] as f32) / (255.0 - tint[0] as f32);
        let expected = 1.0 - (1.0 - a) * (1.0 - a);
        assert!((coverage - expected).abs() < 0.02, "coverage {coverage}");
        assert!((coverage - a).abs() > 0.1);
        assert!((coverage - 2.0 * a).abs() > 0.1);
    }

    #[test]
    fn ink_is_drawn_over_later_highlighter() {
        let line = [(100.0, 100.0), (300.0, 100.0)];
        let p = page(vec![vec![stroke(17, 0, &line)], vec![stroke(5, 6, &line)]]);
        let img = render_page(&p, 1404, &RenderConfig::default());
        let px = *img.get_pixel(img.width() / 2, img.height() / 2);
        assert_eq!(px, Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn eraser_paints_white_over_ink() {
        let ink = stroke(17, 0, &[(100.0, 100.0), (300.0, 100.0)]);
        let mut eraser = stroke(6, 0, &[(100.0, 100.0), (300.0, 100.0)]);
        eraser.brush_size = 40.0;
        let p = page(vec![vec![ink, eraser]]);
        let img = render_page(&p, 1404, &RenderConfig::default());
        assert_eq!(*img.get_pixel(img.width() / 2, img.height() / 2), WHITE);
    }

    #[test]
    fn strokes_near_edges_clip() {
        let cfg = RenderConfig {
            min_padding: 0.0,
            padding_percent: 0.0,
            min_stroke_width: 8,
            ..RenderConfig::default()
        };
        let p = page(vec![vec![
            stroke(17, 0, &[(0.0, 0.0), (100.0, 0.0)]),
            stroke(5, 3, &[(0.0, 0.0), (0.0, 100.0)]),
        ]]);
        let img = render_page(&p, 200, &cfg);
        assert_eq!(img.width(), 200);
        assert_eq!(*img.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn sliver_without_padding_is_capped_in_height() {
        let cfg = RenderConfig {
            min_padding: 0.0,
            ..RenderConfig::default()
        };
        let p = page(vec![vec![stroke(17, 0, &[(100.0, 100.0), (100.01, 5000.0)])]]);
        let bb = bounding_box(&p, &cfg).unwrap();
        assert!(bb.framed_width() < 0.1);

        let img = render_page(&p, 1404, &cfg);
        assert_eq!(img.width(), 1404);
        assert_eq!(img.height(), MAX_CANVAS_DIMENSION);
        assert!(!all_white(&img));
    }

    #[test]
    fn translucent_ink_is_exactly_its_capsule_chain() {
        // Mechanical pencil draws at 0.7 opacity, so any extra stamp shows.
        let p = page(vec![vec![stroke(7, 0, &[(100.0, 100.0), (160.0, 130.0), (300.0, 100.0)])]]);
        let cfg = RenderConfig::default();
        let img = render_page(&p, 1404, &cfg);

        let bbox = bounding_box(&p, &cfg).unwrap();
        let frame = Frame {
            bbox,
            scale: 1404.0 / bbox.framed_width(),
        };
        let mut expected = RgbaImage::from_pixel(img.width(), img.height(), WHITE);
        let knots = ink_knots(&p.layers[0].strokes[0], &frame, &cfg);
        for pair in knots.windows(2) {
            raster::capsule(&mut expected, pair[0], pair[1]);
        }
        assert_eq!(img.as_raw(), expected.as_raw());
    }

    #[tokio::test]
    async fn render_on_pool_reports_missing_page() {
        let doc = Arc::new(StrokeDocument::default());
        let err = render_on_pool(doc, 2, 1404, RenderConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::RenderFailed { page: 3, .. }));
    }
}
