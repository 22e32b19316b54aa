//! The stroke graph: decoded notebook content shared by rendering and
//! recognition.
//!
//! Every type here is plain data. Documents are built bottom-up once by the
//! decoder (or by the notebook loader that stitches per-page decodes
//! together) and are read-only afterwards, so a single `Arc<StrokeDocument>`
//! can be handed to any number of concurrent page renders without locking.
//! Traversal is strictly top-down: points do not know their stroke, strokes
//! do not know their layer.

use serde::{Deserialize, Serialize};

/// Revision of the on-device page format, as sniffed from the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FormatRevision {
    /// Fixed-offset layout, first generation.
    V3,
    /// Fixed-offset layout with the v5 tool set.
    V5,
    /// Newest revision; decoded by the resynchronizing decoder.
    V6,
    /// Header did not name a revision we recognise.
    #[default]
    Unknown,
}

/// Stylus tool used to draw a stroke.
///
/// Device files carry a numeric brush code; both tool generations map onto
/// the same variant (e.g. codes 4 and 17 are both a fineliner). Codes with no
/// known tool map to [`PenType::Unknown`] and render with a generic
/// pressure-scaled width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PenType {
    Brush,
    Ballpoint,
    Fineliner,
    Marker,
    TiltPencil,
    MechanicalPencil,
    Highlighter,
    Eraser,
    EraseArea,
    Unknown,
}

impl PenType {
    /// Map a device brush code to its tool.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 | 12 => PenType::Brush,
            1 | 14 => PenType::TiltPencil,
            2 | 15 => PenType::Ballpoint,
            3 | 16 => PenType::Marker,
            4 | 17 => PenType::Fineliner,
            5 | 18 => PenType::Highlighter,
            6 => PenType::Eraser,
            7 | 13 => PenType::MechanicalPencil,
            8 => PenType::EraseArea,
            _ => PenType::Unknown,
        }
    }

    pub fn is_highlighter(self) -> bool {
        self == PenType::Highlighter
    }
}

/// One timestamped stylus sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub x: f32,
    pub y: f32,
    /// Device units.
    pub speed: f32,
    /// Encoded tilt, 0–255 spanning a full turn.
    pub direction: f32,
    /// Device-reported width.
    pub width: f32,
    /// Device-reported pressure, not normalised.
    pub pressure: f32,
}

/// One continuous pen-down gesture.
///
/// Strokes produced by the decoder always hold at least one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub pen: PenType,
    /// Raw brush code as stored in the file.
    pub brush_code: u32,
    /// Palette index, see [`crate::pipeline::pens::palette_color`].
    pub color: u32,
    /// Header field kept verbatim.
    pub padding: u32,
    pub brush_size: f32,
    /// Reserved header field kept verbatim.
    pub reserved: f32,
    pub points: Vec<SamplePoint>,
}

impl Stroke {
    /// Build a stroke from its raw brush code.
    pub fn new(brush_code: u32, color: u32, brush_size: f32, points: Vec<SamplePoint>) -> Self {
        Self {
            pen: PenType::from_code(brush_code),
            brush_code,
            color,
            padding: 0,
            brush_size,
            reserved: 0.0,
            points,
        }
    }

    /// Strokes the renderer draws: not an erase-area and at least two points.
    pub fn is_drawable(&self) -> bool {
        self.pen != PenType::EraseArea && self.points.len() >= 2
    }
}

/// Ordered group of strokes; order is drawing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub strokes: Vec<Stroke>,
}

/// One notebook page. Zero layers or zero strokes is a valid empty page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub layers: Vec<Layer>,
}

impl Page {
    /// All strokes in layer-then-stroke order.
    pub fn strokes(&self) -> impl Iterator<Item = &Stroke> {
        self.layers.iter().flat_map(|l| l.strokes.iter())
    }

    pub fn stroke_count(&self) -> usize {
        self.layers.iter().map(|l| l.strokes.len()).sum()
    }

    pub fn point_count(&self) -> usize {
        self.strokes().map(|s| s.points.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stroke_count() == 0
    }
}

/// Top-level decode result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrokeDocument {
    pub revision: FormatRevision,
    /// Opaque document identifier.
    pub id: String,
    pub pages: Vec<Page>,
    /// 0-based index of the page that was open last on the device.
    pub last_opened: Option<usize>,
}

impl StrokeDocument {
    pub fn new(
        revision: FormatRevision,
        id: impl Into<String>,
        pages: Vec<Page>,
        last_opened: Option<usize>,
    ) -> Self {
        Self {
            revision,
            id: id.into(),
            pages,
            last_opened,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn stroke_count(&self) -> usize {
        self.pages.iter().map(Page::stroke_count).sum()
    }
}
