//! Output types returned by the conversion entry points.

use crate::error::PageError;
use crate::model::{FormatRevision, StrokeDocument};
use serde::{Deserialize, Serialize};

/// Result of a full conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Identifier of the converted document.
    pub document_id: String,
    /// Per-page results in selection order.
    pub pages: Vec<PageResult>,
    /// Recognised text of all pages, when a recognizer was configured.
    pub text: Option<String>,
    pub stats: ConversionStats,
}

/// Result for one page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    pub width: u32,
    pub height: u32,
    /// PNG bytes; empty when rendering or encoding failed.
    #[serde(skip)]
    pub png: Vec<u8>,
    /// Recognised text for this page.
    pub text: Option<String>,
    pub stroke_count: usize,
    /// Nothing drawable on the page; the PNG is a blank canvas.
    pub blank: bool,
    pub error: Option<PageError>,
    pub duration_ms: u64,
}

impl PageResult {
    /// True when the page produced a PNG.
    pub fn is_rendered(&self) -> bool {
        !self.png.is_empty()
    }
}

/// Aggregate counters for a conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Pages in the document.
    pub total_pages: usize,
    /// Pages picked by the page request.
    pub selected_pages: usize,
    pub rendered_pages: usize,
    /// Pages with a [`PageError`].
    pub failed_pages: usize,
    pub blank_pages: usize,
    pub total_strokes: usize,
    pub total_points: usize,
    pub total_duration_ms: u64,
    /// Summed wall time of render and encode across pages.
    pub render_duration_ms: u64,
    /// Summed wall time of recognition calls across pages.
    pub recognition_duration_ms: u64,
}

/// Structure of a notebook, without rendering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookSummary {
    pub id: String,
    pub revision: FormatRevision,
    pub page_count: usize,
    /// 0-indexed.
    pub last_opened: Option<usize>,
    pub pages: Vec<PageSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    /// 1-indexed.
    pub page_num: usize,
    pub layers: usize,
    pub strokes: usize,
    pub points: usize,
    /// The page blob was missing or could not be decoded.
    pub unreadable: bool,
}

impl NotebookSummary {
    pub fn from_document(doc: &StrokeDocument, failed_pages: &[usize]) -> Self {
        Self {
            id: doc.id.clone(),
            revision: doc.revision,
            page_count: doc.page_count(),
            last_opened: doc.last_opened,
            pages: doc
                .pages
                .iter()
                .enumerate()
                .map(|(i, p)| PageSummary {
                    page_num: i + 1,
                    layers: p.layers.len(),
                    strokes: p.stroke_count(),
                    points: p.point_count(),
                    unreadable: failed_pages.contains(&i),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Layer, Page, SamplePoint, Stroke};

    #[test]
    fn summary_counts_pages() {
        let pt = SamplePoint {
            x: 1.0,
            y: 1.0,
            speed: 0.0,
            direction: 0.0,
            width: 1.0,
            pressure: 0.5,
        };
        let page = Page {
            layers: vec![Layer {
                strokes: vec![Stroke::new(2, 0, 2.0, vec![pt, pt, pt])],
            }],
        };
        let doc = StrokeDocument::new(FormatRevision::V6, "abc", vec![page, Page::default()], Some(1));
        let s = NotebookSummary::from_document(&doc, &[1]);
        assert_eq!(s.page_count, 2);
        assert_eq!(s.last_opened, Some(1));
        assert_eq!(s.pages[0].strokes, 1);
        assert_eq!(s.pages[0].points, 3);
        assert!(!s.pages[0].unreadable);
        assert!(s.pages[1].unreadable);
        assert_eq!(s.pages[1].layers, 0);
    }

    #[test]
    fn page_result_serialises_without_png() {
        let r = PageResult {
            page_num: 2,
            png: vec![1, 2, 3],
            ..Default::default()
        };
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("png").is_none());
        assert_eq!(json["page_num"], 2);
        assert!(r.is_rendered());
    }
}
