//! Handwriting recognition: batch request building and response extraction.
//!
//! The recognition service itself sits behind the [`RecognitionBackend`]
//! trait. This module owns what is service-independent: mapping a page's
//! strokes into the batch payload, bounding each call with a timeout, and
//! pulling plain text out of whatever body comes back.
//!
//! ## Request shape
//!
//! ```json
//! { "configuration": { "lang": "en_US" },
//!   "contentType": "Text",
//!   "width": 1404, "height": 1872, "xDPI": 226, "yDPI": 226,
//!   "strokeGroups": [ { "strokes": [ { "x": [..], "y": [..], "p": [..],
//!                                      "t": [..], "pointerType": "PEN" } ] } ] }
//! ```
//!
//! ## Response extraction
//!
//! Plain-text responses pass through trimmed. JSON responses (the JIIX
//! export, or wrappers around it) are searched in a fixed order: `text`,
//! `label`, `words`, `chars`, text `items`, then a nested `result`.

use crate::error::{InkError, PageError};
use crate::model::{Page, PenType};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Device canvas the service interprets coordinates against.
pub const CANVAS_WIDTH: u32 = 1404;
pub const CANVAS_HEIGHT: u32 = 1872;
pub const CANVAS_DPI: u32 = 226;
/// Synthetic sampling interval between consecutive points.
pub const POINT_INTERVAL_MS: i64 = 16;

// ── Options ──────────────────────────────────────────────────────────────

/// What the service should recognise, and in which export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Math,
    Diagram,
    /// Text recognition exported as the structured JIIX document.
    Jiix,
}

impl ContentType {
    /// Value of the request's `contentType` field.
    pub fn api_name(self) -> &'static str {
        match self {
            ContentType::Text | ContentType::Jiix => "Text",
            ContentType::Math => "Math",
            ContentType::Diagram => "Diagram",
        }
    }

    /// MIME type requested from the service.
    pub fn accept_mime(self) -> &'static str {
        match self {
            ContentType::Text => "text/plain",
            ContentType::Math => "application/x-latex",
            ContentType::Diagram => "image/svg+xml",
            ContentType::Jiix => "application/vnd.myscript.jiix",
        }
    }
}

impl FromStr for ContentType {
    type Err = InkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ContentType::Text),
            "math" => Ok(ContentType::Math),
            "diagram" => Ok(ContentType::Diagram),
            "jiix" => Ok(ContentType::Jiix),
            other => Err(InkError::InvalidConfig(format!(
                "unsupported content type '{other}' (expected text, math, diagram or jiix)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOptions {
    pub content_type: ContentType,
    /// Service language tag, e.g. `en_US`.
    pub lang: String,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            content_type: ContentType::Text,
            lang: "en_US".to_string(),
        }
    }
}

// ── Payload ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub configuration: RequestConfiguration,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "xDPI")]
    pub x_dpi: u32,
    #[serde(rename = "yDPI")]
    pub y_dpi: u32,
    pub stroke_groups: Vec<StrokeGroup>,
}

impl BatchRequest {
    pub fn stroke_count(&self) -> usize {
        self.stroke_groups.iter().map(|g| g.strokes.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestConfiguration {
    pub lang: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrokeGroup {
    pub strokes: Vec<InkStroke>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PointerType {
    Pen,
    Eraser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InkStroke {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    /// Pressure normalised to `[0, 1]`.
    pub p: Vec<f32>,
    /// Milliseconds from the stroke's first point.
    pub t: Vec<i64>,
    pub pointer_type: PointerType,
}

/// Device pressure to the service's `[0, 1]` range.
fn normalise_pressure(p: f32) -> f32 {
    if p <= 0.0 {
        0.5
    } else if p > 1.0 {
        (p / 10.0).min(1.0)
    } else {
        p
    }
}

/// Map one page's strokes into a single-group batch request.
///
/// Erase-area strokes are dropped; eraser strokes are kept and tagged so the
/// service can subtract them. Coordinates pass through untouched.
pub fn build_batch_request(page: &Page, options: &RecognitionOptions) -> BatchRequest {
    let strokes: Vec<InkStroke> = page
        .strokes()
        .filter(|s| s.pen != PenType::EraseArea && !s.points.is_empty())
        .map(|s| InkStroke {
            x: s.points.iter().map(|p| p.x).collect(),
            y: s.points.iter().map(|p| p.y).collect(),
            p: s
                .points
                .iter()
                .map(|p| normalise_pressure(p.pressure))
                .collect(),
            t: (0..s.points.len() as i64)
                .map(|i| i * POINT_INTERVAL_MS)
                .collect(),
            pointer_type: if s.pen == PenType::Eraser {
                PointerType::Eraser
            } else {
                PointerType::Pen
            },
        })
        .collect();

    debug!(
        "Built recognition request: {} of {} strokes",
        strokes.len(),
        page.stroke_count()
    );

    BatchRequest {
        configuration: RequestConfiguration {
            lang: options.lang.clone(),
        },
        content_type: options.content_type.api_name().to_string(),
        width: CANVAS_WIDTH,
        height: CANVAS_HEIGHT,
        x_dpi: CANVAS_DPI,
        y_dpi: CANVAS_DPI,
        stroke_groups: vec![StrokeGroup { strokes }],
    }
}

// ── Backend seam ─────────────────────────────────────────────────────────

/// A handwriting recognition service.
///
/// Implementations send `request` and return the raw response body for the
/// `accept` MIME type. Errors are plain strings; the pipeline wraps them
/// into [`PageError::RecognitionFailed`].
pub trait RecognitionBackend: Send + Sync {
    fn recognize<'a>(
        &'a self,
        request: &'a BatchRequest,
        accept: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, String>>;
}

/// Send one page to the backend and extract its text.
///
/// Called once per page. There is no retry: a failed or slow call becomes a
/// [`PageError`] for that page only.
pub async fn recognize_page(
    backend: &dyn RecognitionBackend,
    page_num: usize,
    request: &BatchRequest,
    content_type: ContentType,
    timeout_secs: u64,
) -> Result<String, PageError> {
    let accept = content_type.accept_mime();
    let call = backend.recognize(request, accept);
    let body = match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
        Ok(Ok(body)) => body,
        Ok(Err(detail)) => {
            warn!("Page {}: recognition failed: {}", page_num, detail);
            return Err(PageError::RecognitionFailed {
                page: page_num,
                detail,
            });
        }
        Err(_) => {
            warn!("Page {}: recognition timed out", page_num);
            return Err(PageError::Timeout {
                page: page_num,
                secs: timeout_secs,
            });
        }
    };
    debug!("Page {}: {} byte response", page_num, body.len());
    Ok(extract_text(&body, accept))
}

// ── Response extraction ──────────────────────────────────────────────────

/// Best-effort plain text from a recognition response body.
///
/// Bodies that do not look like JSON, or JSON with no recognisable text
/// field, come back trimmed but otherwise verbatim.
pub fn extract_text(body: &[u8], mime: &str) -> String {
    let raw = String::from_utf8_lossy(body);
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return trimmed.to_string();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => match text_of_value(&value) {
            Some(text) => text,
            None => {
                debug!("No text field in {} response", mime);
                trimmed.to_string()
            }
        },
        Err(_) => trimmed.to_string(),
    }
}

fn text_of_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) => text_of_object(value),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter(|v| v.is_object())
                .filter_map(text_of_object)
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        _ => None,
    }
}

fn non_empty_str<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// `label`, else `text`, of an array element; bare strings count as-is.
fn label_or_text(entry: &Value) -> Option<&str> {
    if let Some(s) = entry.as_str() {
        return Some(s);
    }
    non_empty_str(entry, "label").or_else(|| non_empty_str(entry, "text"))
}

fn joined(obj: &Value, key: &str, sep: &str, keep: impl Fn(&Value) -> bool) -> Option<String> {
    let parts: Vec<&str> = obj
        .get(key)?
        .as_array()?
        .iter()
        .filter(|e| keep(e))
        .filter_map(label_or_text)
        .collect();
    (!parts.is_empty()).then(|| parts.join(sep))
}

fn text_of_object(obj: &Value) -> Option<String> {
    if let Some(s) = non_empty_str(obj, "text").or_else(|| non_empty_str(obj, "label")) {
        return Some(s.to_string());
    }
    if let Some(s) = joined(obj, "words", " ", |_| true) {
        return Some(s);
    }
    if let Some(s) = joined(obj, "chars", "", |_| true) {
        return Some(s);
    }
    let is_text_item = |e: &Value| e.get("type").and_then(Value::as_str) == Some("text");
    if let Some(s) = joined(obj, "items", " ", is_text_item) {
        return Some(s);
    }
    obj.get("result")
        .filter(|r| r.is_object())
        .and_then(text_of_object)
}
