//! Configuration types for notebook conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Rasterisation knobs live in the
//! separate, serialisable [`RenderConfig`] so the renderer can be used on its
//! own without the async pipeline.

use crate::error::InkError;
use crate::pipeline::decode::LegacyDecoder;
use crate::pipeline::recognize::{ContentType, RecognitionBackend, RecognitionOptions};
use crate::pipeline::render::MAX_CANVAS_DIMENSION;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Device screen width in pixels; the default output width.
pub const DEFAULT_OUTPUT_WIDTH: u32 = 1404;

// ── Rendering ────────────────────────────────────────────────────────────

/// Named parameters of the raster renderer.
///
/// | field | default |
/// |-------|---------|
/// | `padding_percent` | 0.05 |
/// | `min_padding` | 50 px |
/// | `stroke_width_scale` | 0.25 |
/// | `min_stroke_width` | 1 px |
/// | `max_stroke_width` | 8 px |
/// | `min_height` | 100 px |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Border added around the content, as a fraction of its extent.
    pub padding_percent: f32,
    /// Floor on the border, in document units.
    pub min_padding: f32,
    /// Multiplier applied to pen-model widths before rasterising.
    pub stroke_width_scale: f32,
    pub min_stroke_width: u32,
    pub max_stroke_width: u32,
    /// Smallest output height; also the height of a blank page.
    pub min_height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            padding_percent: 0.05,
            min_padding: 50.0,
            stroke_width_scale: 0.25,
            min_stroke_width: 1,
            max_stroke_width: 8,
            min_height: 100,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), InkError> {
        if !self.padding_percent.is_finite() || self.padding_percent < 0.0 {
            return Err(InkError::InvalidConfig(format!(
                "padding percent must be finite and ≥ 0, got {}",
                self.padding_percent
            )));
        }
        if !self.min_padding.is_finite() || self.min_padding < 0.0 {
            return Err(InkError::InvalidConfig(format!(
                "minimum padding must be finite and ≥ 0, got {}",
                self.min_padding
            )));
        }
        if !self.stroke_width_scale.is_finite() || self.stroke_width_scale < 0.0 {
            return Err(InkError::InvalidConfig(format!(
                "stroke width scale must be finite and ≥ 0, got {}",
                self.stroke_width_scale
            )));
        }
        if self.min_height == 0 || self.min_height > MAX_CANVAS_DIMENSION {
            return Err(InkError::InvalidConfig(format!(
                "minimum height must be in 1..={}, got {}",
                MAX_CANVAS_DIMENSION, self.min_height
            )));
        }
        if self.min_stroke_width > self.max_stroke_width {
            return Err(InkError::InvalidConfig(format!(
                "minimum stroke width {} exceeds maximum {}",
                self.min_stroke_width, self.max_stroke_width
            )));
        }
        Ok(())
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Which pages of a document to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageRequest {
    /// Every page, in document order (default).
    #[default]
    All,
    /// A single page, 1-indexed.
    Explicit(usize),
    /// The page that was open last on the device, or the first page when
    /// the document does not record one.
    LastOpened,
}

impl PageRequest {
    /// Resolve the request into 0-indexed page indices.
    ///
    /// # Errors
    /// [`InkError::PageOutOfRange`] when an explicit page is outside
    /// `1..=total`, or when the last-opened page does not exist.
    pub fn select(&self, total: usize, last_opened: Option<usize>) -> Result<Vec<usize>, InkError> {
        match *self {
            PageRequest::All => Ok((0..total).collect()),
            PageRequest::Explicit(page) => {
                if page >= 1 && page <= total {
                    Ok(vec![page - 1])
                } else {
                    Err(InkError::PageOutOfRange { page, total })
                }
            }
            PageRequest::LastOpened => {
                let idx = last_opened.unwrap_or(0);
                if idx < total {
                    Ok(vec![idx])
                } else {
                    Err(InkError::PageOutOfRange {
                        page: idx + 1,
                        total,
                    })
                }
            }
        }
    }
}

// ── Conversion ───────────────────────────────────────────────────────────

/// Configuration for a notebook conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use rmink::{ConversionConfig, PageRequest};
///
/// let config = ConversionConfig::builder()
///     .output_width(1000)
///     .concurrency(4)
///     .pages(PageRequest::LastOpened)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Width of every rendered page in pixels. Default: 1404.
    pub output_width: u32,

    /// Renderer parameters.
    pub render: RenderConfig,

    /// Pages rendered and recognised at once. Default: 3.
    ///
    /// Rendering runs on the blocking pool, recognition is network-bound;
    /// this bounds both.
    pub concurrency: usize,

    /// Page selection. Default: all pages.
    pub pages: PageRequest,

    /// What to ask the recognition service for.
    pub recognition: RecognitionOptions,

    /// Recognition service. When `None`, pages are rendered only.
    pub recognizer: Option<Arc<dyn RecognitionBackend>>,

    /// Decoder for older page revisions, tried when a blob is not v6.
    pub legacy_decoder: Option<Arc<dyn LegacyDecoder>>,

    /// Prefix each page's text with `=== Page N ===`. Default: false.
    pub page_headers: bool,

    /// Per-page recognition timeout in seconds. Default: 60.
    pub recognition_timeout_secs: u64,

    /// Per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            output_width: DEFAULT_OUTPUT_WIDTH,
            render: RenderConfig::default(),
            concurrency: 3,
            pages: PageRequest::default(),
            recognition: RecognitionOptions::default(),
            recognizer: None,
            legacy_decoder: None,
            page_headers: false,
            recognition_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("output_width", &self.output_width)
            .field("render", &self.render)
            .field("concurrency", &self.concurrency)
            .field("pages", &self.pages)
            .field("recognition", &self.recognition)
            .field(
                "recognizer",
                &self.recognizer.as_ref().map(|_| "<dyn RecognitionBackend>"),
            )
            .field(
                "legacy_decoder",
                &self.legacy_decoder.as_ref().map(|_| "<dyn LegacyDecoder>"),
            )
            .field("page_headers", &self.page_headers)
            .field("recognition_timeout_secs", &self.recognition_timeout_secs)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn output_width(mut self, px: u32) -> Self {
        self.config.output_width = px;
        self
    }

    pub fn render(mut self, render: RenderConfig) -> Self {
        self.config.render = render;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn pages(mut self, request: PageRequest) -> Self {
        self.config.pages = request;
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.config.recognition.content_type = content_type;
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.config.recognition.lang = lang.into();
        self
    }

    pub fn recognizer(mut self, backend: Arc<dyn RecognitionBackend>) -> Self {
        self.config.recognizer = Some(backend);
        self
    }

    pub fn legacy_decoder(mut self, decoder: Arc<dyn LegacyDecoder>) -> Self {
        self.config.legacy_decoder = Some(decoder);
        self
    }

    pub fn page_headers(mut self, v: bool) -> Self {
        self.config.page_headers = v;
        self
    }

    pub fn recognition_timeout_secs(mut self, secs: u64) -> Self {
        self.config.recognition_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, InkError> {
        let c = &self.config;
        if c.output_width == 0 || c.output_width > MAX_CANVAS_DIMENSION {
            return Err(InkError::InvalidConfig(format!(
                "Output width must be in 1..={}, got {}",
                MAX_CANVAS_DIMENSION, c.output_width
            )));
        }
        if c.concurrency == 0 {
            return Err(InkError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.recognition.lang.trim().is_empty() {
            return Err(InkError::InvalidConfig("Language tag must not be empty".into()));
        }
        c.render.validate()?;
        Ok(self.config)
    }
}
