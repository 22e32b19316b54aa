//! # rmink
//!
//! Decode reMarkable notebook pages (format revision 6), render them to PNG
//! and build handwriting-recognition requests from their strokes.
//!
//! ## Pipeline Overview
//!
//! ```text
//! notebook dir / .content / .zip / .rmdoc / .rm
//!  │
//!  ├─ 1. Input      resolve the manifest and load each page blob
//!  ├─ 2. Decode     v6 blob → layers → strokes → points (resynchronising)
//!  ├─ 3. Select     all pages, one page, or the last-opened page
//!  ├─ 4. Render     pen model + rasteriser (CPU-bound, spawn_blocking)
//!  ├─ 5. Encode     RGBA → PNG
//!  ├─ 6. Recognise  optional, through MyScript or a caller-supplied backend
//!  └─ 7. Output     per-page results, document text and stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rmink::{convert_to_dir, ConversionConfig, PageRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .pages(PageRequest::LastOpened)
//!         .build()?;
//!     let output = convert_to_dir("notebook/", "out/", &config).await?;
//!     eprintln!(
//!         "{} pages rendered, {} strokes",
//!         output.stats.rendered_pages, output.stats.total_strokes
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rmink` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! rmink = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, PageRequest, RenderConfig};
pub use convert::{convert, convert_sync, convert_to_dir, inspect};
pub use error::{InkError, PageError, StructuralFailure};
pub use model::{FormatRevision, Layer, Page, PenType, SamplePoint, Stroke, StrokeDocument};
pub use output::{ConversionOutput, ConversionStats, NotebookSummary, PageResult, PageSummary};
pub use pipeline::decode::{decode, decode_page, decode_page_with_fallback, sniff_revision, LegacyDecoder};
pub use pipeline::myscript::MyScriptBackend;
pub use pipeline::recognize::{
    build_batch_request, BatchRequest, ContentType, RecognitionBackend, RecognitionOptions,
};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, PageStream};
