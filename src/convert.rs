//! Eager (full-document) conversion entry points.
//!
//! ## Why eager vs. streaming?
//!
//! This module provides the simpler API: wait for all pages, then return.
//! It collects every [`PageResult`] into memory and assembles the document
//! text before returning. Use [`crate::stream::convert_stream`] instead when
//! you want pages progressively.
//!
//! ## Per-page work
//!
//! ```text
//! page ──▶ render (blocking pool) ──▶ PNG encode ──▶ recognise (optional)
//! ```
//!
//! At most `concurrency` pages are in flight. Each finished page lands in the
//! slot matching its position in the selection, so the output order never
//! depends on completion order.

use crate::config::ConversionConfig;
use crate::error::{InkError, PageError};
use crate::output::{ConversionOutput, ConversionStats, NotebookSummary, PageResult};
use crate::pipeline::{encode, input, recognize, render};
use crate::model::StrokeDocument;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a notebook directory or page file.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(ConversionOutput)` even if some pages failed
/// (check `output.stats.failed_pages`).
///
/// # Errors
/// Returns `Err(InkError)` only for fatal errors:
/// - input not found, not a notebook, or manifest broken
/// - no page of the document could be decoded
/// - the page request does not match any page
pub async fn convert(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, InkError> {
    convert_inner(input.as_ref(), config)
        .await
        .map(|(output, _)| output)
}

/// Convert and write `page_<N>.png` for every rendered page into `out_dir`,
/// plus `<stem>.txt` when recognition produced text.
///
/// Uses atomic writes (temp file + rename) to prevent partial files.
pub async fn convert_to_dir(
    input: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, InkError> {
    let (output, stem) = convert_inner(input.as_ref(), config).await?;
    let dir = out_dir.as_ref();

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| InkError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    for page in output.pages.iter().filter(|p| p.is_rendered()) {
        let path = dir.join(page_file_name(page.page_num));
        write_atomic(&path, &page.png).await?;
        debug!("Wrote {}", path.display());
    }

    if let Some(ref text) = output.text {
        let path = dir.join(format!("{stem}.txt"));
        write_atomic(&path, text.as_bytes()).await?;
        info!("Wrote recognised text to {}", path.display());
    }

    Ok(output)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, InkError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InkError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input, config))
}

/// Describe a notebook's structure without rendering anything.
pub async fn inspect(input: impl AsRef<Path>) -> Result<NotebookSummary, InkError> {
    let notebook = input::load_notebook(input.as_ref(), None).await?;
    Ok(NotebookSummary::from_document(
        &notebook.document,
        &notebook.failed_pages,
    ))
}

/// File name a rendered page is written under.
pub fn page_file_name(page_num: usize) -> String {
    format!("page_{page_num}.png")
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn convert_inner(
    path: &Path,
    config: &ConversionConfig,
) -> Result<(ConversionOutput, String), InkError> {
    let total_start = Instant::now();
    info!("Starting conversion: {}", path.display());

    // ── Step 1: Load and decode ──────────────────────────────────────────
    let notebook = input::load_notebook(path, config.legacy_decoder.clone()).await?;
    let doc = Arc::new(notebook.document);
    let total_pages = doc.page_count();

    // ── Step 2: Select pages ─────────────────────────────────────────────
    let indices = config.pages.select(total_pages, doc.last_opened)?;
    debug!("Selected {} of {} pages", indices.len(), total_pages);

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(indices.len());
    }

    // ── Step 3: Render, encode, recognise ────────────────────────────────
    let selected = indices.len();
    let mut slots: Vec<Option<PageOutcome>> = vec![None; selected];
    let mut finished = stream::iter(indices.iter().copied().enumerate().map(|(slot, idx)| {
        let doc = Arc::clone(&doc);
        async move { (slot, process_page(doc, idx, selected, config).await) }
    }))
    .buffer_unordered(config.concurrency);

    while let Some((slot, outcome)) = finished.next().await {
        slots[slot] = Some(outcome);
    }
    drop(finished);
    let outcomes: Vec<PageOutcome> = slots.into_iter().flatten().collect();

    // ── Step 4: Assemble ─────────────────────────────────────────────────
    let text = config
        .recognizer
        .as_ref()
        .map(|_| assemble_text(outcomes.iter().map(|o| &o.result), config.page_headers));

    let stats = ConversionStats {
        total_pages,
        selected_pages: selected,
        rendered_pages: outcomes.iter().filter(|o| o.result.is_rendered()).count(),
        failed_pages: outcomes.iter().filter(|o| o.result.error.is_some()).count(),
        blank_pages: outcomes.iter().filter(|o| o.result.blank).count(),
        total_strokes: outcomes.iter().map(|o| o.result.stroke_count).sum(),
        total_points: indices
            .iter()
            .filter_map(|&i| doc.page(i))
            .map(|p| p.point_count())
            .sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        render_duration_ms: outcomes.iter().map(|o| o.render_ms).sum(),
        recognition_duration_ms: outcomes.iter().map(|o| o.recognition_ms).sum(),
    };

    info!(
        "Conversion complete: {}/{} pages rendered, {} failed, {}ms total",
        stats.rendered_pages, selected, stats.failed_pages, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(selected, selected - stats.failed_pages);
    }

    let output = ConversionOutput {
        document_id: doc.id.clone(),
        pages: outcomes.into_iter().map(|o| o.result).collect(),
        text,
        stats,
    };
    Ok((output, notebook.stem))
}

/// A page result plus the time spent in each stage.
#[derive(Debug, Clone)]
pub(crate) struct PageOutcome {
    pub result: PageResult,
    pub render_ms: u64,
    pub recognition_ms: u64,
}

/// Render, encode and optionally recognise one page.
///
/// Always returns an outcome: failures are recorded in `result.error` so a
/// single bad page never aborts the document.
pub(crate) async fn process_page(
    doc: Arc<StrokeDocument>,
    index: usize,
    total: usize,
    config: &ConversionConfig,
) -> PageOutcome {
    let start = Instant::now();
    let page_num = index + 1;
    if let Some(ref cb) = config.progress_callback {
        cb.on_page_start(page_num, total);
    }

    let (stroke_count, blank) = doc
        .page(index)
        .map(|p| {
            (
                p.stroke_count(),
                render::bounding_box(p, &config.render).is_none(),
            )
        })
        .unwrap_or((0, true));
    let mut result = PageResult {
        page_num,
        stroke_count,
        blank,
        ..Default::default()
    };

    // ── Render + encode ──────────────────────────────────────────────────
    let render_start = Instant::now();
    match render::render_on_pool(
        Arc::clone(&doc),
        index,
        config.output_width,
        config.render.clone(),
    )
    .await
    {
        Ok(img) => {
            result.width = img.width();
            result.height = img.height();
            let encoded = tokio::task::spawn_blocking(move || encode::encode_png(&img))
                .await
                .map_err(|e| format!("encode task panicked: {e}"))
                .and_then(|r| r.map_err(|e| e.to_string()));
            match encoded {
                Ok(png) => result.png = png,
                Err(detail) => {
                    result.error = Some(PageError::EncodeFailed {
                        page: page_num,
                        detail,
                    })
                }
            }
        }
        Err(e) => result.error = Some(e),
    }
    let render_ms = render_start.elapsed().as_millis() as u64;

    // ── Recognise ────────────────────────────────────────────────────────
    let mut recognition_ms = 0;
    if let Some(ref backend) = config.recognizer {
        let rec_start = Instant::now();
        match doc.page(index).filter(|p| !p.is_empty()) {
            Some(page) => {
                let request = recognize::build_batch_request(page, &config.recognition);
                match recognize::recognize_page(
                    backend.as_ref(),
                    page_num,
                    &request,
                    config.recognition.content_type,
                    config.recognition_timeout_secs,
                )
                .await
                {
                    Ok(text) => result.text = Some(text),
                    Err(e) => {
                        result.error.get_or_insert(e);
                    }
                }
            }
            None => result.text = Some(String::new()),
        }
        recognition_ms = rec_start.elapsed().as_millis() as u64;
    }

    result.duration_ms = start.elapsed().as_millis() as u64;

    match result.error {
        None => {
            debug!("Page {}: done in {}ms", page_num, result.duration_ms);
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_complete(page_num, total, result.png.len());
            }
        }
        Some(ref e) => {
            warn!("{}", e);
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_error(page_num, total, &e.to_string());
            }
        }
    }

    PageOutcome {
        result,
        render_ms,
        recognition_ms,
    }
}

/// Join page texts with newlines, optionally under `=== Page N ===` headers.
fn assemble_text<'a>(pages: impl Iterator<Item = &'a PageResult>, headers: bool) -> String {
    pages
        .filter_map(|p| {
            let text = p.text.as_deref()?;
            Some(if headers {
                format!("=== Page {} ===\n{}", p.page_num, text)
            } else {
                text.to_string()
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), InkError> {
    let tmp_path: PathBuf = {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        path.with_file_name(name)
    };
    let fail = |e| InkError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(page_num: usize, text: Option<&str>) -> PageResult {
        PageResult {
            page_num,
            text: text.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn text_assembly_with_and_without_headers() {
        let pages = [page(1, Some("hello")), page(2, None), page(3, Some("world"))];
        assert_eq!(assemble_text(pages.iter(), false), "hello\nworld");
        assert_eq!(
            assemble_text(pages.iter(), true),
            "=== Page 1 ===\nhello\n=== Page 3 ===\nworld"
        );
    }

    #[test]
    fn page_file_names_are_one_based() {
        assert_eq!(page_file_name(1), "page_1.png");
        assert_eq!(page_file_name(12), "page_12.png");
    }

    #[tokio::test]
    async fn write_atomic_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page_1.png");
        write_atomic(&path, b"abc").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert!(!dir.path().join("page_1.png.tmp").exists());
    }
}
