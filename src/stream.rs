//! Streaming conversion API: emit pages as they complete.
//!
//! Unlike the eager [`crate::convert::convert`], which returns only after
//! every page finishes, [`convert_stream`] yields `PageResult` items as each
//! page completes. With `concurrency > 1` pages may arrive out of order
//! (sort by `page_num` if order matters).

use crate::config::ConversionConfig;
use crate::convert::process_page;
use crate::error::{InkError, PageError};
use crate::output::PageResult;
use crate::pipeline::input;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of page results.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageResult, PageError>> + Send>>;

/// Convert a notebook, streaming pages as they are ready.
///
/// Loading, decoding and page selection happen before this returns, so
/// fatal errors surface here rather than inside the stream.
///
/// # Returns
/// - `Ok(PageStream)`: a stream of `Result<PageResult, PageError>`
/// - `Err(InkError)`: fatal error (input not found, unreadable notebook, etc.)
pub async fn convert_stream(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<PageStream, InkError> {
    let path = input.as_ref();
    info!("Starting streaming conversion: {}", path.display());

    let notebook = input::load_notebook(path, config.legacy_decoder.clone()).await?;
    let doc = Arc::new(notebook.document);
    let indices = config.pages.select(doc.page_count(), doc.last_opened)?;
    let total = indices.len();

    let cfg = config.clone();
    let s = stream::iter(indices.into_iter().map(move |idx| {
        let doc = Arc::clone(&doc);
        let cfg = cfg.clone();
        async move {
            let mut result = process_page(doc, idx, total, &cfg).await.result;
            match result.error.take() {
                None => Ok(result),
                Some(err) => Err(err),
            }
        }
    }))
    .buffer_unordered(config.concurrency);

    Ok(Box::pin(s))
}
