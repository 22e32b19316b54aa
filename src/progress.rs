//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline renders and recognises each page.
//!
//! The CLI drives its progress bar through this trait; library callers can
//! forward the same events to a channel or a log.
//!
//! # Example
//!
//! ```rust
//! use rmink::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, png_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} bytes)", page_num, total_pages, png_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: AtomicUsize::new(0),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it processes each page.
///
/// All methods have no-op defaults so callers only override what they care
/// about.
///
/// # Thread safety
///
/// Pages are processed concurrently (up to `concurrency` at a time), so
/// `on_page_start`, `on_page_complete` and `on_page_error` may be called
/// from different tasks at once. Guard shared state with atomics or a
/// `Mutex`.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before any page is rendered.
    ///
    /// # Arguments
    /// * `total_pages`: number of pages selected for conversion
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when work on a page begins.
    ///
    /// # Arguments
    /// * `page_num`: 1-indexed page number within the document
    /// * `total_pages`: number of selected pages
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page rendered (and, if configured, was recognised)
    /// without error.
    ///
    /// # Arguments
    /// * `png_len`: byte length of the encoded PNG
    fn on_page_complete(&self, page_num: usize, total_pages: usize, png_len: usize) {
        let _ = (page_num, total_pages, png_len);
    }

    /// Called when rendering, encoding or recognition of a page failed.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all selected pages have been attempted.
    ///
    /// # Arguments
    /// * `success_count`: pages that finished without a page error
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        png_bytes: AtomicUsize,
        succeeded: AtomicUsize,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, png_len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.png_bytes.fetch_add(png_len, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_conversion_complete(&self, _total_pages: usize, success_count: usize) {
            self.succeeded.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_conversion_start(2);
        cb.on_page_start(1, 2);
        cb.on_page_complete(1, 2, 512);
        cb.on_page_error(2, 2, "render failed");
        cb.on_conversion_complete(2, 1);
    }

    #[test]
    fn tracking_callback_counts_events() {
        let tracker = TrackingCallback::default();
        tracker.on_conversion_start(3);
        tracker.on_page_start(1, 3);
        tracker.on_page_complete(1, 3, 100);
        tracker.on_page_start(2, 3);
        tracker.on_page_complete(2, 3, 250);
        tracker.on_page_start(3, 3);
        tracker.on_page_error(3, 3, "recognition timed out");
        tracker.on_conversion_complete(3, 2);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.png_bytes.load(Ordering::SeqCst), 350);
        assert_eq!(tracker.succeeded.load(Ordering::SeqCst), 2);
    }
}
