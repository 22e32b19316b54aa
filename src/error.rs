//! Error types for the rmink library.
//!
//! Three error types for three failure scopes:
//!
//! * [`StructuralFailure`]: the decoder could not interpret a page blob as
//!   the newest format at all (wrong header, or truncated before the fixed
//!   header was read). Anything past the header is recovered locally and
//!   never surfaces as an error.
//!
//! * [`InkError`] is **fatal**: the conversion cannot proceed (input missing,
//!   manifest broken, every page unreadable, page selection out of range).
//!   Returned as `Err(InkError)` from the top-level `convert*` functions.
//!
//! * [`PageError`] is **non-fatal**: one page failed to encode or to be
//!   recognised while the others are fine. Stored inside
//!   [`crate::output::PageResult`].

use std::path::PathBuf;
use thiserror::Error;

/// A page blob that cannot be read as the newest format revision.
///
/// Callers typically respond to [`StructuralFailure::NotThisFormat`] by
/// trying a legacy decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StructuralFailure {
    /// Header too short or missing the revision marker.
    #[error("not this format")]
    NotThisFormat,

    /// Buffer ends inside the fixed header.
    #[error("unexpected end of file")]
    UnexpectedEof,
}

/// All fatal errors returned by the rmink library.
#[derive(Debug, Error)]
pub enum InkError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input path does not exist.
    #[error("Notebook not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the input.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Input is neither a page file, an archive nor a notebook directory.
    #[error(
        "Invalid input '{input}': expected a .rm page file, a .zip/.rmdoc archive or an unpacked notebook directory"
    )]
    InvalidInput { input: String },

    /// The `.content` manifest is missing or malformed.
    #[error("Notebook manifest '{path}' is invalid: {detail}")]
    ManifestInvalid { path: PathBuf, detail: String },

    /// No page of the document could be decoded.
    #[error("Unreadable document '{path}': {reason}")]
    UnreadableDocument { path: PathBuf, reason: String },

    // ── Selection errors ──────────────────────────────────────────────────
    /// Requested page number is outside the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── Recognition errors ────────────────────────────────────────────────
    /// Recognition was requested but no backend is configured.
    #[error("Recognition backend is not configured.\n{hint}")]
    RecognitionNotConfigured { hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Rasterisation task failed.
    #[error("Page {page}: rendering failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// PNG encoding failed.
    #[error("Page {page}: PNG encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// Recognition backend returned an error.
    #[error("Page {page}: recognition failed: {detail}")]
    RecognitionFailed { page: usize, detail: String },

    /// Recognition backend did not answer in time.
    #[error("Page {page}: recognition timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_failure_messages() {
        assert_eq!(StructuralFailure::NotThisFormat.to_string(), "not this format");
        assert_eq!(
            StructuralFailure::UnexpectedEof.to_string(),
            "unexpected end of file"
        );
    }

    #[test]
    fn page_out_of_range_display() {
        let e = InkError::PageOutOfRange { page: 6, total: 5 };
        let msg = e.to_string();
        assert!(msg.contains("Page 6"), "got: {msg}");
        assert!(msg.contains("5 pages"), "got: {msg}");
    }

    #[test]
    fn unreadable_document_display() {
        let e = InkError::UnreadableDocument {
            path: PathBuf::from("/tmp/notes"),
            reason: "no page decoded".into(),
        };
        assert!(e.to_string().contains("no page decoded"));
    }

    #[test]
    fn recognition_timeout_display() {
        let e = PageError::Timeout { page: 3, secs: 60 };
        assert!(e.to_string().contains("60s"));
        assert!(e.to_string().contains("Page 3"));
    }
}
