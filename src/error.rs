//! Error types for the pdfscribe library.
//!
//! Failures are split by blast radius:
//!
//! * [`ScribeError`] — **Fatal**: the conversion cannot produce anything
//!   (bad input file, unreadable document, every page failed). Returned as
//!   `Err(ScribeError)` from the top-level `convert*` functions.
//!
//! * [`PageError`] — **Per page**: one page could not be loaded. The page
//!   contributes nothing and the error is stored on its
//!   [`crate::output::PageResult`]; the remaining pages still convert.
//!
//! * [`ExtractionError`] — **Per image**: one embedded image could not be
//!   decoded or persisted. It is logged and skipped.
//!
//! * [`RecognitionError`] — **Per image**: OCR failed for one image. The
//!   message is stored in [`crate::output::ImageRecord::ocr_error`] and the
//!   image produces no caption.
//!
//! * [`CacheError`] — the OCR cache could not be read or written. Always
//!   downgraded to a cache miss.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdfscribe library.
#[derive(Debug, Error)]
pub enum ScribeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The input was read, but is not a PDF.
    #[error("Input '{source_name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { source_name: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{source_name}' could not be opened: {detail}")]
    CorruptPdf { source_name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{source_name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { source_name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{source_name}'")]
    WrongPassword { source_name: String },

    /// The page selection does not intersect the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// Every selected page failed to load; no output can be produced.
    #[error("All {total} pages failed to load.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// OCR is enabled, the document has images, but no engine can be built.
    #[error("OCR engine '{engine}' is not configured.\n{hint}")]
    OcrEngineNotConfigured { engine: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The per-request scratch directory could not be created.
    #[error("Failed to create scratch directory under '{root}': {source}")]
    ScratchDir {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output Markdown file.
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

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Place libpdfium next to the executable, install it system-wide,\n\
or set PDFIUM_LIB_PATH=/path/to/directory/containing/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A page that could not be loaded from the document.
///
/// Stored on [`crate::output::PageResult`]; the conversion continues unless
/// every selected page fails.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page (or its object list) could not be loaded.
    #[error("Page {page}: failed to load: {detail}")]
    LoadFailed { page: usize, detail: String },
}

/// A single embedded image that could not be extracted.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The image object's pixels could not be decoded.
    #[error("Page {page}: image '{source_name}' could not be decoded: {detail}")]
    DecodeFailed {
        page: usize,
        source_name: String,
        detail: String,
    },

    /// The decoded pixels could not be encoded as PNG.
    #[error("Page {page}: image '{source_name}' could not be encoded: {detail}")]
    EncodeFailed {
        page: usize,
        source_name: String,
        detail: String,
    },

    /// The encoded image could not be written to the byte sink.
    #[error("Failed to write image '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// OCR failure for a single image.
#[derive(Debug, Clone, Error)]
pub enum RecognitionError {
    /// The engine returned an error on every attempt.
    #[error("OCR engine '{engine}' failed after {attempts} attempt(s): {detail}")]
    EngineFailed {
        engine: String,
        attempts: u32,
        detail: String,
    },

    /// A single recognition call exceeded the configured timeout.
    #[error("OCR engine '{engine}' timed out after {secs}s")]
    Timeout { engine: String, secs: u64 },

    /// The persisted image bytes could not be read back.
    #[error("Failed to read image '{path}': {detail}")]
    ReadFailed { path: PathBuf, detail: String },

    /// The engine could not be started at all.
    #[error("OCR engine '{engine}' is unavailable: {detail}")]
    Unavailable { engine: String, detail: String },
}

/// OCR cache failure. Never fatal; callers treat it as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry '{path}' is malformed: {detail}")]
    Malformed { path: PathBuf, detail: String },
}
