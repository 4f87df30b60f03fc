//! Progress-callback trait for conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as images are extracted, recognized and pages are assembled.
//!
//! # Example
//!
//! ```rust
//! use pdfscribe::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct OcrCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for OcrCounter {
//!     fn on_image_recognized(&self, done: usize, total: usize) {
//!         self.done.store(done, Ordering::SeqCst);
//!         eprintln!("OCR {}/{}", done, total);
//!     }
//! }
//!
//! let counter = Arc::new(OcrCounter { done: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it runs.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_image_recognized` fires from concurrently running OCR futures when
/// `batch_size > 1`; `done` is still strictly increasing. Page events fire
/// in page order.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before any page is loaded.
    ///
    /// # Arguments
    /// * `total_pages` — number of selected pages
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called once extraction has finished for every selected page.
    fn on_images_extracted(&self, count: usize) {
        let _ = count;
    }

    /// Called after each image's OCR settles, success or failure.
    ///
    /// # Arguments
    /// * `done`  — images settled so far
    /// * `total` — images being recognized
    fn on_image_recognized(&self, done: usize, total: usize) {
        let _ = (done, total);
    }

    /// Called when a page's Markdown has been produced.
    ///
    /// # Arguments
    /// * `page_num`     — 1-indexed page number
    /// * `total_pages`  — selected pages
    /// * `markdown_len` — byte length of the page's Markdown
    fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
        let _ = (page_num, total_pages, markdown_len);
    }

    /// Called when a page could not be loaded.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages have been attempted.
    ///
    /// # Arguments
    /// * `total_pages`   — selected pages
    /// * `success_count` — pages that loaded
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
