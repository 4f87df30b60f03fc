//! Result types returned to callers.
//!
//! Everything here is `Serialize` so the CLI's `--json` mode can dump a full
//! [`ConversionOutput`] without a separate DTO layer.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identity of an extracted image: `(page, index)`, both 1-based.
///
/// This is the join key between the extractor's output, the OCR results
/// and the classifier's image placements. Indices are unique per page and
/// assigned in content-stream draw order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId {
    pub page: usize,
    pub index: usize,
}

impl ImageId {
    pub fn new(page: usize, index: usize) -> Self {
        Self { page, index }
    }

    /// File name used when persisting the image to the scratch directory.
    pub fn file_name(&self) -> String {
        format!("page_{}_image_{}.png", self.page, self.index)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} image {}", self.page, self.index)
    }
}

/// One embedded image, from extraction through OCR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: ImageId,
    /// Where the PNG was written. Lives in the per-request scratch directory
    /// and is gone after the conversion returns unless `keep_images` is set.
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Cleaned OCR text; `None` until the orchestrator has run.
    pub ocr_text: Option<String>,
    /// Why OCR failed, when it did.
    pub ocr_error: Option<String>,
    /// True when `ocr_text` came from the OCR cache.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub from_cache: bool,
}

impl ImageRecord {
    pub fn new(id: ImageId, path: PathBuf, width: u32, height: u32) -> Self {
        Self {
            id,
            path,
            width,
            height,
            ocr_text: None,
            ocr_error: None,
            from_cache: false,
        }
    }

    /// OCR text usable as a caption: trimmed, non-empty, and not failed.
    pub fn caption(&self) -> Option<&str> {
        if self.ocr_error.is_some() {
            return None;
        }
        self.ocr_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Per-page outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Markdown for this page alone (empty for blank or failed pages).
    pub markdown: String,
    /// Content items that survived classification.
    pub item_count: usize,
    /// Images extracted from this page.
    pub image_count: usize,
    /// Set when the page could not be loaded.
    pub error: Option<PageError>,
}

/// Document-level metadata read without converting any page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Counters and timings for one conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub images_extracted: usize,
    pub images_recognized: usize,
    pub ocr_failures: usize,
    pub ocr_cache_hits: usize,
    pub extract_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The full result of a conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Assembled Markdown for all selected pages, trimmed.
    pub markdown: String,
    /// Every extracted image, enriched with OCR fields, in page/draw order.
    pub images: Vec<ImageRecord>,
    pub pages: Vec<PageResult>,
    pub metadata: DocumentMetadata,
    pub stats: ConversionStats,
    /// Set only when `keep_images` preserved the scratch directory.
    pub image_dir: Option<PathBuf>,
}
