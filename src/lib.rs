//! # pdfscribe
//!
//! Layout-aware PDF to Markdown conversion, with OCR captions for embedded
//! images.
//!
//! The text layer is read directly from the PDF: font sizes become heading
//! levels, leading glyphs become bullets, italic fonts become emphasis, and
//! items are put back into reading order by position. Every embedded image
//! is extracted to PNG and run through an OCR engine; whatever text it
//! contains is placed where the image was drawn, as a blockquote.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Extract   text runs + image draws per page; PNGs to a scratch dir
//!  ├─ 3. OCR       bounded-concurrency recognition, content-addressed cache
//!  ├─ 4. Classify  headings from font-size histogram, bullets, italics
//!  ├─ 5. Layout    reading order, line grouping
//!  └─ 6. Emit      Markdown per page, pages joined by `---`
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfscribe::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Vision OCR provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ConversionConfig::default();
//!     let output = convert("document.pdf", &config).await?;
//!     println!("{}", output.markdown);
//!     eprintln!("images: {} extracted, {} recognized",
//!         output.stats.images_extracted,
//!         output.stats.images_recognized);
//!     Ok(())
//! }
//! ```
//!
//! ## Choosing an OCR engine
//!
//! | Backend | Needs | Notes |
//! |---------|-------|-------|
//! | [`OcrBackend::Vision`] (default) | an API key or a local Ollama | best on diagrams and handwriting |
//! | [`OcrBackend::Tesseract`] | `tesseract` on `PATH` | offline, runs one image at a time |
//!
//! Any [`OcrEngine`] can also be supplied directly through
//! [`ConversionConfigBuilder::ocr_engine`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfscribe` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfscribe = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, OcrBackend, PageSelection};
pub use convert::{
    convert, convert_from_bytes, convert_source, convert_sync, convert_to_file, inspect,
};
pub use error::{CacheError, ExtractionError, PageError, RecognitionError, ScribeError};
pub use output::{
    ConversionOutput, ConversionStats, DocumentMetadata, ImageId, ImageRecord, PageResult,
};
pub use pipeline::cache::OcrCache;
pub use pipeline::ocr::{OcrEngine, TesseractCliEngine, VisionOcrEngine};
pub use pipeline::sink::{ByteSink, FsByteSink, MemoryByteSink};
pub use pipeline::source::{PageContent, PageSource};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
