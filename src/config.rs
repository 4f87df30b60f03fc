//! Configuration types for layout-aware PDF-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Layout thresholds are fixed constants
//! of the pipeline; what varies per request is OCR (which engine, how much
//! concurrency, whether to cache) and where scratch images live.

use crate::error::ScribeError;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::sink::ByteSink;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Directory name used for the OCR cache when none is configured.
pub const DEFAULT_CACHE_DIR: &str = ".ocr-cache";

/// Directory name (under the system temp dir) holding per-request scratch dirs.
pub const DEFAULT_SCRATCH_DIR: &str = "pdfscribe-images";

/// Configuration for a PDF-to-Markdown conversion.
///
/// # Example
/// ```rust
/// use pdfscribe::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .batch_size(1)
///     .use_cache(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 1);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Run OCR over extracted images. Default: true.
    ///
    /// When off, images are still extracted (and reported) but never
    /// produce captions.
    pub use_ocr: bool,

    /// Maximum outstanding recognition calls. Default: 5.
    ///
    /// Clamped to 1 for engines that report themselves as non-reentrant.
    pub batch_size: usize,

    /// Consult and populate the OCR cache. Default: true.
    pub use_cache: bool,

    /// OCR cache directory. Default: `./.ocr-cache`.
    pub cache_dir: Option<PathBuf>,

    /// Parent of the per-request scratch directories.
    /// Default: `<system temp>/pdfscribe-images`.
    pub scratch_root: Option<PathBuf>,

    /// Keep the scratch directory (and its PNGs) after the call returns.
    /// Default: false.
    pub keep_images: bool,

    /// Where extracted PNGs are written. Default: the filesystem, inside
    /// the scratch directory.
    pub image_sink: Option<Arc<dyn ByteSink>>,

    /// Remove abandoned sibling scratch directories older than this many
    /// seconds before starting. Directories of live requests are never
    /// removed. `None` disables the sweep. Default: 600.
    pub sweep_stale_after_secs: Option<u64>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Which OCR backend to build when no engine is supplied. Default: Vision.
    pub ocr_backend: OcrBackend,

    /// Pre-constructed OCR engine. Takes precedence over `ocr_backend`.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Pre-constructed vision provider for [`OcrBackend::Vision`].
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Vision provider name (e.g. "openai", "ollama").
    pub provider_name: Option<String>,

    /// Vision model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// Sampling temperature for vision OCR. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens generated per image. Default: 2048.
    pub max_tokens: usize,

    /// Retries per image on a failed vision call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (doubles per attempt). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-recognition-call timeout in seconds. Default: 60.
    pub ocr_timeout_secs: u64,

    /// Custom OCR prompt for the vision backend.
    pub ocr_prompt: Option<String>,

    /// Tesseract executable for [`OcrBackend::Tesseract`]. Default: "tesseract".
    pub tesseract_path: String,

    /// Tesseract language pack(s), e.g. "eng" or "eng+deu". Default: "eng".
    pub tesseract_lang: String,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            use_ocr: true,
            batch_size: 5,
            use_cache: true,
            cache_dir: None,
            scratch_root: None,
            keep_images: false,
            image_sink: None,
            sweep_stale_after_secs: Some(600),
            password: None,
            pages: PageSelection::default(),
            ocr_backend: OcrBackend::default(),
            ocr_engine: None,
            provider: None,
            provider_name: None,
            model: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_retries: 2,
            retry_backoff_ms: 500,
            ocr_timeout_secs: 60,
            ocr_prompt: None,
            tesseract_path: "tesseract".to_string(),
            tesseract_lang: "eng".to_string(),
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("use_ocr", &self.use_ocr)
            .field("batch_size", &self.batch_size)
            .field("use_cache", &self.use_cache)
            .field("cache_dir", &self.cache_dir)
            .field("scratch_root", &self.scratch_root)
            .field("keep_images", &self.keep_images)
            .field("image_sink", &self.image_sink.as_ref().map(|_| "<dyn ByteSink>"))
            .field("pages", &self.pages)
            .field("ocr_backend", &self.ocr_backend)
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|e| e.name().to_string()))
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("max_retries", &self.max_retries)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
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

    /// The effective OCR cache directory.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(DEFAULT_CACHE_DIR)
        })
    }

    /// The effective parent directory for scratch dirs.
    pub fn resolved_scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_SCRATCH_DIR))
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn use_ocr(mut self, v: bool) -> Self {
        self.config.use_ocr = v;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn use_cache(mut self, v: bool) -> Self {
        self.config.use_cache = v;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(dir.into());
        self
    }

    pub fn keep_images(mut self, v: bool) -> Self {
        self.config.keep_images = v;
        self
    }

    pub fn image_sink(mut self, sink: Arc<dyn ByteSink>) -> Self {
        self.config.image_sink = Some(sink);
        self
    }

    pub fn sweep_stale_after_secs(mut self, secs: Option<u64>) -> Self {
        self.config.sweep_stale_after_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn ocr_backend(mut self, backend: OcrBackend) -> Self {
        self.config.ocr_backend = backend;
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn ocr_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.ocr_prompt = Some(prompt.into());
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<String>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn tesseract_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.tesseract_lang = lang.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ScribeError> {
        let c = &self.config;
        if c.batch_size == 0 {
            return Err(ScribeError::InvalidConfig("batch size must be ≥ 1".into()));
        }
        if c.ocr_timeout_secs == 0 {
            return Err(ScribeError::InvalidConfig(
                "OCR timeout must be ≥ 1 second".into(),
            ));
        }
        if c.tesseract_lang.trim().is_empty() {
            return Err(ScribeError::InvalidConfig(
                "tesseract language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which OCR engine to construct when the caller does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OcrBackend {
    /// A vision-capable LLM provider reads each image. (default)
    #[default]
    Vision,
    /// The `tesseract` command-line program.
    Tesseract,
}

/// Specifies which pages of the PDF to convert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
