//! Conversion entry points.
//!
//! A request runs in three phases:
//!
//! 1. **Extract** (blocking): load each selected page and persist its
//!    embedded images into the request's scratch directory.
//! 2. **Recognize** (async): OCR every extracted image. Skipped entirely,
//!    engine construction included, when there are no images or OCR is off.
//! 3. **Assemble**: classify, order and emit each page in page order, then
//!    join the pages.
//!
//! The scratch directory is owned by the request and removed when it ends,
//! on success or failure, unless `keep_images` is set.

use crate::config::{ConversionConfig, OcrBackend, PageSelection};
use crate::error::{PageError, ScribeError};
use crate::output::{ConversionOutput, ConversionStats, DocumentMetadata, ImageRecord, PageResult};
use crate::pipeline::cache::OcrCache;
use crate::pipeline::classify::{classify_page, OcrMap};
use crate::pipeline::extract::{ImagePlacement, PageImages};
use crate::pipeline::input::{self, PdfBytes};
use crate::pipeline::ocr::{self, OcrEngine, TesseractCliEngine, VisionOcrEngine};
use crate::pipeline::pdfium::{bind_pdfium, open_document, PdfiumSource};
use crate::pipeline::sink::{self, ByteSink, FsByteSink, ScratchDir};
use crate::pipeline::source::{PageContent, PageSource};
use crate::pipeline::{layout, markdown};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Vision model used when a provider is named without a model.
const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

/// Convert a PDF file or URL to Markdown.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input_str` — Local file path or HTTP/HTTPS URL to a PDF
/// * `config` — Conversion configuration
///
/// # Returns
/// `Ok(ConversionOutput)` on success, even if some pages or images failed
/// (check `output.stats`).
///
/// # Errors
/// Returns `Err(ScribeError)` only for fatal errors:
/// - File not found / permission denied / download failure
/// - Not a valid PDF, or the document cannot be opened
/// - OCR is needed but no engine can be built
/// - All selected pages failed to load
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ScribeError> {
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);
    let pdf = input::resolve_input(input_str, config.download_timeout_secs).await?;
    convert_pdf(pdf, config).await
}

/// Convert PDF bytes held in memory.
///
/// # Example
/// ```rust,no_run
/// use pdfscribe::{convert_from_bytes, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("document.pdf")?;
/// let config = ConversionConfig::default();
/// let output = convert_from_bytes(&bytes, &config).await?;
/// println!("{}", output.markdown);
/// # Ok(())
/// # }
/// ```
pub async fn convert_from_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<ConversionOutput, ScribeError> {
    let pdf = PdfBytes::new("<memory>", bytes.to_vec())?;
    convert_pdf(pdf, config).await
}

/// Convert a PDF and write the Markdown directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, ScribeError> {
    let output = convert(input_str, config).await?;
    write_atomic(output_path.as_ref(), &output.markdown).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ScribeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ScribeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Read document metadata without converting any page.
///
/// Does not need an OCR engine. Honours `password` and
/// `download_timeout_secs` from `config`.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<DocumentMetadata, ScribeError> {
    let pdf = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let password = config.password.clone();

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = open_document(&pdfium, &pdf, password.as_deref())?;
        let source = PdfiumSource::new(document);
        let metadata = source.metadata();
        Ok(metadata)
    })
    .await
    .map_err(|e| ScribeError::Internal(format!("Metadata task panicked: {}", e)))?
}

/// Convert any [`PageSource`].
///
/// Runs extraction on the calling task, so `source` should be cheap to read
/// (in-memory pages, a pre-parsed document). [`convert`] uses this same
/// pipeline with pdfium and runs extraction under `spawn_blocking`.
pub async fn convert_source<S: PageSource + ?Sized>(
    source: &S,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ScribeError> {
    let total_start = Instant::now();
    let request = Request::start(config)?;

    let extraction = extract_pages(source, config, request.scratch.path(), request.sink.as_ref())?;
    let metadata = DocumentMetadata {
        page_count: source.page_count(),
        ..Default::default()
    };

    finish(request, extraction, metadata, config, total_start).await
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Per-request resources: the scratch directory and where images go.
struct Request {
    scratch: ScratchDir,
    sink: Arc<dyn ByteSink>,
}

impl Request {
    fn start(config: &ConversionConfig) -> Result<Self, ScribeError> {
        let root = config.resolved_scratch_root();
        if let Some(secs) = config.sweep_stale_after_secs {
            let removed = sink::sweep_stale(&root, Duration::from_secs(secs));
            if removed > 0 {
                info!("Removed {} stale scratch directories", removed);
            }
        }

        let scratch = ScratchDir::create_in(&root)
            .map_err(|source| ScribeError::ScratchDir { root, source })?;
        let sink = config
            .image_sink
            .clone()
            .unwrap_or_else(|| Arc::new(FsByteSink) as Arc<dyn ByteSink>);

        Ok(Self { scratch, sink })
    }
}

/// One selected page after phase 1.
struct LoadedPage {
    page_num: usize,
    outcome: Result<(PageContent, Vec<ImagePlacement>), PageError>,
    image_count: usize,
}

struct Extraction {
    pages: Vec<LoadedPage>,
    images: Vec<ImageRecord>,
    duration_ms: u64,
}

async fn convert_pdf(pdf: PdfBytes, config: &ConversionConfig) -> Result<ConversionOutput, ScribeError> {
    let total_start = Instant::now();
    let request = Request::start(config)?;

    let dir = request.scratch.path().to_path_buf();
    let sink = Arc::clone(&request.sink);
    let cfg = config.clone();

    let (metadata, extraction) = tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = open_document(&pdfium, &pdf, cfg.password.as_deref())?;
        let source = PdfiumSource::new(document);
        let metadata = source.metadata();
        let extraction = extract_pages(&source, &cfg, &dir, sink.as_ref())?;
        Ok::<_, ScribeError>((metadata, extraction))
    })
    .await
    .map_err(|e| ScribeError::Internal(format!("Extraction task panicked: {}", e)))??;

    finish(request, extraction, metadata, config, total_start).await
}

/// Phase 1: load the selected pages and persist their images.
fn extract_pages<S: PageSource + ?Sized>(
    source: &S,
    config: &ConversionConfig,
    dir: &Path,
    sink: &dyn ByteSink,
) -> Result<Extraction, ScribeError> {
    let start = Instant::now();
    let total_pages = source.page_count();
    let indices = config.pages.to_indices(total_pages);
    if indices.is_empty() {
        return Err(ScribeError::PageOutOfRange {
            page: first_requested_page(&config.pages),
            total: total_pages,
        });
    }
    debug!("Selected {} of {} pages", indices.len(), total_pages);

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(indices.len());
    }

    let mut pages = Vec::with_capacity(indices.len());
    let mut images = Vec::new();

    for idx in indices {
        let page_num = idx + 1;
        match source.load_page(idx) {
            Ok(mut content) => {
                let (records, placements) =
                    PageImages::new(page_num, &content.images, dir, sink).collect_all();
                // Pixels are on disk now; the operators are no longer needed.
                content.images = Vec::new();
                pages.push(LoadedPage {
                    page_num,
                    image_count: records.len(),
                    outcome: Ok((content, placements)),
                });
                images.extend(records);
            }
            Err(e) => {
                warn!("Skipping page {}: {}", page_num, e);
                pages.push(LoadedPage {
                    page_num,
                    image_count: 0,
                    outcome: Err(e),
                });
            }
        }
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Extracted {} images from {} pages in {}ms",
        images.len(),
        pages.len(),
        duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_images_extracted(images.len());
    }

    Ok(Extraction {
        pages,
        images,
        duration_ms,
    })
}

/// Phases 2 and 3.
async fn finish(
    request: Request,
    extraction: Extraction,
    metadata: DocumentMetadata,
    config: &ConversionConfig,
    total_start: Instant,
) -> Result<ConversionOutput, ScribeError> {
    let Extraction {
        pages: loaded,
        images,
        duration_ms: extract_duration_ms,
    } = extraction;

    // ── Phase 2: OCR ─────────────────────────────────────────────────────
    let ocr_start = Instant::now();
    let ran_ocr = config.use_ocr && !images.is_empty();
    let mut images = if ran_ocr {
        let engine = resolve_engine(config)?;
        let cache = config
            .use_cache
            .then(|| OcrCache::new(config.resolved_cache_dir()));
        ocr::process_images(
            images,
            engine.as_ref(),
            cache.as_ref(),
            request.sink.clone(),
            config.batch_size,
            config.progress_callback.as_ref(),
        )
        .await
    } else {
        if !config.use_ocr && !images.is_empty() {
            debug!("OCR disabled; {} images will have no captions", images.len());
        }
        images
    };
    let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;

    // ── Phase 3: assemble ────────────────────────────────────────────────
    let mut captions: HashMap<usize, OcrMap> = HashMap::new();
    for record in &images {
        if let Some(caption) = record.caption() {
            captions
                .entry(record.id.page)
                .or_default()
                .insert(record.id, caption.to_string());
        }
    }

    let total_selected = loaded.len();
    let no_captions = OcrMap::new();
    let mut pages = Vec::with_capacity(total_selected);

    for page in loaded {
        let result = match page.outcome {
            Ok((content, placements)) => {
                let ocr_map = captions.get(&page.page_num).unwrap_or(&no_captions);
                let items = classify_page(&content, &placements, ocr_map);
                let lines = layout::reconstruct(&items);
                let page_markdown = markdown::emit(&lines);
                debug!(
                    "Page {}: {} items, {} lines",
                    page.page_num,
                    items.len(),
                    lines.len()
                );
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_complete(page.page_num, total_selected, page_markdown.len());
                }
                PageResult {
                    page_num: page.page_num,
                    markdown: page_markdown,
                    item_count: items.len(),
                    image_count: page.image_count,
                    error: None,
                }
            }
            Err(e) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_error(page.page_num, total_selected, &e.to_string());
                }
                PageResult {
                    page_num: page.page_num,
                    markdown: String::new(),
                    item_count: 0,
                    image_count: 0,
                    error: Some(e),
                }
            }
        };
        pages.push(result);
    }

    let processed = pages.iter().filter(|p| p.error.is_none()).count();
    let failed = pages.len() - processed;

    if processed == 0 {
        let first_error = pages
            .iter()
            .find_map(|p| p.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(ScribeError::AllPagesFailed {
            total: pages.len(),
            first_error,
        });
    }

    let markdown = markdown::assemble(
        &pages
            .iter()
            .filter(|p| p.error.is_none())
            .map(|p| p.markdown.as_str())
            .collect::<Vec<_>>(),
    );

    let stats = ConversionStats {
        total_pages: metadata.page_count,
        processed_pages: processed,
        failed_pages: failed,
        images_extracted: images.len(),
        images_recognized: images
            .iter()
            .filter(|r| r.ocr_text.is_some() && r.ocr_error.is_none())
            .count(),
        ocr_failures: images.iter().filter(|r| r.ocr_error.is_some()).count(),
        ocr_cache_hits: images.iter().filter(|r| r.from_cache).count(),
        extract_duration_ms,
        ocr_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Conversion complete: {}/{} pages, {} images, {}ms total",
        processed, total_selected, stats.images_extracted, stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(total_selected, processed);
    }

    let image_dir: Option<PathBuf> = if config.keep_images {
        let scratch_path = request.scratch.path().to_path_buf();
        let dir = request.scratch.persist();
        for record in &mut images {
            if let Ok(name) = record.path.strip_prefix(&scratch_path) {
                record.path = dir.join(name);
            }
        }
        info!("Kept extracted images in {}", dir.display());
        Some(dir)
    } else {
        None
    };

    Ok(ConversionOutput {
        markdown,
        images,
        pages,
        metadata,
        stats,
        image_dir,
    })
}

/// Page number to report when a selection matches nothing.
fn first_requested_page(selection: &PageSelection) -> usize {
    match selection {
        PageSelection::All => 0,
        PageSelection::Single(p) => *p,
        PageSelection::Range(start, _) => *start,
        PageSelection::Set(pages) => pages.first().copied().unwrap_or(0),
    }
}

/// Pick the OCR engine: a supplied engine wins, otherwise build the
/// configured backend.
fn resolve_engine(config: &ConversionConfig) -> Result<Arc<dyn OcrEngine>, ScribeError> {
    if let Some(ref engine) = config.ocr_engine {
        return Ok(Arc::clone(engine));
    }
    match config.ocr_backend {
        OcrBackend::Vision => {
            let provider = resolve_provider(config)?;
            Ok(Arc::new(VisionOcrEngine::from_config(provider, config)))
        }
        OcrBackend::Tesseract => Ok(Arc::new(TesseractCliEngine::from_config(config))),
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ScribeError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ScribeError::OcrEngineNotConfigured {
            engine: format!("vision ({})", provider_name),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the vision provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is;
/// 2. `config.provider_name` + `config.model`;
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` from the environment;
/// 4. OpenAI when `OPENAI_API_KEY` is set;
/// 5. whatever [`ProviderFactory::from_env`] detects.
fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, ScribeError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);
        return create_vision_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ScribeError::OcrEngineNotConfigured {
            engine: "vision".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, use --ocr-engine tesseract, or pass --no-ocr.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Write `contents` to `path` through a sibling temp file and a rename.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), ScribeError> {
    let failed = |source: std::io::Error| ScribeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(failed)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(failed(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_requested_page_per_selection() {
        assert_eq!(first_requested_page(&PageSelection::All), 0);
        assert_eq!(first_requested_page(&PageSelection::Single(9)), 9);
        assert_eq!(first_requested_page(&PageSelection::Range(4, 6)), 4);
        assert_eq!(first_requested_page(&PageSelection::Set(vec![7, 2])), 7);
    }

    #[test]
    fn supplied_engine_wins_over_backend() {
        let engine: Arc<dyn OcrEngine> =
            Arc::new(TesseractCliEngine::new("tess", "eng", Duration::from_secs(1)));
        let config = ConversionConfig::builder()
            .ocr_backend(OcrBackend::Vision)
            .ocr_engine(Arc::clone(&engine))
            .build()
            .unwrap();
        let resolved = resolve_engine(&config).unwrap();
        assert_eq!(resolved.name(), "tesseract");
    }

    #[test]
    fn tesseract_backend_needs_no_provider() {
        let config = ConversionConfig::builder()
            .ocr_backend(OcrBackend::Tesseract)
            .build()
            .unwrap();
        assert_eq!(resolve_engine(&config).unwrap().name(), "tesseract");
    }

    #[tokio::test]
    async fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.md");
        write_atomic(&path, "first").await.unwrap();
        write_atomic(&path, "second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("md.tmp").exists());
    }

    #[tokio::test]
    async fn bytes_that_are_not_a_pdf_are_rejected_early() {
        let config = ConversionConfig::default();
        let err = convert_from_bytes(b"GIF89a", &config).await.unwrap_err();
        assert!(matches!(err, ScribeError::NotAPdf { .. }));
    }
}
