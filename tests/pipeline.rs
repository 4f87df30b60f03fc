//! End-to-end tests for the conversion pipeline.
//!
//! Pages are built by hand and fed through `convert_source`, so no pdfium
//! library, API key or network is needed. OCR engines are fakes that decode
//! the PNG they receive and answer by image width.

use async_trait::async_trait;
use pdfscribe::pipeline::sink::{KEPT_PREFIX, SCRATCH_PREFIX};
use pdfscribe::pipeline::source::{
    ImageOperator, ImageSource, PixelBuffer, PixelLayout, TextRun, Transform,
};
use pdfscribe::{
    convert_source, ConversionConfig, ConversionProgressCallback, MemoryByteSink, OcrEngine,
    PageContent, PageError, PageSelection, PageSource, RecognitionError, ScribeError,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route pipeline logs to the test harness; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Fakes ────────────────────────────────────────────────────────────────

/// An in-memory document. Pages listed in `broken` fail to load.
#[derive(Default)]
struct FakeDoc {
    pages: Vec<PageContent>,
    broken: Vec<usize>,
}

impl FakeDoc {
    fn new(pages: Vec<PageContent>) -> Self {
        Self {
            pages,
            broken: Vec::new(),
        }
    }

    fn with_broken(mut self, index: usize) -> Self {
        self.broken.push(index);
        self
    }
}

impl PageSource for FakeDoc {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn load_page(&self, index: usize) -> Result<PageContent, PageError> {
        if self.broken.contains(&index) {
            return Err(PageError::LoadFailed {
                page: index + 1,
                detail: "object stream truncated".into(),
            });
        }
        self.pages
            .get(index)
            .cloned()
            .ok_or_else(|| PageError::LoadFailed {
                page: index + 1,
                detail: "no such page".into(),
            })
    }
}

/// Answers with the caption registered for the image's width and counts
/// every call. Widths with no caption fail.
#[derive(Default)]
struct CaptionEngine {
    captions: HashMap<u32, String>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    reentrant: bool,
    delay: Option<Duration>,
}

impl CaptionEngine {
    fn new(captions: &[(u32, &str)]) -> Self {
        Self {
            captions: captions
                .iter()
                .map(|(w, t)| (*w, t.to_string()))
                .collect(),
            reentrant: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for CaptionEngine {
    fn name(&self) -> &str {
        "caption"
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    async fn recognize(&self, png: &[u8]) -> Result<String, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let width = image::load_from_memory(png)
            .map(|img| img.width())
            .map_err(|e| RecognitionError::EngineFailed {
                engine: "caption".into(),
                attempts: 1,
                detail: e.to_string(),
            })?;
        self.captions
            .get(&width)
            .cloned()
            .ok_or_else(|| RecognitionError::EngineFailed {
                engine: "caption".into(),
                attempts: 1,
                detail: format!("nothing legible at width {width}"),
            })
    }
}

// ── Page builders ────────────────────────────────────────────────────────

fn run(text: &str, size: f32, x: f32, y: f32, seq: usize) -> TextRun {
    TextRun::new(
        text,
        Transform([size, 0.0, 0.0, size, x, y]),
        "Helvetica",
        seq,
    )
}

fn italic_run(text: &str, size: f32, x: f32, y: f32, seq: usize) -> TextRun {
    TextRun::new(
        text,
        Transform([size, 0.0, 0.0, size, x, y]),
        "Times-Italic",
        seq,
    )
}

/// A solid RGB image; the width doubles as the fake engine's lookup key.
fn image(name: &str, width: u32, y: f32, seq: usize) -> ImageOperator {
    let pixels = PixelBuffer {
        width,
        height: 2,
        layout: PixelLayout::Rgb,
        data: vec![200; width as usize * 2 * 3],
    };
    ImageOperator::new(
        ImageSource::Named(name.into()),
        Some(Transform([width as f32, 0.0, 0.0, 20.0, 72.0, y])),
        seq,
        Ok(pixels),
    )
}

fn page(page_num: usize, text_runs: Vec<TextRun>, images: Vec<ImageOperator>) -> PageContent {
    PageContent {
        page_num,
        height: 792.0,
        text_runs,
        images,
    }
}

fn config_in(scratch: &Path) -> ConversionConfig {
    ConversionConfig::builder()
        .scratch_root(scratch)
        .use_cache(false)
        .sweep_stale_after_secs(None)
        .build()
        .unwrap()
}

fn with_engine(scratch: &Path, engine: Arc<CaptionEngine>) -> ConversionConfig {
    ConversionConfig::builder()
        .scratch_root(scratch)
        .use_cache(false)
        .sweep_stale_after_secs(None)
        .ocr_engine(engine as Arc<dyn OcrEngine>)
        .build()
        .unwrap()
}

fn scratch_dirs(root: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(root)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(SCRATCH_PREFIX))
                })
                .collect()
        })
        .unwrap_or_default()
}

// ── Layout scenarios ─────────────────────────────────────────────────────

#[tokio::test]
async fn larger_font_becomes_first_level_heading() {
    let scratch = tempfile::tempdir().unwrap();
    let doc = FakeDoc::new(vec![page(
        1,
        vec![
            run("INTRODUCTION", 18.0, 72.0, 700.0, 0),
            run("Body text here.", 10.0, 72.0, 670.0, 1),
        ],
        vec![],
    )]);

    let output = convert_source(&doc, &config_in(scratch.path())).await.unwrap();
    assert_eq!(output.markdown, "# INTRODUCTION\nBody text here.");
    assert_eq!(output.pages[0].item_count, 2);
}

#[tokio::test]
async fn lone_image_becomes_blockquote() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine::new(&[(4, "Figure 1: diagram")]));
    let doc = FakeDoc::new(vec![page(1, vec![], vec![image("fig", 4, 400.0, 0)])]);

    let output = convert_source(&doc, &with_engine(scratch.path(), engine.clone()))
        .await
        .unwrap();

    assert_eq!(output.markdown, "> Figure 1: diagram");
    assert_eq!(output.pages[0].markdown, "> Figure 1: diagram\n");
    assert_eq!(output.images.len(), 1);
    assert_eq!(
        output.images[0].ocr_text.as_deref(),
        Some("Figure 1: diagram")
    );
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn bullets_and_italics_are_rendered() {
    let scratch = tempfile::tempdir().unwrap();
    let doc = FakeDoc::new(vec![page(
        1,
        vec![
            run("• First point", 10.0, 72.0, 700.0, 0),
            italic_run("note", 10.0, 72.0, 680.0, 1),
        ],
        vec![],
    )]);

    let output = convert_source(&doc, &config_in(scratch.path())).await.unwrap();
    assert_eq!(output.markdown, "- First point\n*note*");
}

#[tokio::test]
async fn pages_are_joined_with_a_rule() {
    let scratch = tempfile::tempdir().unwrap();
    let doc = FakeDoc::new(vec![
        page(1, vec![run("Page 1", 10.0, 72.0, 700.0, 0)], vec![]),
        page(2, vec![run("Page 2", 10.0, 72.0, 700.0, 0)], vec![]),
    ]);

    let output = convert_source(&doc, &config_in(scratch.path())).await.unwrap();
    assert_eq!(output.markdown, "Page 1\n\n---\nPage 2");
    assert_eq!(output.stats.processed_pages, 2);
}

#[tokio::test]
async fn caption_sits_between_surrounding_text() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine::new(&[(6, "Revenue by quarter")]));
    let doc = FakeDoc::new(vec![page(
        1,
        vec![
            run("Results", 10.0, 72.0, 700.0, 0),
            run("Discussion", 10.0, 72.0, 300.0, 2),
        ],
        vec![image("chart", 6, 500.0, 1)],
    )]);

    let output = convert_source(&doc, &with_engine(scratch.path(), engine))
        .await
        .unwrap();
    assert_eq!(
        output.markdown,
        "Results\n\n> Revenue by quarter\n\nDiscussion"
    );
}

// ── Edge cases ───────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_page_contributes_nothing_and_does_not_fail() {
    let scratch = tempfile::tempdir().unwrap();
    let doc = FakeDoc::new(vec![page(1, vec![], vec![])]);

    let output = convert_source(&doc, &config_in(scratch.path())).await.unwrap();
    assert_eq!(output.markdown, "");
    assert!(output.pages[0].error.is_none());
    assert_eq!(output.pages[0].item_count, 0);
}

#[tokio::test]
async fn failed_page_is_skipped_and_reported() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let doc = FakeDoc::new(vec![
        page(1, vec![run("one", 10.0, 72.0, 700.0, 0)], vec![]),
        page(2, vec![run("two", 10.0, 72.0, 700.0, 0)], vec![]),
        page(3, vec![run("three", 10.0, 72.0, 700.0, 0)], vec![]),
    ])
    .with_broken(1);

    let output = convert_source(&doc, &config_in(scratch.path())).await.unwrap();
    assert_eq!(output.markdown, "one\n\n---\nthree");
    assert_eq!(output.stats.processed_pages, 2);
    assert_eq!(output.stats.failed_pages, 1);
    assert!(matches!(
        output.pages[1].error,
        Some(PageError::LoadFailed { page: 2, .. })
    ));
}

#[tokio::test]
async fn every_page_failing_is_one_error() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let doc = FakeDoc::new(vec![page(1, vec![], vec![]), page(2, vec![], vec![])])
        .with_broken(0)
        .with_broken(1);

    let err = convert_source(&doc, &config_in(scratch.path()))
        .await
        .unwrap_err();
    match err {
        ScribeError::AllPagesFailed { total, first_error } => {
            assert_eq!(total, 2);
            assert!(first_error.contains("object stream truncated"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn page_selection_limits_output() {
    let scratch = tempfile::tempdir().unwrap();
    let doc = FakeDoc::new(vec![
        page(1, vec![run("one", 10.0, 72.0, 700.0, 0)], vec![]),
        page(2, vec![run("two", 10.0, 72.0, 700.0, 0)], vec![]),
    ]);

    let mut config = config_in(scratch.path());
    config.pages = PageSelection::Single(2);
    let output = convert_source(&doc, &config).await.unwrap();
    assert_eq!(output.markdown, "two");
    assert_eq!(output.pages.len(), 1);
    assert_eq!(output.stats.total_pages, 2);

    config.pages = PageSelection::Single(7);
    let err = convert_source(&doc, &config).await.unwrap_err();
    assert!(matches!(
        err,
        ScribeError::PageOutOfRange { page: 7, total: 2 }
    ));
}

// ── OCR behaviour ────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_ocr_is_recorded_and_excluded() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine::new(&[(4, "Legend")]));
    let doc = FakeDoc::new(vec![page(
        1,
        vec![run("Body", 10.0, 72.0, 700.0, 0)],
        vec![image("ok", 4, 500.0, 1), image("blurry", 8, 300.0, 2)],
    )]);

    let output = convert_source(&doc, &with_engine(scratch.path(), engine))
        .await
        .unwrap();

    assert_eq!(output.markdown, "Body\n\n> Legend");
    let failed = &output.images[1];
    assert_eq!(failed.ocr_text.as_deref(), Some(""));
    assert!(failed
        .ocr_error
        .as_deref()
        .is_some_and(|e| e.contains("nothing legible")));
    assert_eq!(output.stats.ocr_failures, 1);
    assert_eq!(output.stats.images_recognized, 1);
}

#[tokio::test]
async fn disabled_ocr_never_touches_the_engine() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine::new(&[(4, "never")]));
    let doc = FakeDoc::new(vec![page(
        1,
        vec![run("Text only", 10.0, 72.0, 700.0, 0)],
        vec![image("fig", 4, 400.0, 1)],
    )]);

    let mut config = with_engine(scratch.path(), engine.clone());
    config.use_ocr = false;
    let output = convert_source(&doc, &config).await.unwrap();

    assert_eq!(output.markdown, "Text only");
    assert_eq!(output.stats.images_extracted, 1);
    assert!(output.images[0].ocr_text.is_none());
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn no_images_means_no_engine_is_needed() {
    let scratch = tempfile::tempdir().unwrap();
    // Vision backend with no provider configured: only fails if resolved.
    let config = ConversionConfig::builder()
        .scratch_root(scratch.path())
        .sweep_stale_after_secs(None)
        .use_cache(false)
        .provider_name("definitely-not-a-provider")
        .build()
        .unwrap();
    let doc = FakeDoc::new(vec![page(1, vec![run("plain", 10.0, 0.0, 0.0, 0)], vec![])]);

    let output = convert_source(&doc, &config).await.unwrap();
    assert_eq!(output.markdown, "plain");
}

#[tokio::test]
async fn identical_images_are_recognized_once() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine::new(&[(4, "Logo")]));
    let doc = FakeDoc::new(vec![
        page(1, vec![], vec![image("logo", 4, 750.0, 0)]),
        page(2, vec![], vec![image("logo", 4, 750.0, 0)]),
    ]);

    let output = convert_source(&doc, &with_engine(scratch.path(), engine.clone()))
        .await
        .unwrap();

    assert_eq!(output.markdown, "> Logo\n\n---\n> Logo");
    assert_eq!(output.images.len(), 2);
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn cache_makes_a_second_run_free() {
    let scratch = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine::new(&[(4, "Cached caption")]));
    let doc = FakeDoc::new(vec![page(1, vec![], vec![image("fig", 4, 400.0, 0)])]);

    let config = ConversionConfig::builder()
        .scratch_root(scratch.path())
        .cache_dir(cache.path())
        .sweep_stale_after_secs(None)
        .ocr_engine(engine.clone() as Arc<dyn OcrEngine>)
        .build()
        .unwrap();

    let first = convert_source(&doc, &config).await.unwrap();
    let second = convert_source(&doc, &config).await.unwrap();

    assert_eq!(engine.calls(), 1);
    assert_eq!(first.markdown, second.markdown);
    assert!(!first.images[0].from_cache);
    assert!(second.images[0].from_cache);
    assert_eq!(second.stats.ocr_cache_hits, 1);
}

#[tokio::test]
async fn non_reentrant_engine_runs_one_at_a_time() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine {
        reentrant: false,
        delay: Some(Duration::from_millis(20)),
        ..CaptionEngine::new(&[(2, "a"), (3, "b"), (4, "c"), (5, "d")])
    });
    let doc = FakeDoc::new(vec![page(
        1,
        vec![],
        vec![
            image("a", 2, 700.0, 0),
            image("b", 3, 600.0, 1),
            image("c", 4, 500.0, 2),
            image("d", 5, 400.0, 3),
        ],
    )]);

    let mut config = with_engine(scratch.path(), engine.clone());
    config.batch_size = 4;
    let output = convert_source(&doc, &config).await.unwrap();

    assert_eq!(engine.calls(), 4);
    assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(output.markdown, "> a\n\n> b\n\n> c\n\n> d");
}

#[tokio::test]
async fn concurrency_never_exceeds_batch_size() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine {
        delay: Some(Duration::from_millis(20)),
        ..CaptionEngine::new(&[(2, "a"), (3, "b"), (4, "c"), (5, "d"), (6, "e")])
    });
    let images = (2..=6)
        .map(|w| image(&format!("img{w}"), w, 700.0 - w as f32 * 50.0, w as usize))
        .collect();
    let doc = FakeDoc::new(vec![page(1, vec![], images)]);

    let mut config = with_engine(scratch.path(), engine.clone());
    config.batch_size = 2;
    convert_source(&doc, &config).await.unwrap();

    assert!(engine.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(engine.calls(), 5);
}

// ── Scratch directory and sinks ──────────────────────────────────────────

#[tokio::test]
async fn scratch_dir_is_removed_after_conversion() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine::new(&[(4, "x")]));
    let doc = FakeDoc::new(vec![page(1, vec![], vec![image("fig", 4, 400.0, 0)])]);

    let output = convert_source(&doc, &with_engine(scratch.path(), engine))
        .await
        .unwrap();

    assert!(output.image_dir.is_none());
    assert!(!output.images[0].path.exists());
    assert!(scratch_dirs(scratch.path()).is_empty());
}

#[tokio::test]
async fn scratch_dir_is_removed_when_conversion_fails() {
    let scratch = tempfile::tempdir().unwrap();
    let doc = FakeDoc::new(vec![page(1, vec![], vec![])]).with_broken(0);

    assert!(convert_source(&doc, &config_in(scratch.path())).await.is_err());
    assert!(scratch_dirs(scratch.path()).is_empty());
}

#[tokio::test]
async fn keep_images_persists_the_pngs() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine::new(&[(4, "kept")]));
    let doc = FakeDoc::new(vec![page(1, vec![], vec![image("fig", 4, 400.0, 0)])]);

    let mut config = with_engine(scratch.path(), engine);
    config.keep_images = true;
    let output = convert_source(&doc, &config).await.unwrap();

    let dir = output.image_dir.clone().expect("image dir kept");
    assert!(dir.join("page_1_image_1.png").is_file());
    assert_eq!(output.images[0].path, dir.join("page_1_image_1.png"));
    let name = dir.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with(KEPT_PREFIX), "got {name}");
    assert!(scratch_dirs(scratch.path()).is_empty());
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn kept_images_survive_a_later_sweep() {
    let scratch = tempfile::tempdir().unwrap();
    let engine = Arc::new(CaptionEngine::new(&[(4, "kept")]));
    let doc = FakeDoc::new(vec![page(1, vec![], vec![image("fig", 4, 400.0, 0)])]);

    let mut config = with_engine(scratch.path(), engine);
    config.keep_images = true;
    let kept = convert_source(&doc, &config).await.unwrap();
    let dir = kept.image_dir.expect("image dir kept");

    let mut sweeping = config_in(scratch.path());
    sweeping.sweep_stale_after_secs = Some(0);
    let text_only = FakeDoc::new(vec![page(
        1,
        vec![run("later", 10.0, 72.0, 700.0, 0)],
        vec![],
    )]);
    convert_source(&text_only, &sweeping).await.unwrap();

    assert!(dir.join("page_1_image_1.png").is_file());
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn memory_sink_keeps_images_off_disk() {
    let scratch = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemoryByteSink::new());
    let engine = Arc::new(CaptionEngine::new(&[(4, "in memory")]));
    let doc = FakeDoc::new(vec![page(1, vec![], vec![image("fig", 4, 400.0, 0)])]);

    let mut config = with_engine(scratch.path(), engine);
    config.image_sink = Some(sink.clone() as Arc<dyn pdfscribe::ByteSink>);
    config.keep_images = true;
    let output = convert_source(&doc, &config).await.unwrap();

    assert_eq!(output.markdown, "> in memory");
    assert_eq!(sink.len(), 1);
    assert!(!output.images[0].path.exists());
    if let Some(dir) = output.image_dir {
        std::fs::remove_dir_all(dir).unwrap();
    }
}

// ── Progress ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl ConversionProgressCallback for Recorder {
    fn on_conversion_start(&self, total_pages: usize) {
        self.push(format!("start {total_pages}"));
    }

    fn on_images_extracted(&self, count: usize) {
        self.push(format!("extracted {count}"));
    }

    fn on_image_recognized(&self, done: usize, total: usize) {
        self.push(format!("ocr {done}/{total}"));
    }

    fn on_page_complete(&self, page_num: usize, _total: usize, _len: usize) {
        self.push(format!("page {page_num}"));
    }

    fn on_page_error(&self, page_num: usize, _total: usize, _error: &str) {
        self.push(format!("error {page_num}"));
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        self.push(format!("done {success_count}/{total_pages}"));
    }
}

#[tokio::test]
async fn progress_events_arrive_in_pipeline_order() {
    let scratch = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let engine = Arc::new(CaptionEngine::new(&[(4, "fig")]));
    let doc = FakeDoc::new(vec![
        page(1, vec![], vec![image("fig", 4, 400.0, 0)]),
        page(2, vec![], vec![]),
    ])
    .with_broken(1);

    let mut config = with_engine(scratch.path(), engine);
    config.progress_callback = Some(recorder.clone() as Arc<dyn ConversionProgressCallback>);
    convert_source(&doc, &config).await.unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start 2",
            "extracted 1",
            "ocr 1/1",
            "page 1",
            "error 2",
            "done 1/2",
        ]
    );
}
