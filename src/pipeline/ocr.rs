//! OCR engines and the OCR Orchestrator.
//!
//! An [`OcrEngine`] turns PNG bytes into raw text. Two are provided:
//! [`VisionOcrEngine`] asks a vision-capable model through edgequake-llm,
//! [`TesseractCliEngine`] pipes the image through the `tesseract` binary.
//!
//! [`process_images`] drives an engine over a page set's images. Identical
//! image bytes are recognized once per run, the cache is consulted before
//! the engine and written after it, and at most `batch_size` recognitions
//! are outstanding at once. Output order always equals input order.
//!
//! ## Retry Strategy
//!
//! Vision calls retry with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`); every attempt has its own timeout.

use crate::config::ConversionConfig;
use crate::error::RecognitionError;
use crate::output::ImageRecord;
use crate::pipeline::cache::OcrCache;
use crate::pipeline::sink::ByteSink;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_OCR_PROMPT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// An external text-recognition capability.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Whether concurrent `recognize` calls are safe. Engines that return
    /// false are driven strictly sequentially.
    fn is_reentrant(&self) -> bool {
        true
    }

    /// Recognize the text in one PNG image.
    async fn recognize(&self, png: &[u8]) -> Result<String, RecognitionError>;
}

// ── Vision engine ────────────────────────────────────────────────────────

/// OCR through a vision-capable LLM provider.
pub struct VisionOcrEngine {
    provider: Arc<dyn LLMProvider>,
    prompt: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    call_timeout: Duration,
}

impl VisionOcrEngine {
    /// Engine with the default prompt and conservative sampling.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self::from_config(provider, &ConversionConfig::default())
    }

    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            prompt: config
                .ocr_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_OCR_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            call_timeout: Duration::from_secs(config.ocr_timeout_secs),
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

/// Delay before retry `attempt` (1-based).
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))))
}

#[async_trait]
impl OcrEngine for VisionOcrEngine {
    fn name(&self) -> &str {
        "vision"
    }

    async fn recognize(&self, png: &[u8]) -> Result<String, RecognitionError> {
        let image = ImageData::new(STANDARD.encode(png), "image/png").with_detail("high");
        let messages = vec![
            ChatMessage::system(&self.prompt),
            ChatMessage::user_with_images("", vec![image]),
        ];
        let options = self.options();

        let mut last_err = String::from("no attempt made");
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(self.retry_backoff_ms, attempt);
                warn!(
                    "Vision OCR: retry {}/{} after {}ms",
                    attempt,
                    self.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            match timeout(self.call_timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => return Ok(response.content),
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    warn!("Vision OCR: attempt {} failed: {}", attempt + 1, last_err);
                }
                Err(_) => {
                    last_err = format!("timed out after {}s", self.call_timeout.as_secs());
                    warn!("Vision OCR: attempt {} {}", attempt + 1, last_err);
                }
            }
        }

        Err(RecognitionError::EngineFailed {
            engine: self.name().to_string(),
            attempts: self.max_retries + 1,
            detail: last_err,
        })
    }
}

// ── Tesseract engine ─────────────────────────────────────────────────────

/// OCR through the `tesseract` command-line program.
///
/// Each call runs its own process, so calls can overlap freely.
#[derive(Debug, Clone)]
pub struct TesseractCliEngine {
    program: String,
    lang: String,
    call_timeout: Duration,
}

impl TesseractCliEngine {
    pub fn new(program: impl Into<String>, lang: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            lang: lang.into(),
            call_timeout,
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(
            config.tesseract_path.clone(),
            config.tesseract_lang.clone(),
            Duration::from_secs(config.ocr_timeout_secs),
        )
    }

    /// Arguments: read the image from stdin, write text to stdout, automatic
    /// page segmentation.
    fn args(&self) -> Vec<String> {
        ["stdin", "stdout", "-l", self.lang.as_str(), "--psm", "1"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    async fn run(&self, png: &[u8]) -> Result<String, RecognitionError> {
        let failed = |detail: String| RecognitionError::EngineFailed {
            engine: self.name().to_string(),
            attempts: 1,
            detail,
        };

        let mut child = tokio::process::Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecognitionError::Unavailable {
                engine: self.name().to_string(),
                detail: format!("cannot run '{}': {}", self.program, e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A broken pipe here means the process already exited; its
            // status below carries the real error.
            if let Err(e) = stdin.write_all(png).await {
                debug!("tesseract stdin closed early: {}", e);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!("{}: {}", output.status, stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl OcrEngine for TesseractCliEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, png: &[u8]) -> Result<String, RecognitionError> {
        match timeout(self.call_timeout, self.run(png)).await {
            Ok(result) => result,
            Err(_) => Err(RecognitionError::Timeout {
                engine: self.name().to_string(),
                secs: self.call_timeout.as_secs(),
            }),
        }
    }
}

// ── Text cleanup ─────────────────────────────────────────────────────────

/// A word made only of one or two punctuation/symbol characters.
static SPECKLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\p{L}\p{N}]{1,2}$").unwrap());

/// Normalise raw OCR output.
///
/// Per line: collapse whitespace runs, drop isolated one- or two-character
/// symbol groups between words, then drop lines with no letters or digits.
/// The surviving lines are joined with `\n` and the result trimmed.
pub fn clean_ocr_text(raw: &str) -> String {
    raw.lines()
        .filter_map(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            let last = words.len().saturating_sub(1);
            let kept: Vec<&str> = words
                .iter()
                .enumerate()
                .filter(|&(i, w)| i == 0 || i == last || !SPECKLE.is_match(w))
                .map(|(_, w)| *w)
                .collect();
            let line = kept.join(" ");
            line.chars().any(char::is_alphanumeric).then_some(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Text recognized for one distinct image content.
#[derive(Debug, Clone)]
struct Recognized {
    text: String,
    from_cache: bool,
}

/// Recognize one image's bytes: cache, then engine, then write-through.
async fn recognize_bytes(
    engine: &dyn OcrEngine,
    cache: Option<&OcrCache>,
    bytes: &[u8],
) -> Result<Recognized, RecognitionError> {
    if let Some(cache) = cache {
        if let Some(text) = cache.get_async(bytes).await {
            return Ok(Recognized {
                text,
                from_cache: true,
            });
        }
    }

    let raw = engine.recognize(bytes).await?;
    let text = clean_ocr_text(&raw);

    if let Some(cache) = cache {
        if !text.is_empty() {
            if let Err(e) = cache.put_async(bytes, &text).await {
                warn!("OCR cache write failed: {}", e);
            }
        }
    }

    Ok(Recognized {
        text,
        from_cache: false,
    })
}

/// Read every image back on the blocking thread pool, in input order.
async fn read_all(sink: Arc<dyn ByteSink>, paths: Vec<PathBuf>) -> Vec<io::Result<Vec<u8>>> {
    let count = paths.len();
    let reads =
        tokio::task::spawn_blocking(move || paths.iter().map(|p| sink.read(p)).collect::<Vec<_>>())
            .await;
    match reads {
        Ok(reads) => reads,
        Err(e) => {
            let detail = e.to_string();
            (0..count).map(|_| Err(io::Error::other(detail.clone()))).collect()
        }
    }
}

/// Run OCR over `images` and return them enriched with `ocr_text`,
/// `ocr_error` and `from_cache`, in input order.
///
/// * `cache` — `None` disables both lookup and write-through.
/// * `batch_size` — maximum outstanding recognitions; forced to 1 when the
///   engine is not reentrant.
///
/// A failure affects only the images whose bytes failed: they get an empty
/// `ocr_text` and an `ocr_error`.
pub async fn process_images(
    mut images: Vec<ImageRecord>,
    engine: &dyn OcrEngine,
    cache: Option<&OcrCache>,
    sink: Arc<dyn ByteSink>,
    batch_size: usize,
    progress: Option<&ProgressCallback>,
) -> Vec<ImageRecord> {
    if images.is_empty() {
        return images;
    }
    let start = Instant::now();

    // Read every image once and group identical contents.
    let mut jobs: Vec<Vec<u8>> = Vec::new();
    let mut job_of_key: HashMap<String, usize> = HashMap::new();
    let mut job_of_image: Vec<Result<usize, RecognitionError>> = Vec::with_capacity(images.len());

    let paths: Vec<PathBuf> = images.iter().map(|r| r.path.clone()).collect();
    for (record, read) in images.iter().zip(read_all(sink, paths).await) {
        match read {
            Ok(bytes) => {
                let key = OcrCache::key(&bytes);
                let job = *job_of_key.entry(key).or_insert_with(|| {
                    jobs.push(bytes);
                    jobs.len() - 1
                });
                job_of_image.push(Ok(job));
            }
            Err(e) => job_of_image.push(Err(RecognitionError::ReadFailed {
                path: record.path.clone(),
                detail: e.to_string(),
            })),
        }
    }

    let concurrency = if engine.is_reentrant() {
        batch_size.max(1)
    } else {
        1
    };
    let total = jobs.len();
    let done = AtomicUsize::new(0);
    info!(
        "OCR: {} images, {} distinct, engine '{}', concurrency {}",
        images.len(),
        total,
        engine.name(),
        concurrency
    );

    let results: Vec<Result<Recognized, RecognitionError>> =
        stream::iter(jobs.iter().map(|bytes| {
            let done = &done;
            async move {
                let result = recognize_bytes(engine, cache, bytes).await;
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(cb) = progress {
                    cb.on_image_recognized(n, total);
                }
                result
            }
        }))
        .buffered(concurrency)
        .collect()
        .await;

    for (record, job) in images.iter_mut().zip(job_of_image) {
        let outcome = job.and_then(|j| results[j].clone());
        match outcome {
            Ok(recognized) => {
                record.ocr_text = Some(recognized.text);
                record.ocr_error = None;
                record.from_cache = recognized.from_cache;
            }
            Err(e) => {
                warn!("OCR failed for {}: {}", record.id, e);
                record.ocr_text = Some(String::new());
                record.ocr_error = Some(e.to_string());
                record.from_cache = false;
            }
        }
    }

    debug!("OCR finished in {}ms", start.elapsed().as_millis());
    images
}
