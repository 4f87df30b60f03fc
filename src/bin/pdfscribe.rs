//! CLI binary for pdfscribe.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdfscribe::{
    convert, convert_to_file, inspect, ConversionConfig, ConversionProgressCallback, OcrBackend,
    OcrCache, PageSelection, ProgressCallback,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback. The bar first counts OCR'd images, then is
/// finished with a per-page log once assembly runs.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    /// Switch to the counting style once the number of images is known.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.bar.set_prefix("Extracting");
        self.bar.set_message(format!("{total_pages} pages"));
    }

    fn on_images_extracted(&self, count: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{count} images extracted"))
        ));
        if count > 0 {
            self.activate_bar(count);
        }
    }

    fn on_image_recognized(&self, done: usize, total: usize) {
        if self.bar.length() != Some(total as u64) {
            self.activate_bar(total);
        }
        self.bar.set_position(done as u64);
    }

    fn on_page_complete(&self, page_num: usize, total: usize, markdown_len: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{markdown_len:>5} chars")),
        ));
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg = match error.char_indices().nth(79) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
        ));
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages converted  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (stdout)
  pdfscribe document.pdf

  # Convert to file
  pdfscribe document.pdf -o output.md

  # Specific pages, no OCR
  pdfscribe --pages 1-5 --no-ocr paper.pdf -o paper.md

  # Offline OCR with tesseract
  pdfscribe --ocr-engine tesseract --tesseract-lang eng+deu scan.pdf

  # Vision OCR with a specific model
  pdfscribe --provider openai --model gpt-4.1-mini slides.pdf

  # Convert from URL
  pdfscribe https://arxiv.org/pdf/1706.03762 -o attention.md

  # Inspect PDF metadata (no OCR engine needed)
  pdfscribe --inspect-only document.pdf

  # Keep extracted images for review
  pdfscribe --keep-images --json report.pdf > report.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (vision OCR)
  ANTHROPIC_API_KEY       Anthropic API key (vision OCR)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Log filter, e.g. pdfscribe=debug
"#;

/// Convert PDF files and URLs to Markdown, with OCR captions for images.
#[derive(Parser, Debug)]
#[command(
    name = "pdfscribe",
    version,
    about = "Convert PDF files and URLs to Markdown, with OCR captions for images",
    long_about = "Convert PDF documents (local files or URLs) to Markdown by reading the \
text layer directly. Headings, bullets and italics are inferred from fonts; embedded images \
are OCR'd with a vision model or tesseract and their text is placed where the image was drawn.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: Option<String>,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "PDFSCRIBE_OUTPUT")]
    output: Option<PathBuf>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDFSCRIBE_PAGES", default_value = "all")]
    pages: String,

    /// Skip OCR; images are extracted but produce no captions.
    #[arg(long, env = "PDFSCRIBE_NO_OCR")]
    no_ocr: bool,

    /// Maximum concurrent OCR calls.
    #[arg(short, long, env = "PDFSCRIBE_BATCH_SIZE", default_value_t = 5)]
    batch_size: usize,

    /// Do not read or write the OCR cache.
    #[arg(long, env = "PDFSCRIBE_NO_CACHE")]
    no_cache: bool,

    /// OCR cache directory (default: ./.ocr-cache).
    #[arg(long, env = "PDFSCRIBE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Print OCR cache statistics and exit.
    #[arg(long)]
    cache_stats: bool,

    /// Delete every OCR cache entry and exit.
    #[arg(long)]
    clear_cache: bool,

    /// OCR backend used when images are found.
    #[arg(long, env = "PDFSCRIBE_OCR_ENGINE", value_enum, default_value = "vision")]
    ocr_engine: OcrEngineArg,

    /// Vision model ID (e.g. gpt-4.1-nano, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Tesseract language pack(s), e.g. eng or eng+deu.
    #[arg(long, env = "PDFSCRIBE_TESSERACT_LANG", default_value = "eng")]
    tesseract_lang: String,

    /// Tesseract executable.
    #[arg(long, env = "PDFSCRIBE_TESSERACT_PATH", default_value = "tesseract")]
    tesseract_path: String,

    /// Per-image OCR timeout in seconds.
    #[arg(long, env = "PDFSCRIBE_OCR_TIMEOUT", default_value_t = 60)]
    ocr_timeout: u64,

    /// Keep the extracted PNGs and print where they are.
    #[arg(long, env = "PDFSCRIBE_KEEP_IMAGES")]
    keep_images: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFSCRIBE_PASSWORD")]
    password: Option<String>,

    /// Output structured JSON (ConversionOutput) instead of Markdown.
    #[arg(long, env = "PDFSCRIBE_JSON")]
    json: bool,

    /// Print PDF metadata only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFSCRIBE_NO_PROGRESS")]
    no_progress: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFSCRIBE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFSCRIBE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFSCRIBE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OcrEngineArg {
    Vision,
    Tesseract,
}

impl From<OcrEngineArg> for OcrBackend {
    fn from(v: OcrEngineArg) -> Self {
        match v {
            OcrEngineArg::Vision => OcrBackend::Vision,
            OcrEngineArg::Tesseract => OcrBackend::Tesseract,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO logs are suppressed while the progress bar is drawing.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Cache maintenance ────────────────────────────────────────────────
    if cli.cache_stats || cli.clear_cache {
        let config = ConversionConfig {
            cache_dir: cli.cache_dir.clone(),
            ..Default::default()
        };
        let cache = OcrCache::new(config.resolved_cache_dir());
        if cli.clear_cache {
            let removed = cache.clear().context("Failed to clear OCR cache")?;
            eprintln!("{} removed {} cache entries", green("✔"), removed);
        } else {
            let stats = cache.stats().context("Failed to read OCR cache")?;
            println!("Cache:    {}", cache.dir().display());
            println!("Entries:  {}", stats.entries);
            println!("Size:     {} bytes", stats.total_bytes);
        }
        return Ok(());
    }

    let input = cli
        .input
        .clone()
        .context("An input PDF path or URL is required")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = ConversionConfig {
            password: cli.password.clone(),
            download_timeout_secs: cli.download_timeout,
            ..Default::default()
        };
        let meta = inspect(&input, &config)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", input);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            if let Some(ref s) = meta.subject {
                println!("Subject:      {}", s);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let stats = convert_to_file(&input, output_path, &config)
            .await
            .context("Conversion failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {}/{} pages  {} images  {}ms  →  {}",
                if stats.failed_pages == 0 && stats.ocr_failures == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                stats.processed_pages,
                stats.processed_pages + stats.failed_pages,
                stats.images_extracted,
                stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
            if stats.images_extracted > 0 {
                eprintln!(
                    "   {} recognized  /  {} from cache  /  {} failed",
                    dim(&stats.images_recognized.to_string()),
                    dim(&stats.ocr_cache_hits.to_string()),
                    dim(&stats.ocr_failures.to_string()),
                );
            }
        }
    } else {
        let output = convert(&input, &config)
            .await
            .context("Conversion failed")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(output.markdown.as_bytes())
                .context("Failed to write to stdout")?;
            if !output.markdown.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }

        if !cli.quiet && !cli.json {
            let selected = output.stats.processed_pages + output.stats.failed_pages;
            eprintln!(
                "Converted {}/{} pages, {} images ({} OCR failures) in {}ms",
                output.stats.processed_pages,
                selected,
                output.stats.images_extracted,
                output.stats.ocr_failures,
                output.stats.total_duration_ms
            );
        }
        if let (Some(dir), false) = (&output.image_dir, cli.quiet) {
            eprintln!("Images kept in {}", bold(&dir.display().to_string()));
        }
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let pages = parse_pages(&cli.pages)?;

    let mut builder = ConversionConfig::builder()
        .use_ocr(!cli.no_ocr)
        .batch_size(cli.batch_size)
        .use_cache(!cli.no_cache)
        .keep_images(cli.keep_images)
        .pages(pages)
        .ocr_backend(cli.ocr_engine.into())
        .tesseract_lang(cli.tesseract_lang.clone())
        .tesseract_path(cli.tesseract_path.clone())
        .ocr_timeout_secs(cli.ocr_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref dir) = cli.cache_dir {
        builder = builder.cache_dir(dir);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_page_selections() {
        assert!(matches!(parse_pages("all").unwrap(), PageSelection::All));
        assert!(matches!(parse_pages(" 4 ").unwrap(), PageSelection::Single(4)));
        assert!(matches!(parse_pages("2-6").unwrap(), PageSelection::Range(2, 6)));
        match parse_pages("1,3,5").unwrap() {
            PageSelection::Set(p) => assert_eq!(p, vec![1, 3, 5]),
            other => panic!("unexpected selection {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_page_selections() {
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("5-2").is_err());
        assert!(parse_pages("1,x").is_err());
        assert!(parse_pages("0,2").is_err());
    }

    #[test]
    fn flags_map_onto_config() {
        let cli = Cli::parse_from([
            "pdfscribe",
            "doc.pdf",
            "--no-ocr",
            "--no-cache",
            "--batch-size",
            "2",
            "--ocr-engine",
            "tesseract",
            "--tesseract-lang",
            "deu",
            "--pages",
            "3",
        ]);
        let config = build_config(&cli, None).unwrap();
        assert!(!config.use_ocr);
        assert!(!config.use_cache);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.ocr_backend, OcrBackend::Tesseract);
        assert_eq!(config.tesseract_lang, "deu");
        assert!(matches!(config.pages, PageSelection::Single(3)));
    }
}
