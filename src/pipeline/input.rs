//! Input resolution: turn a user-supplied path or URL into PDF bytes.
//!
//! The document is loaded from memory, so URL inputs are downloaded straight
//! into a buffer with no temp file involved. Both paths check the `%PDF`
//! magic before returning so callers get [`ScribeError::NotAPdf`] instead of
//! an opaque parser failure.

use crate::error::ScribeError;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";

/// A PDF held in memory, with a display name for error messages.
#[derive(Debug, Clone)]
pub struct PdfBytes {
    /// File name or URL the bytes came from.
    pub source_name: String,
    pub bytes: Vec<u8>,
}

impl PdfBytes {
    /// Wrap caller-provided bytes, checking the PDF magic.
    pub fn new(source_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ScribeError> {
        let source_name = source_name.into();
        check_magic(&source_name, &bytes)?;
        Ok(Self { source_name, bytes })
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL to PDF bytes.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<PdfBytes, ScribeError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<PdfBytes, ScribeError> {
    let path = PathBuf::from(path_str);

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => ScribeError::PermissionDenied { path: path.clone() },
        _ => ScribeError::FileNotFound { path: path.clone() },
    })?;

    debug!("Read {} bytes from {}", bytes.len(), path.display());
    PdfBytes::new(path.display().to_string(), bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<PdfBytes, ScribeError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| ScribeError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ScribeError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());

    PdfBytes::new(source_name_for(url), bytes.to_vec())
}

/// Last path segment of a URL when it looks like a file name, else the URL.
fn source_name_for(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| url.to_string())
}

fn check_magic(source_name: &str, bytes: &[u8]) -> Result<(), ScribeError> {
    if bytes.starts_with(PDF_MAGIC) {
        return Ok(());
    }
    Err(ScribeError::NotAPdf {
        source_name: source_name.to_string(),
        magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn source_name_prefers_file_segment() {
        assert_eq!(source_name_for("https://x.org/a/report.pdf"), "report.pdf");
        assert_eq!(source_name_for("https://x.org/download"), "https://x.org/download");
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = PdfBytes::new("notes.txt", b"hello".to_vec()).unwrap_err();
        match err {
            ScribeError::NotAPdf { magic, .. } => assert_eq!(magic, b"hell"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(
            PdfBytes::new("empty.pdf", Vec::new()),
            Err(ScribeError::NotAPdf { .. })
        ));
    }

    #[tokio::test]
    async fn missing_local_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, ScribeError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_pdf_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.7\n%%EOF").unwrap();
        let pdf = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert!(pdf.bytes.starts_with(b"%PDF"));
        assert!(pdf.source_name.ends_with("doc.pdf"));
    }
}
