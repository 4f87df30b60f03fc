//! OCR Cache: recognized text keyed by the MD5 of the image bytes.
//!
//! One pretty-printed JSON file per entry, `<dir>/<md5hex>.json`. The key is
//! computed from the bytes alone, never the path, so the same image hits
//! the same entry across documents and runs. Entries are never rewritten in
//! place: writes go to a uniquely named temp file that is then renamed over
//! the final name, so a concurrent reader sees either nothing or a whole
//! entry.

use crate::error::CacheError;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ENTRY_EXT: &str = "json";

/// What is stored per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrCacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct OcrCache {
    dir: PathBuf,
}

impl OcrCache {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lowercase hex MD5 of `bytes`.
    pub fn key(bytes: &[u8]) -> String {
        hex::encode(Md5::digest(bytes))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ENTRY_EXT))
    }

    /// Look up `bytes`. Unreadable or malformed entries count as misses.
    pub fn get(&self, bytes: &[u8]) -> Option<String> {
        self.get_by_key(&Self::key(bytes))
    }

    /// [`get`](Self::get) on the blocking thread pool.
    pub async fn get_async(&self, bytes: &[u8]) -> Option<String> {
        let cache = self.clone();
        let key = Self::key(bytes);
        match tokio::task::spawn_blocking(move || cache.get_by_key(&key)).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("OCR cache lookup task failed, treating as miss: {}", e);
                None
            }
        }
    }

    fn get_by_key(&self, key: &str) -> Option<String> {
        match self.try_get(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("OCR cache read failed, treating as miss: {}", e);
                None
            }
        }
    }

    fn try_get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        let entry: CacheEntry =
            serde_json::from_slice(&raw).map_err(|e| CacheError::Malformed {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        debug!("OCR cache hit: {}", path.display());
        Ok(Some(entry.text))
    }

    /// Store `text` for `bytes`.
    pub fn put(&self, bytes: &[u8], text: &str) -> Result<(), CacheError> {
        self.put_by_key(&Self::key(bytes), text)
    }

    /// [`put`](Self::put) on the blocking thread pool.
    pub async fn put_async(&self, bytes: &[u8], text: &str) -> Result<(), CacheError> {
        let cache = self.clone();
        let key = Self::key(bytes);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || cache.put_by_key(&key, &text))
            .await
            .map_err(|e| CacheError::Io {
                path: self.dir.clone(),
                source: std::io::Error::other(e.to_string()),
            })?
    }

    fn put_by_key(&self, key: &str, text: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key);

        fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let serialized = serde_json::to_vec_pretty(&CacheEntry {
            text: text.to_string(),
        })
        .map_err(|e| CacheError::Malformed {
            path: path.clone(),
            detail: e.to_string(),
        })?;

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let temp_path = self.dir.join(format!(
            "{}.tmp.{}.{:?}.{}",
            key,
            std::process::id(),
            std::thread::current().id(),
            timestamp
        ));

        fs::write(&temp_path, &serialized).map_err(|source| CacheError::Io {
            path: temp_path.clone(),
            source,
        })?;
        fs::rename(&temp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&temp_path);
            CacheError::Io {
                path: path.clone(),
                source,
            }
        })?;

        debug!("OCR cache write: {}", path.display());
        Ok(())
    }

    /// Remove every entry. Missing directory is not an error.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.entry_paths()? {
            if fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<OcrCacheStats, CacheError> {
        let mut stats = OcrCacheStats::default();
        for path in self.entry_paths()? {
            stats.entries += 1;
            if let Ok(meta) = fs::metadata(&path) {
                stats.total_bytes += meta.len();
            }
        }
        Ok(stats)
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>, CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };
        Ok(entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == ENTRY_EXT))
            .collect())
    }
}
