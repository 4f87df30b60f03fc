//! Byte sinks and the per-request scratch directory.
//!
//! Extracted images are written through a [`ByteSink`] and read back by the
//! OCR stage. The default [`FsByteSink`] writes into a [`ScratchDir`]: a
//! `tempfile::TempDir` with a random name, owned by exactly one conversion
//! and removed when it is dropped, whichever way the conversion exits.
//!
//! While its guard is alive a scratch directory holds an exclusive lock on
//! a `.lock` file inside it. [`sweep_stale`] never removes a directory whose
//! lock is held, however old its mtime. Kept directories are renamed to
//! [`KEPT_PREFIX`] so the sweep never matches them again.

use std::collections::HashMap;
use std::fs::{File, TryLockError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Prefix of every scratch directory name; the stale sweep only touches these.
pub const SCRATCH_PREFIX: &str = "scribe-";

/// Prefix a scratch directory is renamed to when its images are kept.
pub const KEPT_PREFIX: &str = "kept-";

/// Marker file locked by the owning conversion.
const LOCK_FILE: &str = ".lock";

/// Where extracted image bytes are persisted.
pub trait ByteSink: Send + Sync {
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Plain filesystem sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsByteSink;

impl ByteSink for FsByteSink {
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        std::fs::write(path, bytes)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// In-memory sink, for callers that never want images on disk.
#[derive(Debug, Default)]
pub struct MemoryByteSink {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryByteSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteSink for MemoryByteSink {
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| io::Error::other("memory sink poisoned"))?;
        files.insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let files = self
            .files
            .lock()
            .map_err(|_| io::Error::other("memory sink poisoned"))?;
        files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not in memory sink", path.display()),
            )
        })
    }
}

/// A uniquely named directory owned by one conversion.
#[derive(Debug)]
pub struct ScratchDir {
    // Dropped before `dir` so the lock is released before removal.
    lock: File,
    dir: TempDir,
}

impl ScratchDir {
    /// Create `root/scribe-<random>`, creating `root` if needed, and lock it.
    pub fn create_in(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(root)?;
        let lock = File::create(dir.path().join(LOCK_FILE))?;
        lock.lock()?;
        debug!("Created scratch dir {}", dir.path().display());
        Ok(Self { lock, dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Detach the directory from its guard so it survives this request.
    ///
    /// The directory is unlocked and renamed from `scribe-<random>` to
    /// `kept-<random>`. If the rename fails the original path is returned.
    pub fn persist(self) -> PathBuf {
        let Self { lock, dir } = self;
        drop(lock);
        let path = dir.keep();
        if let Err(e) = std::fs::remove_file(path.join(LOCK_FILE)) {
            debug!("Could not remove lock file in {}: {}", path.display(), e);
        }

        let Some(kept) = kept_name(&path) else {
            return path;
        };
        match std::fs::rename(&path, &kept) {
            Ok(()) => kept,
            Err(e) => {
                warn!(
                    "Failed to rename kept scratch dir {} to {}: {}",
                    path.display(),
                    kept.display(),
                    e
                );
                path
            }
        }
    }
}

/// `root/scribe-<random>` → `root/kept-<random>`.
fn kept_name(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let suffix = name.strip_prefix(SCRATCH_PREFIX)?;
    Some(path.with_file_name(format!("{KEPT_PREFIX}{suffix}")))
}

/// Whether a live [`ScratchDir`] guard holds `dir`'s lock.
fn is_locked(dir: &Path) -> bool {
    let Ok(file) = File::open(dir.join(LOCK_FILE)) else {
        return false;
    };
    match file.try_lock() {
        Ok(()) => false,
        Err(TryLockError::WouldBlock) => true,
        Err(TryLockError::Error(e)) => {
            debug!("Cannot probe lock in {}: {}", dir.display(), e);
            true
        }
    }
}

/// Remove scratch directories under `root` last modified before `max_age` ago.
///
/// Leftovers come from processes that were killed before their guards ran.
/// Only unlocked entries named with [`SCRATCH_PREFIX`] are considered.
/// Returns the number of directories removed; failures are logged and
/// skipped.
pub fn sweep_stale(root: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(SCRATCH_PREFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_dir() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }
        if is_locked(&entry.path()) {
            debug!("Skipping live scratch dir {}", entry.path().display());
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                debug!("Removed stale scratch dir {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!(
                "Failed to remove stale scratch dir {}: {}",
                entry.path().display(),
                e
            ),
        }
    }

    removed
}
