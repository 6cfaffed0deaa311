//! Persistent, fingerprint-validated index of GRIB2 archives.

use std::fs;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use grib2_parser::{scan_file, MessageDescriptor};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{IndexError, Result};
use crate::fingerprint::{Fingerprint, FingerprintMethod};

/// Default number of indices kept in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 64;

/// Environment variable overriding the default index directory.
pub const INDEX_DIR_ENV: &str = "GRIB_INDEX_DIR";

/// Ordered message descriptors of one source archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileIndex {
    pub source: PathBuf,
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<MessageDescriptor>,
}

impl FileIndex {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Index store statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Full archive scans performed.
    pub scans: u64,
    /// Indices loaded from disk with a matching fingerprint.
    pub disk_hits: u64,
    /// Indices served from the in-memory layer.
    pub memory_hits: u64,
    /// Persisted indices found stale or unreadable.
    pub rebuilds: u64,
}

/// Reuses per-file indices across runs.
///
/// Index files are written to a temporary file in the index directory and
/// renamed into place, so concurrent readers only ever see complete files.
pub struct IndexStore {
    dir: PathBuf,
    method: FingerprintMethod,
    memory: Mutex<LruCache<PathBuf, Arc<FileIndex>>>,
    scans: AtomicU64,
    disk_hits: AtomicU64,
    memory_hits: AtomicU64,
    rebuilds: AtomicU64,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>, method: FingerprintMethod) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self::with_capacity(dir, method, capacity)
    }

    pub fn with_capacity(dir: impl Into<PathBuf>, method: FingerprintMethod, capacity: NonZeroUsize) -> Self {
        Self {
            dir: dir.into(),
            method,
            memory: Mutex::new(LruCache::new(capacity)),
            scans: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            memory_hits: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// `$GRIB_INDEX_DIR`, else `~/.gribindex`.
    pub fn default_dir() -> PathBuf {
        match std::env::var(INDEX_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(shellexpand::tilde(&dir).as_ref()),
            _ => PathBuf::from(shellexpand::tilde("~/.gribindex").as_ref()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn method(&self) -> FingerprintMethod {
        self.method
    }

    /// Return the index of `path`, scanning the archive only when no valid
    /// index exists.
    pub fn get_or_build(&self, path: &Path) -> Result<Arc<FileIndex>> {
        let fingerprint = Fingerprint::compute(path, self.method)?;

        if let Some(index) = self.memory_lookup(path, &fingerprint) {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            debug!(file = %path.display(), "Index served from memory");
            return Ok(index);
        }

        let index_path = self.index_path(path);
        match self.load(&index_path) {
            Ok(Some(index)) if index.fingerprint == fingerprint && index.source == path => {
                self.disk_hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    file = %path.display(),
                    index = %index_path.display(),
                    messages = index.len(),
                    "Index loaded from disk"
                );
                let index = Arc::new(index);
                self.remember(path, index.clone());
                return Ok(index);
            }
            Ok(Some(_)) => {
                self.rebuilds.fetch_add(1, Ordering::Relaxed);
                info!(file = %path.display(), "Source changed, rebuilding index");
            }
            Ok(None) => {}
            Err(e) => {
                self.rebuilds.fetch_add(1, Ordering::Relaxed);
                warn!(
                    file = %path.display(),
                    index = %index_path.display(),
                    error = %e,
                    "Unreadable index, rebuilding"
                );
            }
        }

        let index = Arc::new(self.build(path, fingerprint)?);
        if let Err(e) = self.persist(&index_path, &index) {
            warn!(
                file = %path.display(),
                index = %index_path.display(),
                error = %e,
                "Failed to persist index"
            );
        }
        self.remember(path, index.clone());
        Ok(index)
    }

    /// Delete the persisted and in-memory index of one source file.
    ///
    /// Returns whether a persisted index existed.
    pub fn remove(&self, path: &Path) -> Result<bool> {
        if let Ok(mut memory) = self.memory.lock() {
            memory.pop(path);
        }
        let index_path = self.index_path(path);
        match fs::remove_file(&index_path) {
            Ok(()) => {
                info!(index = %index_path.display(), "Removed index");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(IndexError::io(index_path, e)),
        }
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            scans: self.scans.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
        }
    }

    /// Location of the persisted index for a source file.
    ///
    /// The file name carries a hash of the full source path so that
    /// same-named archives in different directories never collide.
    pub fn index_path(&self, source: &Path) -> PathBuf {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let hash = crc32fast::hash(source.to_string_lossy().as_bytes());
        self.dir.join(format!("{}-{:08x}.idx.json", name, hash))
    }

    fn build(&self, path: &Path, fingerprint: Fingerprint) -> Result<FileIndex> {
        let messages = scan_file(path).map_err(|source| IndexError::Scan {
            path: path.to_path_buf(),
            source,
        })?;
        self.scans.fetch_add(1, Ordering::Relaxed);
        info!(
            file = %path.display(),
            messages = messages.len(),
            "Indexed GRIB2 archive"
        );

        Ok(FileIndex {
            source: path.to_path_buf(),
            fingerprint,
            created_at: Utc::now(),
            messages,
        })
    }

    fn load(&self, index_path: &Path) -> Result<Option<FileIndex>> {
        let bytes = match fs::read(index_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IndexError::io(index_path, e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn persist(&self, index_path: &Path, index: &FileIndex) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| IndexError::io(&self.dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| IndexError::io(&self.dir, e))?;
        serde_json::to_writer(&mut tmp, index)?;
        tmp.flush().map_err(|e| IndexError::io(tmp.path(), e))?;
        tmp.persist(index_path)
            .map_err(|e| IndexError::io(index_path, e.error))?;
        Ok(())
    }

    fn memory_lookup(&self, path: &Path, fingerprint: &Fingerprint) -> Option<Arc<FileIndex>> {
        let mut memory = self.memory.lock().ok()?;
        match memory.get(path) {
            Some(index) if &index.fingerprint == fingerprint => Some(index.clone()),
            Some(_) => {
                memory.pop(path);
                None
            }
            None => None,
        }
    }

    fn remember(&self, path: &Path, index: Arc<FileIndex>) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.put(path.to_path_buf(), index);
        }
    }
}
