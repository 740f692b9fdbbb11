//! Local scratch space: the source download cache and temporaries.
//!
//! Source images are downloaded once and kept in the scratch directory under
//! their content fingerprint:
//!
//! ```text
//! .gallery-sync/
//! ├── 0cc175b9c0f1b6a831c399e269772661.jpg   ← cached source, named by fingerprint
//! ├── 92eb5ffee6ae2fec3ad71c777531578f.png
//! └── tmp_Xk3aQ9.jpg                          ← in-progress download or transform output
//! ```
//!
//! # Design
//!
//! The cache is **content-addressed**. A renamed or moved source maps to the
//! same cache file, so it is never downloaded again, and two different
//! images can never share a cache path. Concurrent writers of the same file
//! would write identical bytes.
//!
//! Downloads stream into a `tmp_*` file which is renamed into place once
//! complete, so a cache file either exists in full or not at all. Within a
//! run, concurrent requests for the same fingerprint are serialized on a
//! per-fingerprint gate: the first one downloads, the rest find the file.
//!
//! Temporaries are deleted when their handle drops. Anything left behind by
//! a killed process is removed by [`ScratchSpace::sweep_temporaries`] at the
//! next startup.

use crate::config::ConfigError;
use crate::error::{Result, SyncError};
use crate::executor::run_bounded;
use crate::store::ObjectStore;
use futures::StreamExt;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tempfile::{Builder, TempPath};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// File name prefix of every temporary in the scratch directory.
pub const TEMP_PREFIX: &str = "tmp_";

/// Cache file name for a source: `<fingerprint><.ext>` with the source's
/// extension lower-cased.
pub fn cache_file_name(fingerprint: &str, source_key: &str) -> String {
    let file = source_key.rsplit('/').next().unwrap_or(source_key);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!("{}.{}", fingerprint, ext.to_ascii_lowercase())
        }
        _ => fingerprint.to_string(),
    }
}

pub fn is_temporary(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Download and cache-hit counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub downloads: usize,
    pub hits: usize,
    pub bytes: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} downloaded ({} bytes), {} cached",
            self.downloads, self.bytes, self.hits
        )
    }
}

pub struct ScratchSpace {
    dir: PathBuf,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    downloads: AtomicUsize,
    hits: AtomicUsize,
    bytes: AtomicU64,
}

impl ScratchSpace {
    /// Use `dir` as scratch space, creating it if missing.
    ///
    /// An existing non-directory at `dir` is a configuration error.
    pub async fn prepare(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(SyncError::Config(ConfigError::Validation(format!(
                    "scratch dir {} is not a directory",
                    dir.display()
                ))));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&dir).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            dir,
            gates: Mutex::new(HashMap::new()),
            downloads: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            bytes: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local cache path of a source with the given fingerprint.
    pub fn cache_path(&self, fingerprint: &str, source_key: &str) -> PathBuf {
        self.dir.join(cache_file_name(fingerprint, source_key))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            downloads: self.downloads.load(Ordering::SeqCst),
            hits: self.hits.load(Ordering::SeqCst),
            bytes: self.bytes.load(Ordering::SeqCst),
        }
    }

    fn gate(&self, fingerprint: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(gates.entry(fingerprint.to_string()).or_default())
    }

    /// Make sure `path` holds the object at `key`, downloading it if needed.
    ///
    /// Returns whether a download happened.
    pub async fn ensure_cached(
        &self,
        store: &dyn ObjectStore,
        key: &str,
        fingerprint: &str,
        path: &Path,
    ) -> Result<bool> {
        let gate = self.gate(fingerprint);
        let result = {
            let _guard = gate.lock().await;
            self.fill(store, key, path).await
        };
        self.release(fingerprint, gate);
        result
    }

    async fn fill(&self, store: &dyn ObjectStore, key: &str, path: &Path) -> Result<bool> {
        if tokio::fs::try_exists(path).await? {
            self.hits.fetch_add(1, Ordering::SeqCst);
            return Ok(false);
        }
        self.download(store, key, path).await?;
        Ok(true)
    }

    /// Drop the gate for `fingerprint` once nobody else holds it.
    fn release(&self, fingerprint: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&gate) == 2 {
            gates.remove(fingerprint);
        }
    }

    #[cfg(test)]
    fn open_gates(&self) -> usize {
        self.gates.lock().unwrap().len()
    }

    async fn download(&self, store: &dyn ObjectStore, key: &str, path: &Path) -> Result<()> {
        let (file, temp_path) = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        debug!(key, "Downloading");
        let mut body = store.get(key).await?;
        let mut received: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            debug!(key, received, "Received chunk");
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        temp_path.persist(path).map_err(|e| SyncError::Io(e.error))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(received, Ordering::SeqCst);
        debug!(key, bytes = received, path = %path.display(), "Cached source");
        Ok(())
    }

    /// A fresh, empty temporary `.jpg` in the scratch directory. Deleted
    /// when the returned handle drops.
    pub fn temp_output(&self) -> io::Result<TempPath> {
        Ok(Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".jpg")
            .tempfile_in(&self.dir)?
            .into_temp_path())
    }

    /// Delete stray temporaries left by an interrupted run.
    pub async fn sweep_temporaries(&self, limit: usize) -> Result<usize> {
        let mut garbage = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_str().is_some_and(is_temporary) && entry.file_type().await?.is_file() {
                garbage.push(entry.path());
            }
        }

        let removed = run_bounded(garbage, limit, |path| async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed stray temporary");
                    Ok(1)
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
                Err(e) => Err(SyncError::Io(e)),
            }
        })
        .await?;
        Ok(removed.into_iter().sum())
    }
}
