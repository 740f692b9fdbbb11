//! Local-directory object store.
//!
//! Treats a directory as a bucket: the key `2024/trip/a.jpg` lives at
//! `<root>/2024/trip/a.jpg`. Upload headers that a filesystem cannot hold
//! (fingerprint, content type, storage class, custom metadata) are kept in a
//! JSON sidecar at `<root>/.meta/<key>.json`.
//!
//! ```text
//! bucket/
//! ├── .meta/                        # sidecars, never listed
//! │   └── thumbs/2024/index.json.json
//! ├── 2024/
//! │   └── a.jpg
//! └── thumbs/
//!     └── 2024/
//!         ├── a_thumb_3f9c1e.jpg
//!         └── index.json
//! ```
//!
//! Writes land in a uniquely named dot-file next to their destination and are
//! renamed into place, so listings never see a partial object. Dot-files are
//! excluded from listings altogether.
//!
//! Objects copied into the directory by hand have no sidecar; their
//! fingerprint is computed from the content on demand.

use super::{
    Acl, ByteStream, ListPage, ObjectMeta, ObjectStore, PutOptions, RemoteObject, StorageClass,
    StoreError, StoreResult, content_fingerprint, ensure_key_safe,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use uuid::Uuid;
use walkdir::WalkDir;

const META_DIR: &str = ".meta";
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Sidecar contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    fingerprint: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    acl: Acl,
    #[serde(default)]
    storage_class: StorageClass,
    #[serde(default)]
    cache_control: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

pub struct FilesystemStore {
    root: PathBuf,
    page_size: usize,
}

impl FilesystemStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        ensure_key_safe(key)?;
        Ok(self.root.join(key))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{key}.json"))
    }

    async fn read_sidecar(&self, key: &str) -> StoreResult<Option<Sidecar>> {
        match fs::read(self.sidecar_path(key)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StoreError::Metadata {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fingerprint from the sidecar, falling back to hashing the content.
    async fn fingerprint(&self, key: &str, path: &Path) -> StoreResult<String> {
        if let Some(sidecar) = self.read_sidecar(key).await? {
            return Ok(sidecar.fingerprint);
        }
        let data = fs::read(path).await?;
        Ok(content_fingerprint(&data))
    }

    /// Write `data` under `path` via a temp file + rename.
    async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(".{}.tmp.{}", file_name, Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn store(&self, key: &str, data: &[u8], options: PutOptions) -> StoreResult<()> {
        let path = self.object_path(key)?;
        Self::write_atomic(&path, data).await?;
        let sidecar = Sidecar {
            fingerprint: content_fingerprint(data),
            content_type: options.content_type,
            acl: options.acl,
            storage_class: options.storage_class,
            cache_control: options.cache_control,
            metadata: options.metadata,
        };
        let raw = serde_json::to_vec_pretty(&sidecar).map_err(|e| StoreError::Metadata {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Self::write_atomic(&self.sidecar_path(key), &raw).await
    }

    /// Collect all listable entries under `prefix`, sorted by key.
    ///
    /// Runs on the blocking pool: directory walks are synchronous.
    async fn collect_entries(
        &self,
        prefix: String,
        delimiter: Option<String>,
    ) -> StoreResult<Vec<FsEntry>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_entries(&root, &prefix, delimiter.as_deref()))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

enum FsEntry {
    Object { key: String, path: PathBuf },
    Prefix(String),
}

impl FsEntry {
    fn name(&self) -> &str {
        match self {
            FsEntry::Object { key, .. } => key,
            FsEntry::Prefix(p) => p,
        }
    }
}

/// Relative key of `path` under `root`, with `/` separators.
fn key_for(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn scan_entries(root: &Path, prefix: &str, delimiter: Option<&str>) -> StoreResult<Vec<FsEntry>> {
    // Directory holding the prefix, and the partial name within it.
    let (dir_part, name_part) = match prefix.rfind('/') {
        Some(pos) => (&prefix[..=pos], &prefix[pos + 1..]),
        None => ("", prefix),
    };
    let dir = root.join(dir_part);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    match delimiter {
        Some("/") => {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if is_hidden(&name) || !name.starts_with(name_part) {
                    continue;
                }
                let key = format!("{dir_part}{name}");
                if entry.file_type()?.is_dir() {
                    entries.push(FsEntry::Prefix(format!("{key}/")));
                } else {
                    entries.push(FsEntry::Object {
                        key,
                        path: entry.path(),
                    });
                }
            }
        }
        Some(other) => {
            return Err(StoreError::Request {
                key: prefix.to_string(),
                reason: format!("unsupported delimiter `{other}`"),
            });
        }
        None => {
            let walker = WalkDir::new(&dir)
                .min_depth(1)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(&e.file_name().to_string_lossy()));
            for entry in walker {
                let entry = entry.map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(key) = key_for(root, entry.path()) else {
                    continue;
                };
                if key.starts_with(prefix) {
                    entries.push(FsEntry::Object {
                        key,
                        path: entry.path().to_path_buf(),
                    });
                }
            }
        }
    }
    entries.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(entries)
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
    ) -> StoreResult<ListPage> {
        let entries = self
            .collect_entries(prefix.to_string(), delimiter.map(str::to_string))
            .await?;

        let mut page = ListPage::default();
        let mut remaining = entries
            .into_iter()
            .filter(|e| marker.is_none_or(|m| e.name() > m))
            .peekable();
        let mut last = None;
        for _ in 0..self.page_size {
            let Some(entry) = remaining.next() else {
                break;
            };
            last = Some(entry.name().to_string());
            match entry {
                FsEntry::Prefix(p) => page.common_prefixes.push(p),
                FsEntry::Object { key, path } => {
                    let meta = fs::metadata(&path).await?;
                    let last_modified: DateTime<Utc> = meta.modified()?.into();
                    let fingerprint = self.fingerprint(&key, &path).await?;
                    page.objects.push(RemoteObject {
                        key,
                        fingerprint,
                        last_modified,
                        size: meta.len(),
                    });
                }
            }
        }
        if remaining.peek().is_some() {
            page.is_truncated = true;
            page.next_marker = last;
        }
        debug!(
            objects = page.objects.len(),
            prefixes = page.common_prefixes.len(),
            truncated = page.is_truncated,
            "listed page"
        );
        Ok(page)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StoreResult<ObjectMeta> {
        let path = self.object_path(key)?;
        let meta = match fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(StoreError::NotFound(key.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let sidecar = self.read_sidecar(key).await?;
        let (fingerprint, content_type, metadata) = match sidecar {
            Some(s) => (s.fingerprint, s.content_type, s.metadata),
            None => (
                content_fingerprint(&fs::read(&path).await?),
                None,
                BTreeMap::new(),
            ),
        };
        Ok(ObjectMeta {
            key: key.to_string(),
            fingerprint,
            last_modified: meta.modified()?.into(),
            size: meta.len(),
            content_type,
            metadata,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StoreResult<ByteStream> {
        let path = self.object_path(key)?;
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(StoreError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data, options), fields(backend = "filesystem", size = data.len()))]
    async fn put_bytes(&self, key: &str, data: Bytes, options: PutOptions) -> StoreResult<()> {
        self.store(key, &data, options).await
    }

    #[instrument(skip(self, options), fields(backend = "filesystem"))]
    async fn put_file(&self, key: &str, path: &Path, options: PutOptions) -> StoreResult<()> {
        let data = fs::read(path).await?;
        self.store(key, &data, options).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.object_path(key)?;
        for target in [path, self.sidecar_path(key)] {
            match fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
