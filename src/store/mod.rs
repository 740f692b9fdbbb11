//! Object-store collaborator.
//!
//! The sync engine never talks to a concrete storage service directly. Every
//! remote operation goes through the [`ObjectStore`] trait, which models the
//! small S3-like surface the engine needs:
//!
//! | Operation | Used by |
//! |---|---|
//! | `list_page` (prefix + delimiter + marker) | [`listing`](crate::listing) |
//! | `head` | manifest/page/support-file idempotency checks |
//! | `get` (byte stream) | source downloads into the scratch cache |
//! | `put_bytes` / `put_file` | manifest, page, derived artifacts |
//! | `delete` | orphaned artifact removal |
//!
//! Two backends ship with the crate:
//!
//! - [`FilesystemStore`]: a local directory treated as a bucket, with JSON
//!   sidecars for object metadata. Used by the CLI.
//! - [`MemoryStore`]: an instrumented in-memory bucket with a deterministic
//!   clock, per-operation counters and failure injection. Used by tests.
//!
//! ## Fingerprints
//!
//! A fingerprint is the store's opaque content hash (an ETag on S3). Stores
//! hand them out quoted and in arbitrary case; [`normalize_fingerprint`]
//! strips quotes and lower-cases so the engine can compare them as plain
//! strings. Both bundled backends use the MD5 of the object body, matching
//! what S3 reports for single-part uploads.

pub mod fs;
pub mod memory;

pub use fs::FilesystemStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;
use thiserror::Error;

/// Metadata key under which the manifest's content hash is recorded.
pub const INDEX_HASH_METADATA: &str = "index-hash";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata error for {key}: {reason}")]
    Metadata { key: String, reason: String },
    #[error("request failed for {key}: {reason}")]
    Request { key: String, reason: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A boxed stream of body chunks returned by [`ObjectStore::get`].
pub type ByteStream = Pin<Box<dyn Stream<Item = StoreResult<Bytes>> + Send>>;

/// Snapshot of one object as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    /// Normalized content fingerprint (see [`normalize_fingerprint`]).
    pub fingerprint: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// One page of a delimiter listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<RemoteObject>,
    /// Full keys of the "sub-directories", each ending in the delimiter.
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Marker to pass to the next request when `is_truncated` is set.
    pub next_marker: Option<String>,
}

/// Result of a `HEAD` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub fingerprint: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Acl {
    Private,
    #[default]
    PublicRead,
}

/// Durability hint. Derived artifacts are cheap to regenerate and are written
/// with [`StorageClass::ReducedRedundancy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    #[default]
    Standard,
    ReducedRedundancy,
}

/// Headers attached to an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub acl: Acl,
    pub content_type: Option<String>,
    pub storage_class: StorageClass,
    pub cache_control: Option<String>,
    /// Custom metadata (`x-amz-meta-*` on S3).
    pub metadata: BTreeMap<String, String>,
}

impl PutOptions {
    /// Public, reduced-redundancy upload with the given content type.
    pub fn reduced(content_type: &str) -> Self {
        Self {
            acl: Acl::PublicRead,
            content_type: Some(content_type.to_string()),
            storage_class: StorageClass::ReducedRedundancy,
            cache_control: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_cache_control(mut self, value: &str) -> Self {
        self.cache_control = Some(value.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// The remote object store the engine synchronizes against.
///
/// Implementations must not retry on their own behalf; transient failures are
/// surfaced and a rerun of the engine is the recovery path.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch one page of a listing. Keys after `marker` only.
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
    ) -> StoreResult<ListPage>;

    /// Object metadata. Missing objects yield [`StoreError::NotFound`].
    async fn head(&self, key: &str) -> StoreResult<ObjectMeta>;

    /// Object body as a stream of chunks.
    async fn get(&self, key: &str) -> StoreResult<ByteStream>;

    async fn put_bytes(&self, key: &str, data: Bytes, options: PutOptions) -> StoreResult<()>;

    async fn put_file(&self, key: &str, path: &Path, options: PutOptions) -> StoreResult<()>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Short identifier for logs.
    fn backend_name(&self) -> &'static str;
}

/// Strip quotes and lower-case a store-supplied fingerprint.
pub fn normalize_fingerprint(raw: &str) -> String {
    raw.replace('"', "").trim().to_ascii_lowercase()
}

/// MD5 of a byte slice as lower-case hex, i.e. the fingerprint a single-part
/// S3 upload of these bytes would report.
pub fn content_fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Reject keys that could escape a backend's namespace.
pub(crate) fn ensure_key_safe(key: &str) -> StoreResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == "..")
        || key.bytes().any(|b| b.is_ascii_control() || b == b'\\')
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
