//! In-memory object store.
//!
//! Behaves like a bucket with S3 "v1" listing semantics: entries (objects and
//! common prefixes) are returned in key order, at most `page_size` per page,
//! and the last returned entry is the marker for the next page.
//!
//! `lastModified` comes from a logical clock that advances one second per
//! write, so "written later" is always observable even when a whole sync run
//! finishes within the same wall-clock second.
//!
//! Every operation is counted and every write is logged, which is what the
//! idempotency tests assert against.

use super::{
    ByteStream, ListPage, ObjectMeta, ObjectStore, PutOptions, RemoteObject, StoreError,
    StoreResult, content_fingerprint, ensure_key_safe,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    fingerprint: String,
    last_modified: DateTime<Utc>,
    options: PutOptions,
}

/// Counts of calls per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub lists: usize,
    pub heads: usize,
    pub gets: usize,
    pub put_bytes: usize,
    pub put_files: usize,
    pub deletes: usize,
}

impl OpCounts {
    pub fn puts(&self) -> usize {
        self.put_bytes + self.put_files
    }
}

/// A write or delete recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    PutBytes(String),
    PutFile(String),
    Delete(String),
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            WriteOp::PutBytes(k) | WriteOp::PutFile(k) | WriteOp::Delete(k) => k,
        }
    }
}

#[derive(Default)]
struct Counters {
    lists: AtomicUsize,
    heads: AtomicUsize,
    gets: AtomicUsize,
    put_bytes: AtomicUsize,
    put_files: AtomicUsize,
    deletes: AtomicUsize,
}

pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    writes: Mutex<Vec<WriteOp>>,
    failing: Mutex<HashSet<String>>,
    clock: AtomicUsize,
    counters: Counters,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// A store whose listings are split into pages of `page_size` entries.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            clock: AtomicUsize::new(0),
            counters: Counters::default(),
            page_size: page_size.max(1),
        }
    }

    fn tick(&self) -> DateTime<Utc> {
        let n = self.clock.fetch_add(1, Ordering::SeqCst) as i64;
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
            + Duration::seconds(n)
    }

    fn check_failing(&self, key: &str) -> StoreResult<()> {
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.contains(key) {
            return Err(StoreError::Request {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn store(&self, key: &str, body: Bytes, options: PutOptions) {
        let object = StoredObject {
            fingerprint: content_fingerprint(&body),
            body,
            last_modified: self.tick(),
            options,
        };
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), object);
    }

    /// Seed an object without counting it as a write.
    pub fn insert(&self, key: &str, body: impl Into<Bytes>) {
        self.store(key, body.into(), PutOptions::default());
    }

    /// Make every operation touching `key` fail with a request error.
    pub fn fail_on(&self, key: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Remove an object without counting it as a write.
    pub fn remove(&self, key: &str) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn body(&self, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|o| o.body.clone())
    }

    pub fn put_options(&self, key: &str) -> Option<PutOptions> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|o| o.options.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> OpCounts {
        let c = &self.counters;
        OpCounts {
            lists: c.lists.load(Ordering::SeqCst),
            heads: c.heads.load(Ordering::SeqCst),
            gets: c.gets.load(Ordering::SeqCst),
            put_bytes: c.put_bytes.load(Ordering::SeqCst),
            put_files: c.put_files.load(Ordering::SeqCst),
            deletes: c.deletes.load(Ordering::SeqCst),
        }
    }

    /// Writes and deletes in the order they happened.
    pub fn writes(&self) -> Vec<WriteOp> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Forget the write log (counters are kept).
    pub fn clear_writes(&self) {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn record(&self, op: WriteOp) {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).push(op);
    }
}

/// A listing entry, before it is split back into objects and prefixes.
enum Entry {
    Object(RemoteObject),
    Prefix(String),
}

impl Entry {
    fn name(&self) -> &str {
        match self {
            Entry::Object(o) => &o.key,
            Entry::Prefix(p) => p,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
    ) -> StoreResult<ListPage> {
        self.counters.lists.fetch_add(1, Ordering::SeqCst);
        self.check_failing(prefix)?;

        let entries: Vec<Entry> = {
            let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
            let mut prefixes = BTreeSet::new();
            let mut entries = Vec::new();
            for (key, object) in objects.range(prefix.to_string()..) {
                let Some(rest) = key.strip_prefix(prefix) else {
                    break;
                };
                if let Some(delim) = delimiter
                    && let Some(pos) = rest.find(delim)
                {
                    prefixes.insert(format!("{}{}", prefix, &rest[..pos + delim.len()]));
                    continue;
                }
                entries.push(Entry::Object(RemoteObject {
                    key: key.clone(),
                    fingerprint: object.fingerprint.clone(),
                    last_modified: object.last_modified,
                    size: object.body.len() as u64,
                }));
            }
            entries.extend(prefixes.into_iter().map(Entry::Prefix));
            entries.sort_by(|a, b| a.name().cmp(b.name()));
            entries
        };

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
                Entry::Object(o) => page.objects.push(o),
                Entry::Prefix(p) => page.common_prefixes.push(p),
            }
        }
        if remaining.peek().is_some() {
            page.is_truncated = true;
            page.next_marker = last;
        }
        Ok(page)
    }

    async fn head(&self, key: &str) -> StoreResult<ObjectMeta> {
        self.counters.heads.fetch_add(1, Ordering::SeqCst);
        self.check_failing(key)?;
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let object = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            key: key.to_string(),
            fingerprint: object.fingerprint.clone(),
            last_modified: object.last_modified,
            size: object.body.len() as u64,
            content_type: object.options.content_type.clone(),
            metadata: object.options.metadata.clone(),
        })
    }

    async fn get(&self, key: &str) -> StoreResult<ByteStream> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        self.check_failing(key)?;
        let body = self
            .body(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        // Two chunks, so consumers exercise their streaming path.
        let mid = body.len() / 2;
        let chunks = vec![Ok(body.slice(..mid)), Ok(body.slice(mid..))];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn put_bytes(&self, key: &str, data: Bytes, options: PutOptions) -> StoreResult<()> {
        self.counters.put_bytes.fetch_add(1, Ordering::SeqCst);
        ensure_key_safe(key)?;
        self.check_failing(key)?;
        self.store(key, data, options);
        self.record(WriteOp::PutBytes(key.to_string()));
        Ok(())
    }

    async fn put_file(&self, key: &str, path: &Path, options: PutOptions) -> StoreResult<()> {
        self.counters.put_files.fetch_add(1, Ordering::SeqCst);
        ensure_key_safe(key)?;
        self.check_failing(key)?;
        let data = tokio::fs::read(path).await?;
        self.store(key, Bytes::from(data), options);
        self.record(WriteOp::PutFile(key.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_failing(key)?;
        self.remove(key);
        self.record(WriteOp::Delete(key.to_string()));
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn delimiter_listing_splits_objects_and_prefixes() {
        let store = MemoryStore::new();
        store.insert("p/a.jpg", "a");
        store.insert("p/b.jpg", "b");
        store.insert("p/sub/c.jpg", "c");
        store.insert("p/sub/deeper/d.jpg", "d");
        store.insert("q/e.jpg", "e");

        let page = store.list_page("p/", Some("/"), None).await.unwrap();
        let keys: Vec<&str> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["p/a.jpg", "p/b.jpg"]);
        assert_eq!(page.common_prefixes, vec!["p/sub/".to_string()]);
        assert!(!page.is_truncated);
    }

    #[tokio::test]
    async fn pages_use_last_entry_as_marker() {
        let store = MemoryStore::with_page_size(2);
        for name in ["a", "b", "c", "d", "e"] {
            store.insert(&format!("p/{name}.jpg"), name);
        }
        let first = store.list_page("p/", Some("/"), None).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert!(first.is_truncated);
        assert_eq!(first.next_marker.as_deref(), Some("p/b.jpg"));

        let second = store
            .list_page("p/", Some("/"), first.next_marker.as_deref())
            .await
            .unwrap();
        assert_eq!(second.objects[0].key, "p/c.jpg");
    }

    #[tokio::test]
    async fn writes_advance_the_clock() {
        let store = MemoryStore::new();
        store.insert("a", "1");
        store
            .put_bytes("b", Bytes::from_static(b"2"), PutOptions::default())
            .await
            .unwrap();
        let a = store.head("a").await.unwrap();
        let b = store.head("b").await.unwrap();
        assert!(b.last_modified > a.last_modified);
        assert_eq!(store.counts().put_bytes, 1);
        assert_eq!(store.writes(), vec![WriteOp::PutBytes("b".into())]);
    }

    #[tokio::test]
    async fn get_streams_whole_body() {
        let store = MemoryStore::new();
        store.insert("k", "hello world");
        let chunks: Vec<Bytes> = store.get("k").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello world");
    }

    #[tokio::test]
    async fn injected_failures_surface_as_request_errors() {
        let store = MemoryStore::new();
        store.insert("k", "v");
        store.fail_on("k");
        assert!(matches!(
            store.head("k").await,
            Err(StoreError::Request { .. })
        ));
        store.clear_failures();
        assert!(store.head("k").await.is_ok());
    }

    #[tokio::test]
    async fn head_missing_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.head("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
