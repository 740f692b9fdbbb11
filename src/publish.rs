//! Manifest and page publishing.
//!
//! The final stage of every album sync. Both documents are rebuilt from the
//! scanned [`Album`] and uploaded only when they differ from what is
//! published:
//!
//! - **Manifest** (`index.json`): the content hash is recorded in the
//!   object's `index-hash` metadata and compared through a `HEAD`.
//! - **Page** (`index.html`): the MD5 of the rendered bytes is compared with
//!   the remote object's own fingerprint.
//!
//! The two checks are independent and run concurrently.
//!
//! ## Manifest Format
//!
//! ```json
//! {
//!   "images": [
//!     {"full": "a.jpg", "thumb": "a_thumb_3fa9c1.jpg", "medium": "a_medium_0b77e2.jpg"}
//!   ],
//!   "subdirectories": [{"path": "day1/"}]
//! }
//! ```
//!
//! Images are ordered by file name, sub-directories by path. The content
//! hash covers a format version tag, every image name, every derived name
//! and every sub-directory path, in that fixed order.
//!
//! Support files (viewer scripts, stylesheets) are published once per run to
//! the artifact root by [`publish_support_files`].

use crate::config::{KindConfig, PageConfig};
use crate::error::Result;
use crate::scan::{Album, Layout, MANIFEST_NAME};
use crate::store::{INDEX_HASH_METADATA, ObjectStore, PutOptions, StoreError, content_fingerprint};
use bytes::Bytes;
use maud::{DOCTYPE, PreEscaped, html};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bumped whenever the manifest layout changes, forcing a republish.
pub const MANIFEST_VERSION: &str = "1";

pub const MANIFEST_CONTENT_TYPE: &str = "application/json;charset=UTF-8";
pub const PAGE_CONTENT_TYPE: &str = "text/html;charset=UTF-8";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestImage {
    pub full: String,
    /// Kind name → derived artifact name.
    #[serde(flatten)]
    pub derived: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestDir {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub images: Vec<ManifestImage>,
    pub subdirectories: Vec<ManifestDir>,
    #[serde(skip)]
    pub content_hash: String,
}

impl Manifest {
    pub fn build(album: &Album) -> Self {
        let mut images: Vec<ManifestImage> = album
            .source_images
            .iter()
            .map(|image| ManifestImage {
                full: image.name.clone(),
                derived: image.derived.iter().cloned().collect(),
            })
            .collect();
        images.sort_by(|a, b| a.full.cmp(&b.full));

        let mut subdirectories: Vec<ManifestDir> = album
            .subdirectories
            .iter()
            .map(|path| ManifestDir { path: path.clone() })
            .collect();
        subdirectories.sort_by(|a, b| a.path.cmp(&b.path));

        let content_hash = manifest_hash(&images, &subdirectories);
        Self {
            images,
            subdirectories,
            content_hash,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn manifest_hash(images: &[ManifestImage], subdirectories: &[ManifestDir]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(MANIFEST_VERSION.as_bytes());
    hasher.update(b"\n");
    for image in images {
        hasher.update(b"i\0");
        hasher.update(image.full.as_bytes());
        for (kind, name) in &image.derived {
            hasher.update(b"\0");
            hasher.update(kind.as_bytes());
            hasher.update(b"=");
            hasher.update(name.as_bytes());
        }
        hasher.update(b"\n");
    }
    for dir in subdirectories {
        hasher.update(b"d\0");
        hasher.update(dir.path.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Page title: the album directory's base name.
fn page_title(prefix: &str, album: &str) -> String {
    let full = format!("{prefix}{album}");
    full.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("Gallery")
        .to_string()
}

/// Script URL as seen from an album page: relative names climb back to the
/// artifact root, absolute URLs are kept.
fn script_src(script: &str, depth: usize) -> String {
    if script.starts_with("http://") || script.starts_with("https://") {
        script.to_string()
    } else {
        format!("{}{}", "../".repeat(depth), script)
    }
}

/// Render the album page.
pub fn render_page(prefix: &str, album: &str, kinds: &[KindConfig], page: &PageConfig) -> String {
    let depth = album.split('/').filter(|s| !s.is_empty()).count();
    let kind_config: serde_json::Map<String, serde_json::Value> = kinds
        .iter()
        .map(|k| {
            (
                k.name.clone(),
                json!({"width": k.width, "height": k.height, "fit": k.fit}),
            )
        })
        .collect();
    let config = json!({"kinds": kind_config, "manifest": MANIFEST_NAME});
    // Keep "</script>" inside string values from closing the element.
    let config_js = format!("var config = {};", config).replace("</", "<\\/");

    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, minimum-scale=1.0, maximum-scale=1.0";
                title { (page_title(prefix, album)) }
            }
            body {
                noscript { "JavaScript required." }
                script { (PreEscaped(config_js)) }
                @for script in &page.scripts {
                    script src=(script_src(script, depth)) {}
                }
            }
        }
    }
    .into_string()
}

/// Upload the album's manifest unless the published one has the same hash.
/// Returns whether an upload happened.
pub async fn publish_manifest(
    store: &dyn ObjectStore,
    layout: &Layout,
    album: &Album,
    cache_control: &str,
) -> Result<bool> {
    let manifest = Manifest::build(album);
    let key = layout.manifest_key(&album.path);

    match store.head(&key).await {
        Ok(meta) if meta.metadata.get(INDEX_HASH_METADATA) == Some(&manifest.content_hash) => {
            debug!(key, "Manifest up to date");
            return Ok(false);
        }
        Ok(_) | Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    info!("Updating manifest..");
    let options = PutOptions::reduced(MANIFEST_CONTENT_TYPE)
        .with_cache_control(cache_control)
        .with_metadata(INDEX_HASH_METADATA, &manifest.content_hash);
    store
        .put_bytes(&key, Bytes::from(manifest.to_bytes()?), options)
        .await?;
    Ok(true)
}

/// Upload the album page unless the published bytes are identical.
/// Returns whether an upload happened.
pub async fn publish_page(
    store: &dyn ObjectStore,
    layout: &Layout,
    album: &Album,
    html: String,
) -> Result<bool> {
    let key = layout.page_key(&album.path);
    let fingerprint = content_fingerprint(html.as_bytes());

    match store.head(&key).await {
        Ok(meta) if meta.fingerprint == fingerprint => {
            debug!(key, "Page up to date");
            return Ok(false);
        }
        Ok(_) | Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    info!("Updating page..");
    store
        .put_bytes(&key, Bytes::from(html), PutOptions::reduced(PAGE_CONTENT_TYPE))
        .await?;
    Ok(true)
}

pub fn support_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("html") => "text/html;charset=UTF-8",
        Some("json") => MANIFEST_CONTENT_TYPE,
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Upload each local support file to the artifact root unless the remote
/// copy has the same MD5. Returns the uploaded keys.
pub async fn publish_support_files(
    store: &dyn ObjectStore,
    layout: &Layout,
    files: &[PathBuf],
) -> Result<Vec<String>> {
    let mut uploaded = Vec::new();
    for file in files {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let key = format!("{}{}", layout.artifact_root(), name);
        let local = tokio::fs::read(file).await?;

        match store.head(&key).await {
            Ok(meta) if meta.fingerprint == content_fingerprint(&local) => {
                debug!(key, "Support file up to date");
                continue;
            }
            Ok(_) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        info!("Uploading {}...", name);
        store
            .put_file(&key, file, PutOptions::reduced(support_content_type(file)))
            .await?;
        uploaded.push(key);
    }
    Ok(uploaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::scan::SourceImage;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use tempfile::TempDir;

    fn image(name: &str, thumb: &str) -> SourceImage {
        SourceImage {
            key: format!("2024/trip/{name}"),
            name: name.to_string(),
            fingerprint: "fp".into(),
            last_modified: Utc::now(),
            local_cache_path: PathBuf::from("/scratch/fp.jpg"),
            derived: vec![("thumb".to_string(), thumb.to_string())],
        }
    }

    fn album(images: Vec<SourceImage>, subdirs: &[&str]) -> Album {
        Album {
            path: "2024/trip/".into(),
            source_images: images,
            subdirectories: subdirs.iter().map(|s| s.to_string()).collect(),
            ..Album::default()
        }
    }

    fn layout() -> Layout {
        Layout::new(&SyncConfig::stock().store)
    }

    // =========================================================================
    // Manifest
    // =========================================================================

    #[test]
    fn manifest_json_shape() {
        let a = album(vec![image("a.jpg", "a_thumb_111111.jpg")], &["day1/"]);
        let manifest = Manifest::build(&a);
        let value: serde_json::Value = serde_json::from_slice(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "images": [{"full": "a.jpg", "thumb": "a_thumb_111111.jpg"}],
                "subdirectories": [{"path": "day1/"}]
            })
        );
    }

    #[test]
    fn manifest_hash_is_order_independent() {
        let one = album(
            vec![image("a.jpg", "a_thumb_1.jpg"), image("b.jpg", "b_thumb_2.jpg")],
            &["x/", "y/"],
        );
        let two = album(
            vec![image("b.jpg", "b_thumb_2.jpg"), image("a.jpg", "a_thumb_1.jpg")],
            &["y/", "x/"],
        );
        assert_eq!(Manifest::build(&one), Manifest::build(&two));
    }

    #[test]
    fn manifest_hash_tracks_content() {
        let base = Manifest::build(&album(vec![image("a.jpg", "a_thumb_1.jpg")], &[]));
        let renamed = Manifest::build(&album(vec![image("a.jpg", "a_thumb_2.jpg")], &[]));
        let with_dir = Manifest::build(&album(vec![image("a.jpg", "a_thumb_1.jpg")], &["x/"]));
        assert_ne!(base.content_hash, renamed.content_hash);
        assert_ne!(base.content_hash, with_dir.content_hash);
        assert_eq!(base.content_hash.len(), 64);
    }

    #[test]
    fn empty_album_has_well_formed_manifest() {
        let manifest = Manifest::build(&album(vec![], &[]));
        let value: serde_json::Value = serde_json::from_slice(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(value, json!({"images": [], "subdirectories": []}));
    }

    #[tokio::test]
    async fn manifest_uploaded_once_then_skipped() {
        let store = MemoryStore::new();
        let a = album(vec![image("a.jpg", "a_thumb_1.jpg")], &[]);

        assert!(publish_manifest(&store, &layout(), &a, "max-age=3600").await.unwrap());
        assert!(!publish_manifest(&store, &layout(), &a, "max-age=3600").await.unwrap());
        assert_eq!(store.counts().put_bytes, 1);

        let options = store.put_options("thumbs/2024/trip/index.json").unwrap();
        assert_eq!(options.cache_control.as_deref(), Some("max-age=3600"));
        assert_eq!(options.content_type.as_deref(), Some(MANIFEST_CONTENT_TYPE));
        assert_eq!(
            options.metadata.get(INDEX_HASH_METADATA),
            Some(&Manifest::build(&a).content_hash)
        );
    }

    #[tokio::test]
    async fn manifest_head_failure_is_not_an_upload() {
        let store = MemoryStore::new();
        store.fail_on("thumbs/2024/trip/index.json");
        let a = album(vec![], &[]);
        assert!(publish_manifest(&store, &layout(), &a, "max-age=3600").await.is_err());
        assert_eq!(store.counts().put_bytes, 0);
    }

    // =========================================================================
    // Page
    // =========================================================================

    #[test]
    fn page_contents() {
        let config = SyncConfig::stock();
        let mut page = config.page.clone();
        page.scripts.push("https://cdn.example.com/x.js".into());
        let html = render_page("photos/", "2024/<trip>/", &config.kinds, &page);

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>&lt;trip&gt;</title>"));
        assert!(html.contains("<noscript>"));
        assert!(html.contains("var config = {"));
        assert!(html.contains("\"manifest\":\"index.json\""));
        assert!(html.contains(r#"src="../../gallery.js""#));
        assert!(html.contains(r#"src="https://cdn.example.com/x.js""#));
    }

    #[test]
    fn root_page_scripts_are_local() {
        let config = SyncConfig::stock();
        let html = render_page("", "", &config.kinds, &config.page);
        assert!(html.contains(r#"src="gallery.js""#));
        assert!(html.contains("<title>Gallery</title>"));
    }

    #[tokio::test]
    async fn page_uploaded_only_when_bytes_change() {
        let store = MemoryStore::new();
        let a = album(vec![], &[]);

        assert!(publish_page(&store, &layout(), &a, "<p>one</p>".into()).await.unwrap());
        assert!(!publish_page(&store, &layout(), &a, "<p>one</p>".into()).await.unwrap());
        assert!(publish_page(&store, &layout(), &a, "<p>two</p>".into()).await.unwrap());
        assert_eq!(store.counts().put_bytes, 2);
        assert_eq!(
            store.put_options("thumbs/2024/trip/index.html").unwrap().content_type.as_deref(),
            Some(PAGE_CONTENT_TYPE)
        );
    }

    // =========================================================================
    // Support files
    // =========================================================================

    #[tokio::test]
    async fn support_files_upload_when_changed() {
        let tmp = TempDir::new().unwrap();
        let js = tmp.path().join("gallery.js");
        let css = tmp.path().join("plain.css");
        std::fs::write(&js, "console.log(1)").unwrap();
        std::fs::write(&css, "body {}").unwrap();
        let store = MemoryStore::new();
        store.insert("thumbs/plain.css", "body {}");

        let files = vec![js.clone(), css];
        let uploaded = publish_support_files(&store, &layout(), &files).await.unwrap();
        assert_eq!(uploaded, ["thumbs/gallery.js"]);
        assert_eq!(
            store.put_options("thumbs/gallery.js").unwrap().content_type.as_deref(),
            Some("application/javascript")
        );

        std::fs::write(&js, "console.log(2)").unwrap();
        let uploaded = publish_support_files(&store, &layout(), &files).await.unwrap();
        assert_eq!(uploaded, ["thumbs/gallery.js"]);
        let uploaded = publish_support_files(&store, &layout(), &files).await.unwrap();
        assert!(uploaded.is_empty());
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(support_content_type(Path::new("a.CSS")), "text/css");
        assert_eq!(support_content_type(Path::new("a.bin")), "application/octet-stream");
        assert_eq!(support_content_type(Path::new("Makefile")), "application/octet-stream");
    }
}
