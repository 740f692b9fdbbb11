//! Album scanning: diff an album's sources against its derived artifacts.
//!
//! Stage 1 of every album sync. Two directory listings (sources and
//! artifacts) are fetched concurrently and turned into an [`Album`], the
//! work plan for the remaining stages. Nothing is persisted; the plan is
//! rebuilt from the store on every run.
//!
//! ## Remote Layout
//!
//! For an album at relative path `P` (`""` for the root, otherwise ending in `/`):
//!
//! ```text
//! <prefix>P/a.jpg                         ← source
//! <prefix>thumbs/P/a_thumb_3fa9c1.jpg     ← derived artifact
//! <prefix>thumbs/P/index.json             ← manifest
//! <prefix>thumbs/P/index.html             ← page
//! ```
//!
//! ## Classification
//!
//! For every `(source, kind)` the expected name is derived (see
//! [`naming`](crate::naming)) and looked up among the existing artifacts:
//!
//! - present and not older than the source → **up to date**
//! - missing, or older than the source → **needed**
//! - every artifact nobody claimed → **obsolete**, scheduled for deletion
//!
//! Files under the artifact prefix that do not follow the naming pattern
//! (manifest, page, support files, anything foreign) are never touched.
//! Well-formed names whose kind is no longer configured are obsolete, so
//! renamed or removed kinds do not leave garbage behind.
//!
//! An album without images is still a valid album and gets a manifest.

use crate::config::StoreConfig;
use crate::error::Result;
use crate::listing::list_directory;
use crate::naming::ArtifactNamer;
use crate::store::{ObjectStore, RemoteObject};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MANIFEST_NAME: &str = "index.json";
pub const PAGE_NAME: &str = "index.html";

/// Maps relative album paths to store keys.
#[derive(Debug, Clone)]
pub struct Layout {
    prefix: String,
    artifact_dir: String,
}

impl Layout {
    pub fn new(store: &StoreConfig) -> Self {
        Self {
            prefix: store.prefix.clone(),
            artifact_dir: store.artifact_dir.clone(),
        }
    }

    /// Prefix of the whole artifact subtree, e.g. `photos/thumbs/`.
    pub fn artifact_root(&self) -> String {
        format!("{}{}/", self.prefix, self.artifact_dir)
    }

    pub fn source_prefix(&self, album: &str) -> String {
        format!("{}{}", self.prefix, album)
    }

    pub fn artifact_prefix(&self, album: &str) -> String {
        format!("{}{}", self.artifact_root(), album)
    }

    pub fn artifact_key(&self, album: &str, name: &str) -> String {
        format!("{}{}", self.artifact_prefix(album), name)
    }

    pub fn manifest_key(&self, album: &str) -> String {
        self.artifact_key(album, MANIFEST_NAME)
    }

    pub fn page_key(&self, album: &str) -> String {
        self.artifact_key(album, PAGE_NAME)
    }

    /// Whether the sub-directory `name` (relative to album `album`, ending
    /// in `/`) is the artifact subtree. Only the root level can contain it.
    pub fn is_artifact_subtree(&self, album: &str, name: &str) -> bool {
        album.is_empty() && name.strip_suffix('/') == Some(self.artifact_dir.as_str())
    }
}

/// Normalize a user-supplied album path: no leading `/`, trailing `/`
/// unless empty.
pub fn normalize_album_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// A source image in an album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub key: String,
    /// File name within the album.
    pub name: String,
    pub fingerprint: String,
    pub last_modified: DateTime<Utc>,
    /// Content-addressed location in the scratch directory.
    pub local_cache_path: PathBuf,
    /// `(kind, derived name)` for every configured kind, in config order.
    pub derived: Vec<(String, String)>,
}

/// A `(source, kind)` pair whose artifact must be (re)generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeededArtifact {
    /// Index into [`Album::source_images`].
    pub image: usize,
    /// Index into the configured kinds.
    pub kind: usize,
    pub name: String,
}

/// The work plan for one album.
#[derive(Debug, Clone, Default)]
pub struct Album {
    /// Relative path, `""` for the root or ending in `/`.
    pub path: String,
    pub source_images: Vec<SourceImage>,
    /// Sub-albums, relative to this album, each ending in `/`.
    pub subdirectories: Vec<String>,
    pub needed: Vec<NeededArtifact>,
    pub up_to_date: Vec<String>,
    /// Names of artifacts to delete.
    pub obsolete: Vec<String>,
}

impl Album {
    /// Needed artifacts grouped per source image, in image order.
    pub fn needed_by_image(&self) -> Vec<(usize, Vec<&NeededArtifact>)> {
        let mut groups: Vec<(usize, Vec<&NeededArtifact>)> = Vec::new();
        for needed in &self.needed {
            match groups.last_mut() {
                Some((image, list)) if *image == needed.image => list.push(needed),
                _ => groups.push((needed.image, vec![needed])),
            }
        }
        groups
    }

    /// Path of a sub-album relative to the tree root.
    pub fn child_path(&self, subdirectory: &str) -> String {
        format!("{}{}", self.path, subdirectory)
    }

    pub fn is_unchanged(&self) -> bool {
        self.needed.is_empty() && self.obsolete.is_empty()
    }
}

/// Scan the album at relative path `album`.
pub async fn scan_album(
    store: &dyn ObjectStore,
    namer: &ArtifactNamer,
    layout: &Layout,
    store_config: &StoreConfig,
    scratch_dir: &Path,
    album: &str,
) -> Result<Album> {
    let source_prefix = layout.source_prefix(album);
    let artifact_prefix = layout.artifact_prefix(album);

    let (sources, artifacts) = tokio::try_join!(
        list_directory(store, &source_prefix),
        list_directory(store, &artifact_prefix),
    )?;

    // Existing artifacts that follow the naming pattern, by name.
    let mut existing: HashMap<String, RemoteObject> = artifacts
        .objects
        .into_iter()
        .filter_map(|object| {
            let name = object.key.strip_prefix(&artifact_prefix)?.to_string();
            namer.parse(&name)?;
            Some((name, object))
        })
        .collect();

    let mut result = Album {
        path: album.to_string(),
        ..Album::default()
    };
    // Sources that share a stem and content share derived names.
    let mut claimed: HashSet<String> = HashSet::new();

    for object in sources.objects {
        let Some(name) = object.key.strip_prefix(&source_prefix) else {
            continue;
        };
        if name.contains('/') || !store_config.is_image(name) {
            continue;
        }
        let local_cache_path =
            scratch_dir.join(crate::cache::cache_file_name(&object.fingerprint, &object.key));
        let image_index = result.source_images.len();
        let mut derived = Vec::with_capacity(namer.kinds().len());

        for (kind_index, kind) in namer.kinds().iter().enumerate() {
            let derived_name = namer.derive_name(&object.key, &object.fingerprint, kind);
            if !claimed.insert(derived_name.clone()) {
                derived.push((kind.name.clone(), derived_name));
                continue;
            }
            let fresh = existing
                .remove(&derived_name)
                .is_some_and(|artifact| artifact.last_modified >= object.last_modified);
            if fresh {
                result.up_to_date.push(derived_name.clone());
            } else {
                result.needed.push(NeededArtifact {
                    image: image_index,
                    kind: kind_index,
                    name: derived_name.clone(),
                });
            }
            derived.push((kind.name.clone(), derived_name));
        }

        result.source_images.push(SourceImage {
            key: object.key.clone(),
            name: name.to_string(),
            fingerprint: object.fingerprint,
            last_modified: object.last_modified,
            local_cache_path,
            derived,
        });
    }

    let mut obsolete: Vec<String> = existing.into_keys().collect();
    obsolete.sort();
    result.obsolete = obsolete;

    let mut subdirectories: Vec<String> = sources
        .sub_prefixes
        .iter()
        .filter_map(|p| p.strip_prefix(&source_prefix))
        .filter(|name| !name.is_empty() && !layout.is_artifact_subtree(album, name))
        .map(str::to_string)
        .collect();
    subdirectories.sort();
    result.subdirectories = subdirectories;

    debug!(
        album,
        images = result.source_images.len(),
        needed = result.needed.len(),
        up_to_date = result.up_to_date.len(),
        obsolete = result.obsolete.len(),
        subdirectories = result.subdirectories.len(),
        "Scanned album"
    );
    Ok(result)
}
