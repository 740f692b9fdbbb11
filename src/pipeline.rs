//! Album stages between scan and publish: download, delete, transform.
//!
//! Each stage runs its jobs through the bounded executor with its own
//! ceiling from `[concurrency]`:
//!
//! | Stage | Unit of work | Ceiling |
//! |---|---|---|
//! | Download | one unique source fingerprint | `downloads` |
//! | Delete | one obsolete artifact | `deletes` |
//! | Transform | one source image, all its needed kinds in sequence | `transforms` |
//!
//! A transform job, per needed kind:
//!
//! 1. make sure the source is in the local cache (normally a hit after the
//!    download stage; concurrent requests share one download)
//! 2. run the backend on tokio's blocking pool, writing a `tmp_*.jpg`
//! 3. upload it as a public, reduced-redundancy `image/jpeg`
//! 4. drop the temporary, on success and failure alike

use crate::cache::ScratchSpace;
use crate::config::{ConcurrencyConfig, KindConfig};
use crate::error::{Result, SyncError};
use crate::executor::run_bounded;
use crate::imaging::{BackendError, ImageBackend, TransformParams};
use crate::output::pluralize;
use crate::scan::{Album, Layout, NeededArtifact, SourceImage};
use crate::store::{ObjectStore, PutOptions};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// An artifact written by the transform stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub key: String,
    pub kind: String,
    pub width: u32,
    pub height: u32,
}

/// Everything the stages need, borrowed from the orchestrator.
pub struct Pipeline<'a> {
    pub store: &'a dyn ObjectStore,
    pub backend: &'a Arc<dyn ImageBackend>,
    pub scratch: &'a ScratchSpace,
    pub layout: &'a Layout,
    pub kinds: &'a [KindConfig],
    pub concurrency: &'a ConcurrencyConfig,
}

impl Pipeline<'_> {
    /// Fetch every source that a needed artifact depends on and that is not
    /// cached yet. Returns the number of downloads.
    pub async fn download_sources(&self, album: &Album) -> Result<usize> {
        let mut unique: BTreeMap<&str, &SourceImage> = BTreeMap::new();
        for needed in &album.needed {
            let image = &album.source_images[needed.image];
            unique.entry(image.fingerprint.as_str()).or_insert(image);
        }

        let mut missing = Vec::new();
        for image in unique.into_values() {
            if !tokio::fs::try_exists(&image.local_cache_path).await? {
                missing.push(image);
            }
        }
        if missing.is_empty() {
            return Ok(0);
        }

        info!("Downloading {}", pluralize(missing.len(), "image"));
        let this = self;
        let downloaded = run_bounded(missing, self.concurrency.downloads, move |image| async move {
            this.scratch
                .ensure_cached(
                    this.store,
                    &image.key,
                    &image.fingerprint,
                    &image.local_cache_path,
                )
                .await
        })
        .await?;
        Ok(downloaded.into_iter().filter(|d| *d).count())
    }

    /// Delete the album's obsolete artifacts. Returns the number deleted.
    pub async fn delete_obsolete(&self, album: &Album) -> Result<usize> {
        if album.obsolete.is_empty() {
            return Ok(0);
        }
        info!("Deleting {}", pluralize(album.obsolete.len(), "old artifact"));

        let keys: Vec<String> = album
            .obsolete
            .iter()
            .map(|name| self.layout.artifact_key(&album.path, name))
            .collect();
        let store = self.store;
        run_bounded(keys, self.concurrency.deletes, move |key| async move {
            debug!(key, "Deleting");
            store.delete(&key).await.map_err(SyncError::from)
        })
        .await
        .map(|deleted| deleted.len())
    }

    /// Generate and upload every needed artifact of the album.
    pub async fn generate(&self, album: &Album) -> Result<Vec<GeneratedArtifact>> {
        if album.needed.is_empty() {
            return Ok(Vec::new());
        }
        info!("Generating {}", pluralize(album.needed.len(), "artifact"));

        let this = self;
        let per_image = run_bounded(
            album.needed_by_image(),
            self.concurrency.transforms,
            move |(image, needed)| async move {
                let image = &album.source_images[image];
                let mut generated = Vec::with_capacity(needed.len());
                for artifact in needed {
                    generated.push(this.generate_one(album, image, artifact).await?);
                }
                Ok::<_, SyncError>(generated)
            },
        )
        .await?;
        Ok(per_image.into_iter().flatten().collect())
    }

    async fn generate_one(
        &self,
        album: &Album,
        image: &SourceImage,
        artifact: &NeededArtifact,
    ) -> Result<GeneratedArtifact> {
        let kind = self.kinds.get(artifact.kind).ok_or_else(|| {
            SyncError::Consistency(format!("no configured kind at index {}", artifact.kind))
        })?;

        self.scratch
            .ensure_cached(
                self.store,
                &image.key,
                &image.fingerprint,
                &image.local_cache_path,
            )
            .await?;

        let output = self.scratch.temp_output()?;
        let backend = Arc::clone(self.backend);
        let input = image.local_cache_path.clone();
        let output_path = output.to_path_buf();
        let params = TransformParams::from(kind);
        let dims = tokio::task::spawn_blocking(move || {
            backend.transform(&input, &output_path, &params)
        })
        .await
        .map_err(|e| BackendError::ProcessingFailed(format!("transform task failed: {e}")))
        .and_then(|r| r)
        .map_err(|source| SyncError::Transform {
            key: image.key.clone(),
            source,
        })?;

        let key = self.layout.artifact_key(&album.path, &artifact.name);
        debug!(key, width = dims.width, height = dims.height, "Uploading");
        self.store
            .put_file(&key, &output, PutOptions::reduced(JPEG_CONTENT_TYPE))
            .await?;

        Ok(GeneratedArtifact {
            key,
            kind: kind.name.clone(),
            width: dims.width,
            height: dims.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::imaging::backend::tests::MockBackend;
    use crate::naming::ArtifactNamer;
    use crate::scan::scan_album;
    use crate::store::{MemoryStore, StorageClass};
    use crate::test_helpers::*;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        store: MemoryStore,
        backend: Arc<dyn ImageBackend>,
        scratch: ScratchSpace,
        layout: Layout,
        config: crate::config::SyncConfig,
    }

    impl Fixture {
        async fn new(backend: Arc<dyn ImageBackend>) -> Self {
            let tmp = TempDir::new().unwrap();
            let scratch = ScratchSpace::prepare(tmp.path()).await.unwrap();
            let config = test_config();
            Self {
                layout: Layout::new(&config.store),
                _tmp: tmp,
                store: MemoryStore::new(),
                backend,
                scratch,
                config,
            }
        }

        fn pipeline(&self) -> Pipeline<'_> {
            Pipeline {
                store: &self.store,
                backend: &self.backend,
                scratch: &self.scratch,
                layout: &self.layout,
                kinds: &self.config.kinds,
                concurrency: &self.config.concurrency,
            }
        }

        async fn scan(&self, album: &str) -> Album {
            let namer = ArtifactNamer::from_config(&self.config);
            scan_album(
                &self.store,
                &namer,
                &self.layout,
                &self.config.store,
                self.scratch.dir(),
                album,
            )
            .await
            .unwrap()
        }
    }

    #[tokio::test]
    async fn downloads_each_fingerprint_once() {
        let fx = Fixture::new(Arc::new(CopyBackend::new())).await;
        fx.store.insert("2024/a.jpg", "same");
        fx.store.insert("2024/b.jpg", "same");
        fx.store.insert("2024/c.jpg", "other");

        let album = fx.scan("2024/").await;
        assert_eq!(fx.pipeline().download_sources(&album).await.unwrap(), 2);
        assert_eq!(fx.store.counts().gets, 2);

        // Everything is cached now.
        assert_eq!(fx.pipeline().download_sources(&album).await.unwrap(), 0);
        assert_eq!(fx.store.counts().gets, 2);
    }

    #[tokio::test]
    async fn deletes_obsolete_artifacts() {
        let fx = Fixture::new(Arc::new(CopyBackend::new())).await;
        fx.store.insert("thumbs/2024/a_thumb_ab12cd.jpg", "old");
        fx.store.insert("thumbs/2024/b_thumb_ab12cd.jpg", "old");

        let album = fx.scan("2024/").await;
        assert_eq!(fx.pipeline().delete_obsolete(&album).await.unwrap(), 2);
        assert!(!fx.store.contains("thumbs/2024/a_thumb_ab12cd.jpg"));
        assert_eq!(fx.store.counts().deletes, 2);
    }

    #[tokio::test]
    async fn generates_and_uploads_with_reduced_redundancy() {
        let fx = Fixture::new(Arc::new(CopyBackend::new())).await;
        fx.store.insert("2024/a.jpg", "pixels");

        let album = fx.scan("2024/").await;
        fx.pipeline().download_sources(&album).await.unwrap();
        let generated = fx.pipeline().generate(&album).await.unwrap();

        assert_eq!(generated.len(), 1);
        let key = &generated[0].key;
        assert_eq!(key, &format!("thumbs/2024/{}", album.needed[0].name));
        assert_eq!(fx.store.body(key).unwrap(), "pixels");
        let options = fx.store.put_options(key).unwrap();
        assert_eq!(options.storage_class, StorageClass::ReducedRedundancy);
        assert_eq!(options.content_type.as_deref(), Some(JPEG_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn temporaries_are_removed_after_success_and_failure() {
        let fx = Fixture::new(Arc::new(MockBackend::failing_on("bad"))).await;
        fx.store.insert("2024/a.jpg", "good");
        fx.store.insert("2024/z.jpg", "bad");

        let mut album = fx.scan("2024/").await;
        // Give the failing source a recognizable cache path.
        album.source_images[1].local_cache_path = fx.scratch.dir().join("bad.jpg");

        let err = fx.pipeline().generate(&album).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransformFailure);

        let leftovers: Vec<_> = std::fs::read_dir(fx.scratch.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| crate::cache::is_temporary(n))
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn upload_failure_propagates_as_transient() {
        let fx = Fixture::new(Arc::new(CopyBackend::new())).await;
        fx.store.insert("2024/a.jpg", "pixels");
        let album = fx.scan("2024/").await;
        let key = fx.layout.artifact_key("2024/", &album.needed[0].name);
        fx.store.fail_on(&key);

        let err = fx.pipeline().generate(&album).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientIo);
    }

    #[tokio::test]
    async fn kinds_of_one_image_run_in_config_order() {
        let backend = Arc::new(CopyBackend::new());
        let mut fx = Fixture::new(backend.clone()).await;
        fx.config.kinds = vec![
            crate::config::KindConfig::thumb(),
            crate::config::KindConfig::medium(),
        ];
        fx.store.insert("a.jpg", "pixels");

        let album = fx.scan("").await;
        let generated = fx.pipeline().generate(&album).await.unwrap();
        let kinds: Vec<_> = generated.iter().map(|g| g.kind.as_str()).collect();
        assert_eq!(kinds, ["thumb", "medium"]);
        let widths: Vec<u32> = backend.calls().iter().map(|(_, width)| *width).collect();
        assert_eq!(widths, [200, 1200]);
        // Downloaded lazily by the transform job itself.
        assert_eq!(fx.store.counts().gets, 1);
    }
}
