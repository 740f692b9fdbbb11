//! Tree walker and per-album orchestration.
//!
//! A [`Syncer`] owns everything one run needs: the store and transform
//! backends, the validated config, the artifact namer (with its per-run hash
//! memo), the remote layout, and the scratch space.
//!
//! ```text
//! Syncer::new      validate config, create scratch dir     (no remote I/O)
//! Syncer::prepare  sweep stray temporaries, upload support files
//! Syncer::sync_tree
//!   for each album, depth-first from the root:
//!     scan → download → delete obsolete → generate → publish
//! ```
//!
//! Albums are processed one at a time and every stage gates the next. The
//! artifact subtree at the root is never walked.
//!
//! ## Failure Policy
//!
//! Any stage error aborts the rest of that album. By default it also aborts
//! the walk. With `keep_going` the album is recorded as failed and the walk
//! continues; sub-albums of an album that scanned successfully are still
//! visited. Fatal errors ([`SyncError::is_fatal`]) always abort.
//!
//! Nothing is persisted between runs: rerunning after a failure picks up
//! exactly the work that is still outstanding.

use crate::cache::{CacheStats, ScratchSpace};
use crate::config::SyncConfig;
use crate::error::{ErrorKind, Result, SyncError};
use crate::imaging::ImageBackend;
use crate::naming::ArtifactNamer;
use crate::output::pluralize;
use crate::pipeline::Pipeline;
use crate::publish::{publish_manifest, publish_page, publish_support_files, render_page};
use crate::scan::{Album, Layout, normalize_album_path, scan_album};
use crate::store::ObjectStore;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to one album.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlbumReport {
    pub path: String,
    /// Key of the album page.
    pub location: String,
    pub images: usize,
    pub subdirectories: usize,
    pub downloaded: usize,
    pub deleted: usize,
    pub generated: usize,
    pub up_to_date: usize,
    pub manifest_updated: bool,
    pub page_updated: bool,
}

impl AlbumReport {
    /// Whether the run wrote or deleted anything for this album.
    pub fn changed(&self) -> bool {
        self.deleted > 0 || self.generated > 0 || self.manifest_updated || self.page_updated
    }
}

/// An album skipped under `keep_going`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumFailure {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct TreeReport {
    pub albums: Vec<AlbumReport>,
    pub failed: Vec<AlbumFailure>,
    pub support_files: Vec<String>,
    pub swept: usize,
    pub cache: CacheStats,
}

impl TreeReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Album path for display: `/` for the root.
pub fn display_path(path: &str) -> &str {
    if path.is_empty() { "/" } else { path }
}

/// Whether the walk may continue past `error`.
fn tolerate(error: &SyncError, keep_going: bool) -> bool {
    keep_going && !error.is_fatal()
}

pub struct Syncer {
    store: Arc<dyn ObjectStore>,
    backend: Arc<dyn ImageBackend>,
    config: SyncConfig,
    namer: ArtifactNamer,
    layout: Layout,
    scratch: ScratchSpace,
}

impl Syncer {
    /// Validate `config` and set up the scratch directory. Performs no
    /// remote I/O, so configuration errors surface first.
    pub async fn new(
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn ImageBackend>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let scratch = ScratchSpace::prepare(config.store.scratch_dir.clone()).await?;
        Ok(Self {
            namer: ArtifactNamer::from_config(&config),
            layout: Layout::new(&config.store),
            store,
            backend,
            config,
            scratch,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.scratch.stats()
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline {
            store: self.store.as_ref(),
            backend: &self.backend,
            scratch: &self.scratch,
            layout: &self.layout,
            kinds: &self.config.kinds,
            concurrency: &self.config.concurrency,
        }
    }

    /// Startup work: remove stray temporaries and publish support files.
    /// Returns the number of temporaries removed and the uploaded keys.
    pub async fn prepare(&self) -> Result<(usize, Vec<String>)> {
        let swept = self
            .scratch
            .sweep_temporaries(self.config.concurrency.sweep)
            .await?;
        if swept > 0 {
            info!("Swept {}", pluralize(swept, "stray temporary file"));
        }
        let uploaded = publish_support_files(
            self.store.as_ref(),
            &self.layout,
            &self.config.page.support_files,
        )
        .await?;
        Ok((swept, uploaded))
    }

    /// Build the work plan for one album.
    pub async fn scan(&self, album: &str) -> Result<Album> {
        scan_album(
            self.store.as_ref(),
            &self.namer,
            &self.layout,
            &self.config.store,
            self.scratch.dir(),
            &normalize_album_path(album),
        )
        .await
    }

    /// Run every stage after the scan for an already scanned album.
    pub async fn process_album(&self, album: &Album) -> Result<AlbumReport> {
        let pipeline = self.pipeline();
        let downloaded = pipeline.download_sources(album).await?;
        let deleted = pipeline.delete_obsolete(album).await?;
        let generated = pipeline.generate(album).await?;

        let html = render_page(
            &self.config.store.prefix,
            &album.path,
            &self.config.kinds,
            &self.config.page,
        );
        let (manifest_updated, page_updated) = tokio::try_join!(
            publish_manifest(
                self.store.as_ref(),
                &self.layout,
                album,
                &self.config.page.manifest_cache_control,
            ),
            publish_page(self.store.as_ref(), &self.layout, album, html),
        )?;

        let location = self.layout.page_key(&album.path);
        if manifest_updated || page_updated {
            info!("Album updated: {}", location);
        }
        Ok(AlbumReport {
            path: album.path.clone(),
            location,
            images: album.source_images.len(),
            subdirectories: album.subdirectories.len(),
            downloaded,
            deleted,
            generated: generated.len(),
            up_to_date: album.up_to_date.len(),
            manifest_updated,
            page_updated,
        })
    }

    /// Scan and process a single album, without visiting sub-albums.
    pub async fn sync_album(&self, album: &str) -> Result<AlbumReport> {
        let album = self.scan(album).await?;
        self.process_album(&album).await
    }

    /// Sync `root` and every album below it, depth-first.
    pub async fn sync_tree(&self, root: &str, keep_going: bool) -> Result<TreeReport> {
        let mut report = TreeReport::default();
        let mut stack = vec![normalize_album_path(root)];

        while let Some(path) = stack.pop() {
            info!("Syncing {}", display_path(&path));
            let album = match self.scan(&path).await {
                Ok(album) => album,
                Err(e) => {
                    self.record_failure(&mut report, path, e, keep_going)?;
                    continue;
                }
            };
            // Reversed so sub-albums are visited in name order.
            for subdirectory in album.subdirectories.iter().rev() {
                stack.push(album.child_path(subdirectory));
            }

            match self.process_album(&album).await {
                Ok(album_report) => report.albums.push(album_report),
                Err(e) => self.record_failure(&mut report, path, e, keep_going)?,
            }
        }

        report.cache = self.scratch.stats();
        Ok(report)
    }

    /// Startup work followed by a full tree sync.
    pub async fn run(&self, root: &str, keep_going: bool) -> Result<TreeReport> {
        let (swept, support_files) = self.prepare().await?;
        let mut report = self.sync_tree(root, keep_going).await?;
        report.swept = swept;
        report.support_files = support_files;
        Ok(report)
    }

    fn record_failure(
        &self,
        report: &mut TreeReport,
        path: String,
        error: SyncError,
        keep_going: bool,
    ) -> Result<()> {
        if !tolerate(&error, keep_going) {
            return Err(error);
        }
        warn!(album = display_path(&path), error = %error, "Album failed, continuing");
        report.failed.push(AlbumFailure {
            path,
            kind: error.kind(),
            message: error.to_string(),
        });
        Ok(())
    }

    /// Scan `root` and every album below it without changing anything.
    pub async fn plan_tree(&self, root: &str) -> Result<Vec<Album>> {
        let mut albums = Vec::new();
        let mut stack = vec![normalize_album_path(root)];
        while let Some(path) = stack.pop() {
            let album = self.scan(&path).await?;
            for subdirectory in album.subdirectories.iter().rev() {
                stack.push(album.child_path(subdirectory));
            }
            albums.push(album);
        }
        Ok(albums)
    }
}
