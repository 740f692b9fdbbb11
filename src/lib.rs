//! # Gallery Sync
//!
//! Keeps a tree of photo albums in an object store in sync with their
//! browsable derivatives: resized images, a JSON manifest, and a static HTML
//! page per album. Only what changed is republished.
//!
//! # Architecture: Per-Album Stages
//!
//! Every album is synchronized by the same sequence, each stage gating the
//! next:
//!
//! ```text
//! 1. Scan       two listings        →  Album (needed / up to date / obsolete)
//! 2. Download   needed sources      →  scratch cache (content-addressed)
//! 3. Delete     obsolete artifacts  →  store
//! 4. Generate   needed artifacts    →  transform + upload
//! 5. Publish    manifest + page     →  store, only when changed
//! ```
//!
//! The tree walker visits albums depth-first from the root and never
//! descends into the artifact subtree.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`store`] | Object-store seam: async trait, filesystem and in-memory backends |
//! | [`listing`] | Lazy paginated delimiter listings |
//! | [`naming`] | Content-addressed artifact names, per-run config-hash memo |
//! | [`scan`] | Stage 1: album diff and remote key layout |
//! | [`executor`] | Concurrency-bounded executor shared by every stage |
//! | [`cache`] | Scratch directory: source cache, temporaries, startup sweep |
//! | [`imaging`] | Transform seam and the pure-Rust backend |
//! | [`pipeline`] | Stages 2–4 |
//! | [`publish`] | Stage 5: manifest, page, support files |
//! | [`sync`] | Tree walker and failure policy |
//! | [`config`] | `gallery-sync.toml` loading, merging, validation |
//! | [`error`] | Error taxonomy |
//! | [`output`] | CLI report formatting |
//!
//! # Design Decisions
//!
//! ## Names Carry the Staleness Check
//!
//! A derived artifact is named `<stem>_<kind>_<hash>.jpg`, where the hash
//! covers the kind's transform settings and the source's content
//! fingerprint. Changing either produces a new name, so deciding whether an
//! artifact is current is a lookup, and the old artifact becomes an orphan
//! that the delete stage removes. No versioning or state file is needed.
//!
//! ## Rerun Is the Recovery Path
//!
//! Nothing is retried and nothing is persisted between runs. Every decision
//! is a function of what is in the store and the scratch directory right now,
//! so a failed run is resumed by running again. A second run over an
//! unchanged tree performs no uploads and no deletes.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module uses the `image` crate for decoding, EXIF
//! orientation, resampling, and JPEG encoding. No system libraries or
//! external tools are required.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod imaging;
pub mod listing;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod publish;
pub mod scan;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_helpers;
