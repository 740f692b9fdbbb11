//! Shared test utilities.
//!
//! Provides a small config, store seeding, expected-name lookup, and a
//! transform double that copies its input instead of decoding it.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let store = MemoryStore::new();
//! seed_album(&store, "2024/trip/", &["a.jpg", "b.jpg"]);
//!
//! let config = test_config();
//! let thumb = expected_name(&config, "2024/trip/a.jpg", "a.jpg", 0);
//! ```

use std::path::Path;
use std::sync::Mutex;

use crate::config::{KindConfig, SyncConfig};
use crate::imaging::{BackendError, Dimensions, ImageBackend, TransformParams};
use crate::naming::ArtifactNamer;
use crate::store::{MemoryStore, content_fingerprint};

// =========================================================================
// Fixture setup
// =========================================================================

/// Stock config with a single `thumb` kind.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        kinds: vec![KindConfig::thumb()],
        ..SyncConfig::stock()
    }
}

/// Insert one source per name under `album`, each with its own name as body.
pub fn seed_album(store: &MemoryStore, album: &str, names: &[&str]) {
    for name in names {
        store.insert(&format!("{album}{name}"), name.to_string());
    }
}

/// The derived name `config.kinds[kind_index]` gives the source at `key`
/// whose body is `body`.
pub fn expected_name(config: &SyncConfig, key: &str, body: &str, kind_index: usize) -> String {
    let namer = ArtifactNamer::from_config(config);
    namer.derive_name(
        key,
        &content_fingerprint(body.as_bytes()),
        &config.kinds[kind_index],
    )
}

// =========================================================================
// Transform double
// =========================================================================

/// Copies input to output and reports the requested bounds as dimensions.
#[derive(Default)]
pub struct CopyBackend {
    calls: Mutex<Vec<(String, u32)>>,
}

impl CopyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(input file name, target width)` per call.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ImageBackend for CopyBackend {
    fn transform(
        &self,
        input: &Path,
        output: &Path,
        params: &TransformParams,
    ) -> Result<Dimensions, BackendError> {
        std::fs::copy(input, output)?;
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.calls.lock().unwrap().push((name, params.width));
        Ok(Dimensions {
            width: params.width,
            height: params.height,
        })
    }

    fn name(&self) -> &'static str {
        "copy"
    }
}
