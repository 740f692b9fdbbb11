//! Sync configuration.
//!
//! Handles loading, validating, and merging `gallery-sync.toml`. The stock
//! defaults are the base layer; a user file only needs the keys it wants to
//! change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [store]
//! root = "bucket"                   # Directory backing the filesystem store
//! prefix = ""                       # Gallery key prefix inside the store ("" or ends in "/")
//! artifact_dir = "thumbs"           # Subtree holding derived artifacts
//! scratch_dir = ".gallery-sync"     # Local download cache + temporaries
//! image_extensions = ["jpg", "jpeg", "png", "tif", "tiff", "webp"]
//! name_hash_len = 6                 # Hex digits of content hash in artifact names
//!
//! [concurrency]
//! downloads = 1
//! deletes = 4
//! transforms = 3
//! sweep = 5
//!
//! [[kinds]]
//! name = "thumb"
//! width = 200
//! height = 200
//! quality = 80
//! fit = "fill"
//! filter = "lanczos3"
//! gamma_correct = false
//!
//! [[kinds]]
//! name = "medium"
//! width = 1200
//! height = 1200
//! quality = 85
//! fit = "fit"
//! filter = "lanczos3"
//! gamma_correct = true
//!
//! [page]
//! scripts = ["jquery-1.7.2.min.js", "gallery.js"]
//! support_files = []
//! manifest_cache_control = "max-age=3600"
//! ```
//!
//! ## Partial Configuration
//!
//! Tables merge key by key; arrays replace wholesale. Declaring any
//! `[[kinds]]` therefore replaces the whole default kind list.
//!
//! Unknown keys are rejected to catch typos early. Validation runs before the
//! engine performs any remote I/O.

use crate::imaging::{Fit, ResizeFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Accepted range for [`StoreConfig::name_hash_len`]. Six hex digits is the
/// default: short enough to keep names readable, and collisions only matter
/// between versions of the same `(stem, kind)`.
pub const NAME_HASH_LEN_RANGE: std::ops::RangeInclusive<usize> = 4..=64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub store: StoreConfig,
    pub concurrency: ConcurrencyConfig,
    /// Derived-artifact kinds, in manifest order.
    pub kinds: Vec<KindConfig>,
    pub page: PageConfig,
}

/// Where sources and artifacts live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory backing the filesystem store.
    pub root: PathBuf,
    /// Key prefix of the gallery inside the store. Empty or ending in `/`.
    pub prefix: String,
    /// Name of the top-level subtree that holds derived artifacts.
    pub artifact_dir: String,
    /// Local directory for the source cache and temporaries.
    pub scratch_dir: PathBuf,
    /// Recognized source extensions (case-insensitive, without dot).
    pub image_extensions: Vec<String>,
    /// Number of hex digits of the content hash kept in artifact names.
    pub name_hash_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("bucket"),
            prefix: String::new(),
            artifact_dir: "thumbs".to_string(),
            scratch_dir: PathBuf::from(".gallery-sync"),
            image_extensions: ["jpg", "jpeg", "png", "tif", "tiff", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            name_hash_len: 6,
        }
    }
}

impl StoreConfig {
    /// Key prefix under which derived artifacts for the whole tree live.
    pub fn artifact_root(&self) -> String {
        format!("{}{}/", self.prefix, self.artifact_dir)
    }

    /// Whether `name` has one of the recognized image extensions.
    pub fn is_image(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.image_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}

/// Concurrency ceilings, one per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrencyConfig {
    pub downloads: usize,
    pub deletes: usize,
    pub transforms: usize,
    /// Startup sweep of stray temporaries.
    pub sweep: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            downloads: 1,
            deletes: 4,
            transforms: 3,
            sweep: 5,
        }
    }
}

/// One derived-artifact kind.
///
/// Everything except `name` is transform configuration; changing any of it
/// changes every artifact name of this kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KindConfig {
    /// Kind tag used in artifact names and manifest keys.
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default)]
    pub fit: Fit,
    #[serde(default)]
    pub filter: ResizeFilter,
    /// Resize in linear light instead of sRGB.
    #[serde(default)]
    pub gamma_correct: bool,
}

fn default_quality() -> u32 {
    85
}

impl KindConfig {
    pub fn thumb() -> Self {
        Self {
            name: "thumb".to_string(),
            width: 200,
            height: 200,
            quality: 80,
            fit: Fit::Fill,
            filter: ResizeFilter::Lanczos3,
            gamma_correct: false,
        }
    }

    pub fn medium() -> Self {
        Self {
            name: "medium".to_string(),
            width: 1200,
            height: 1200,
            quality: 85,
            fit: Fit::Fit,
            filter: ResizeFilter::Lanczos3,
            gamma_correct: true,
        }
    }

    /// The transform part of this kind as a JSON object, for hashing.
    pub fn transform_value(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).expect("kind config must serialize");
        if let Some(map) = value.as_object_mut() {
            map.remove("name");
        }
        value
    }
}

/// Published page settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PageConfig {
    /// Scripts referenced by every album page. Relative names resolve
    /// against the artifact root; `http(s)://` URLs are used verbatim.
    pub scripts: Vec<String>,
    /// Local files uploaded to the artifact root when changed.
    pub support_files: Vec<PathBuf>,
    pub manifest_cache_control: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            scripts: vec!["jquery-1.7.2.min.js".to_string(), "gallery.js".to_string()],
            support_files: Vec::new(),
            manifest_cache_control: "max-age=3600".to_string(),
        }
    }
}

impl SyncConfig {
    /// Stock config with the default kinds.
    pub fn stock() -> Self {
        Self {
            kinds: vec![KindConfig::thumb(), KindConfig::medium()],
            ..Default::default()
        }
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let store = &self.store;
        if !store.prefix.is_empty() && !store.prefix.ends_with('/') {
            return Err(ConfigError::Validation(
                "store.prefix must be empty or end with '/'".into(),
            ));
        }
        if store.prefix.starts_with('/') {
            return Err(ConfigError::Validation(
                "store.prefix must not start with '/'".into(),
            ));
        }
        if store.artifact_dir.is_empty()
            || store.artifact_dir.contains('/')
            || store.artifact_dir.starts_with('.')
        {
            return Err(ConfigError::Validation(
                "store.artifact_dir must be a single non-hidden path segment".into(),
            ));
        }
        if !NAME_HASH_LEN_RANGE.contains(&store.name_hash_len) {
            return Err(ConfigError::Validation(format!(
                "store.name_hash_len must be between {} and {}",
                NAME_HASH_LEN_RANGE.start(),
                NAME_HASH_LEN_RANGE.end()
            )));
        }
        if store.image_extensions.is_empty() {
            return Err(ConfigError::Validation(
                "store.image_extensions must not be empty".into(),
            ));
        }

        let c = &self.concurrency;
        for (name, value) in [
            ("downloads", c.downloads),
            ("deletes", c.deletes),
            ("transforms", c.transforms),
            ("sweep", c.sweep),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "concurrency.{name} must be at least 1"
                )));
            }
        }

        if self.kinds.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[kinds]] entry is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for kind in &self.kinds {
            if !is_valid_kind_tag(&kind.name) {
                return Err(ConfigError::Validation(format!(
                    "kind name `{}` must match [a-z0-9-]+",
                    kind.name
                )));
            }
            if !seen.insert(kind.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate kind name `{}`",
                    kind.name
                )));
            }
            if kind.width == 0 || kind.height == 0 {
                return Err(ConfigError::Validation(format!(
                    "kind `{}` must have non-zero width and height",
                    kind.name
                )));
            }
            if !(1..=100).contains(&kind.quality) {
                return Err(ConfigError::Validation(format!(
                    "kind `{}` quality must be 1-100",
                    kind.name
                )));
            }
            if kind.name == "full" {
                return Err(ConfigError::Validation(
                    "kind name `full` is reserved for the source image".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Kind tags appear between underscores in artifact names, so they may not
/// contain one themselves.
pub fn is_valid_kind_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(SyncConfig::stock())
        .map_err(|e| ConfigError::Validation(format!("stock config does not serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, deserialize, validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<SyncConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SyncConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML file.
///
/// A missing file yields the stock configuration.
pub fn load_config(path: &Path) -> Result<SyncConfig, ConfigError> {
    let overlay = if path.exists() {
        let content = fs::read_to_string(path)?;
        Some(toml::from_str::<toml::Value>(&content)?)
    } else {
        None
    };
    resolve_config(overlay)
}

/// Returns a fully-commented stock `gallery-sync.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# gallery-sync configuration
# ==========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys cause an error.

# ---------------------------------------------------------------------------
# Store layout
# ---------------------------------------------------------------------------
[store]
# Directory acting as the bucket.
root = "bucket"

# Key prefix of the gallery inside the bucket ("" or ending in "/").
prefix = ""

# Subtree (under the prefix) that holds thumbnails, manifests and pages.
artifact_dir = "thumbs"

# Local download cache. Files are named by content fingerprint, so
# renamed sources are never downloaded twice.
scratch_dir = ".gallery-sync"

# Source file extensions to publish (case-insensitive).
image_extensions = ["jpg", "jpeg", "png", "tif", "tiff", "webp"]

# Hex digits of the content hash embedded in artifact names.
# Longer = fewer collisions between versions, longer names. 4-64.
name_hash_len = 6

# ---------------------------------------------------------------------------
# Concurrency ceilings per stage
# ---------------------------------------------------------------------------
[concurrency]
downloads = 1
deletes = 4
transforms = 3
sweep = 5

# ---------------------------------------------------------------------------
# Artifact kinds
# ---------------------------------------------------------------------------
# Declaring any [[kinds]] replaces this whole list.
# fit:    "fill" = cover the box and centre-crop, "fit" = fit inside, no upscaling
# filter: nearest | triangle | catmull-rom | gaussian | lanczos3
# Changing any value except `name` regenerates every artifact of the kind.

[[kinds]]
name = "thumb"
width = 200
height = 200
quality = 80
fit = "fill"
filter = "lanczos3"
gamma_correct = false

[[kinds]]
name = "medium"
width = 1200
height = 1200
quality = 85
fit = "fit"
filter = "lanczos3"
gamma_correct = true

# ---------------------------------------------------------------------------
# Published page
# ---------------------------------------------------------------------------
[page]
# Viewer scripts. Relative names resolve against the artifact root.
scripts = ["jquery-1.7.2.min.js", "gallery.js"]

# Local files uploaded to the artifact root when their content changes.
support_files = []

manifest_cache_control = "max-age=3600"
"##
}
