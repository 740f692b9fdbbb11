//! Content-addressed names for derived artifacts.
//!
//! Every derived artifact is named
//!
//! ```text
//! <stem>_<kind>_<hash>.jpg
//! ```
//!
//! where `hash` is the hex SHA-256 of the kind's configuration hash followed
//! by the source's content fingerprint, truncated to `name_hash_len` digits:
//!
//! - `IMG_0001.jpg` + thumb → `IMG_0001_thumb_3fa9c1.jpg`
//! - `my_photo.png` + medium → `my_photo_medium_0b77e2.jpg`
//!
//! The name is a pure function of `(fingerprint, kind config)`. Changing the
//! source content or any transform setting of the kind yields a new name, and
//! the artifact under the old name becomes an orphan. Staleness detection is
//! a string comparison.
//!
//! ## Config hashes
//!
//! A kind's configuration is hashed through a canonical serialization:
//! object keys are sorted, arrays are hashed element by element in order,
//! scalars are hashed as their JSON text. Equivalent configurations hash
//! identically no matter how their keys were ordered in the file. Each
//! [`ArtifactNamer`] memoizes the hash per kind, so it is computed once per
//! run and never shared between runs.

use crate::config::{KindConfig, SyncConfig, is_valid_kind_tag};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// Extension of every derived image. The transform always encodes JPEG.
pub const ARTIFACT_EXTENSION: &str = "jpg";

/// SHA-256 of the canonical serialization of `value`, as lower-case hex.
pub fn consistent_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    feed_canonical(&mut hasher, value);
    format!("{:x}", hasher.finalize())
}

fn feed_canonical(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            hasher.update((keys.len() as u64).to_le_bytes());
            for key in keys {
                feed_canonical(hasher, &Value::String(key.clone()));
                feed_canonical(hasher, &map[key.as_str()]);
            }
        }
        Value::Array(items) => {
            hasher.update(b"[");
            hasher.update((items.len() as u64).to_le_bytes());
            for item in items {
                feed_canonical(hasher, item);
            }
        }
        scalar => {
            let text = scalar.to_string();
            hasher.update(b"=");
            hasher.update((text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
    }
}

/// File stem of a `/`-separated key: `2024/trip/a.b.jpg` → `a.b`.
pub fn key_stem(key: &str) -> &str {
    let file = key.rsplit('/').next().unwrap_or(key);
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    }
}

/// A derived-artifact file name split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedName {
    pub stem: String,
    pub kind: String,
    pub hash: String,
}

/// Parse `<stem>_<kind>_<hash>.jpg`.
///
/// Parsing runs from the right: stems may contain `_`, kind tags may not.
/// Returns `None` for anything that does not follow the pattern with a hash
/// of exactly `hash_len` lower-case hex digits.
pub fn parse_derived_name(name: &str, hash_len: usize) -> Option<DerivedName> {
    let base = name.strip_suffix(ARTIFACT_EXTENSION)?.strip_suffix('.')?;
    let (rest, hash) = base.rsplit_once('_')?;
    if hash.len() != hash_len
        || !hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return None;
    }
    let (stem, kind) = rest.rsplit_once('_')?;
    if stem.is_empty() || !is_valid_kind_tag(kind) {
        return None;
    }
    Some(DerivedName {
        stem: stem.to_string(),
        kind: kind.to_string(),
        hash: hash.to_string(),
    })
}

/// Derives artifact names for the configured kinds.
#[derive(Debug)]
pub struct ArtifactNamer {
    kinds: Vec<KindConfig>,
    hash_len: usize,
    /// Kind name → (config the hash was computed from, hash), filled lazily.
    config_hashes: Mutex<HashMap<String, (KindConfig, String)>>,
}

impl ArtifactNamer {
    pub fn new(kinds: Vec<KindConfig>, hash_len: usize) -> Self {
        Self {
            kinds,
            hash_len,
            config_hashes: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.kinds.clone(), config.store.name_hash_len)
    }

    pub fn kinds(&self) -> &[KindConfig] {
        &self.kinds
    }

    pub fn hash_len(&self) -> usize {
        self.hash_len
    }

    /// Configuration hash of `kind`, computed on first use.
    pub fn kind_config_hash(&self, kind: &KindConfig) -> String {
        let mut cache = self
            .config_hashes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match cache.get(&kind.name) {
            Some((cached, hash)) if cached == kind => hash.clone(),
            _ => {
                let hash = consistent_hash(&kind.transform_value());
                cache.insert(kind.name.clone(), (kind.clone(), hash.clone()));
                hash
            }
        }
    }

    /// Name of the `kind` artifact for the source at `source_key` whose
    /// content fingerprint is `fingerprint`.
    pub fn derive_name(&self, source_key: &str, fingerprint: &str, kind: &KindConfig) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind_config_hash(kind).as_bytes());
        hasher.update(fingerprint.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let short = &digest[..self.hash_len.min(digest.len())];
        format!(
            "{}_{}_{}.{}",
            key_stem(source_key),
            kind.name,
            short,
            ARTIFACT_EXTENSION
        )
    }

    /// Whether `name` looks like an artifact this engine produces.
    pub fn parse(&self, name: &str) -> Option<DerivedName> {
        parse_derived_name(name, self.hash_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn namer() -> ArtifactNamer {
        ArtifactNamer::new(vec![KindConfig::thumb(), KindConfig::medium()], 6)
    }

    // =========================================================================
    // consistent_hash
    // =========================================================================

    #[test]
    fn hash_ignores_key_order() {
        let mut a = serde_json::Map::new();
        a.insert("width".into(), json!(200));
        a.insert("height".into(), json!(200));
        a.insert("nested".into(), json!({"x": 1, "y": [1, 2]}));
        let mut b = serde_json::Map::new();
        b.insert("nested".into(), json!({"y": [1, 2], "x": 1}));
        b.insert("height".into(), json!(200));
        b.insert("width".into(), json!(200));

        assert_eq!(
            consistent_hash(&Value::Object(a)),
            consistent_hash(&Value::Object(b))
        );
    }

    #[test]
    fn hash_respects_array_order() {
        assert_ne!(consistent_hash(&json!([1, 2])), consistent_hash(&json!([2, 1])));
    }

    #[test]
    fn hash_distinguishes_types_and_nesting() {
        assert_ne!(consistent_hash(&json!("1")), consistent_hash(&json!(1)));
        assert_ne!(
            consistent_hash(&json!([[1], 2])),
            consistent_hash(&json!([1, [2]]))
        );
        assert_eq!(consistent_hash(&json!(null)).len(), 64);
    }

    // =========================================================================
    // derive_name
    // =========================================================================

    #[test]
    fn derived_name_shape() {
        let n = namer();
        let name = n.derive_name("2024/trip/IMG_0001.JPG", "abc123", &KindConfig::thumb());
        let parsed = n.parse(&name).unwrap();
        assert_eq!(parsed.stem, "IMG_0001");
        assert_eq!(parsed.kind, "thumb");
        assert_eq!(parsed.hash.len(), 6);
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn derived_name_is_deterministic() {
        let thumb = KindConfig::thumb();
        let first = namer().derive_name("a.jpg", "abc", &thumb);
        let n = namer();
        assert_eq!(n.derive_name("a.jpg", "abc", &thumb), first);
        assert_eq!(n.derive_name("a.jpg", "abc", &thumb), first);
    }

    #[test]
    fn derived_name_changes_with_content_or_config() {
        let thumb = KindConfig::thumb();
        let base = namer().derive_name("a.jpg", "abc", &thumb);
        assert_ne!(namer().derive_name("a.jpg", "abd", &thumb), base);

        let mut bigger = thumb.clone();
        bigger.width = 300;
        let other = ArtifactNamer::new(vec![bigger.clone()], 6);
        assert_ne!(other.derive_name("a.jpg", "abc", &bigger), base);
    }

    #[test]
    fn renamed_source_keeps_hash_changes_stem() {
        let n = namer();
        let thumb = KindConfig::thumb();
        let a = n.parse(&n.derive_name("a.jpg", "abc", &thumb)).unwrap();
        let a2 = n.parse(&n.derive_name("a2.jpg", "abc", &thumb)).unwrap();
        assert_eq!(a.hash, a2.hash);
        assert_ne!(a.stem, a2.stem);
    }

    #[test]
    fn hash_length_is_configurable() {
        let n = ArtifactNamer::new(vec![KindConfig::thumb()], 12);
        let name = n.derive_name("a.jpg", "abc", &KindConfig::thumb());
        assert_eq!(n.parse(&name).unwrap().hash.len(), 12);
        assert!(namer().parse(&name).is_none());
    }

    #[test]
    fn config_hash_is_memoized_per_kind() {
        let n = namer();
        let thumb = KindConfig::thumb();
        let h1 = n.kind_config_hash(&thumb);
        let h2 = n.kind_config_hash(&thumb);
        assert_eq!(h1, h2);
        assert_eq!(h1, consistent_hash(&thumb.transform_value()));
        assert_eq!(n.config_hashes.lock().unwrap().len(), 1);
    }

    #[test]
    fn same_name_with_other_settings_gets_its_own_hash() {
        let n = namer();
        let thumb = KindConfig::thumb();
        let wider = KindConfig {
            width: 400,
            ..KindConfig::thumb()
        };
        let h1 = n.kind_config_hash(&thumb);
        let h2 = n.kind_config_hash(&wider);
        assert_ne!(h1, h2);
        assert_eq!(h2, consistent_hash(&wider.transform_value()));
        assert_ne!(
            n.derive_name("a.jpg", "abc", &thumb),
            n.derive_name("a.jpg", "abc", &wider)
        );
        assert_eq!(n.kind_config_hash(&thumb), h1);
    }

    // =========================================================================
    // key_stem / parse_derived_name
    // =========================================================================

    #[test]
    fn stems() {
        assert_eq!(key_stem("2024/trip/a.jpg"), "a");
        assert_eq!(key_stem("a.b.jpg"), "a.b");
        assert_eq!(key_stem("noext"), "noext");
        assert_eq!(key_stem(".hidden"), ".hidden");
    }

    #[test]
    fn parse_accepts_underscored_stems() {
        let parsed = parse_derived_name("my_holiday_pic_thumb_ab12cd.jpg", 6).unwrap();
        assert_eq!(parsed.stem, "my_holiday_pic");
        assert_eq!(parsed.kind, "thumb");
        assert_eq!(parsed.hash, "ab12cd");
    }

    #[test]
    fn parse_rejects_foreign_names() {
        for name in [
            "index.json",
            "index.html",
            "gallery.js",
            "a.jpg",
            "a_thumb.jpg",
            "a_thumb_ab12c.jpg",
            "a_thumb_AB12CD.jpg",
            "a_thumb_ab12cg.jpg",
            "a_Thumb_ab12cd.jpg",
            "_thumb_ab12cd.jpg",
            "a_thumb_ab12cd.png",
        ] {
            assert!(parse_derived_name(name, 6).is_none(), "{name} should not parse");
        }
    }
}
