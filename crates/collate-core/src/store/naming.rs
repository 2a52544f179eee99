//! Key naming conventions for bucket access.
//!
//! # Key Schema
//!
//! ```text
//! {base_prefix}/{key}            # Source objects, addressed by manifest key
//! {base_prefix}/{archive_name}   # Persisted archives in the destination bucket
//! ```
//!
//! Manifest keys are always relative to the store prefix, so the same
//! manifest resolves identically against `s3://bucket/images` and
//! `file:///srv/images`.

use object_store::path::Path;

/// Builder for storage keys.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    /// Base prefix (e.g., "images/2024")
    base_prefix: String,
}

impl KeyBuilder {
    /// Create a new key builder with the given base prefix.
    pub fn new(base_prefix: impl Into<String>) -> Self {
        let prefix = base_prefix.into().trim_matches('/').to_string();
        Self {
            base_prefix: prefix,
        }
    }

    /// The normalized prefix (no leading/trailing slashes).
    pub fn base_prefix(&self) -> &str {
        &self.base_prefix
    }

    /// Full object path for a relative key.
    ///
    /// Returns: `{base}/{key}`
    pub fn object_key(&self, key: &str) -> Path {
        let key = key.trim_start_matches('/');
        if self.base_prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.base_prefix, key))
        }
    }

    /// Prefix for listing, optionally narrowed by a relative sub-prefix.
    ///
    /// Returns `None` when the whole store should be listed.
    pub fn list_prefix(&self, sub_prefix: Option<&str>) -> Option<Path> {
        let sub = sub_prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty());
        match (self.base_prefix.is_empty(), sub) {
            (true, None) => None,
            (true, Some(sub)) => Some(Path::from(sub)),
            (false, None) => Some(Path::from(self.base_prefix.as_str())),
            (false, Some(sub)) => Some(Path::from(format!("{}/{}", self.base_prefix, sub))),
        }
    }

    /// Extract the relative key from a full object path.
    ///
    /// Input: `{base}/{key}`
    /// Output: `Some(key)`
    pub fn relative_key(&self, location: &Path) -> Option<String> {
        let full = location.as_ref();
        if self.base_prefix.is_empty() {
            return Some(full.to_string()).filter(|k| !k.is_empty());
        }
        full.strip_prefix(self.base_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .map(|rest| rest.to_string())
    }
}
