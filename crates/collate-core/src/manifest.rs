//! Manifest resolution.
//!
//! A manifest is the ordered list of object keys a run aggregates. Order is
//! the iteration order of the source and duplicates are kept as-is.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::RemoteStore;

/// Ordered object keys for one run. Immutable once resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    keys: Vec<String>,
}

impl Manifest {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.keys.iter()
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// Where the manifest comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestSource {
    /// Names of the regular files in a local directory, sorted.
    Directory(PathBuf),
    /// Keys listed from the source bucket under a prefix.
    StorePrefix(String),
    /// Newline-delimited key list. Blank lines and `#` comments are skipped.
    File(PathBuf),
    /// Explicit keys.
    Keys(Vec<String>),
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(path) => write!(f, "directory {}", path.display()),
            Self::StorePrefix(prefix) if prefix.is_empty() => write!(f, "source store listing"),
            Self::StorePrefix(prefix) => write!(f, "source store listing under '{}'", prefix),
            Self::File(path) => write!(f, "key list {}", path.display()),
            Self::Keys(keys) => write!(f, "{} explicit key(s)", keys.len()),
        }
    }
}

/// The manifest source could not be read.
#[derive(Debug, Error)]
#[error("cannot resolve manifest from {source_desc}: {reason}")]
pub struct ResolutionError {
    pub source_desc: String,
    pub reason: String,
}

impl ResolutionError {
    fn new(source: &ManifestSource, reason: impl fmt::Display) -> Self {
        Self {
            source_desc: source.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl ManifestSource {
    /// Resolve the manifest. Reads only; never writes anywhere.
    ///
    /// `store` is consulted for [`ManifestSource::StorePrefix`] only.
    pub async fn resolve(&self, store: &dyn RemoteStore) -> Result<Manifest, ResolutionError> {
        let keys = match self {
            Self::Directory(dir) => read_directory(dir).map_err(|e| ResolutionError::new(self, e))?,
            Self::StorePrefix(prefix) => {
                let prefix = Some(prefix.as_str()).filter(|p| !p.is_empty());
                store
                    .list_keys(prefix)
                    .await
                    .map_err(|e| ResolutionError::new(self, e))?
            }
            Self::File(path) => {
                let text =
                    std::fs::read_to_string(path).map_err(|e| ResolutionError::new(self, e))?;
                parse_key_list(&text)
            }
            Self::Keys(keys) => keys.clone(),
        };

        tracing::debug!(source = %self, keys = keys.len(), "resolved manifest");
        Ok(Manifest::new(keys))
    }
}

fn read_directory(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => {
                tracing::warn!(name = ?raw, "skipping non UTF-8 file name");
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Parse a newline-delimited key list.
pub fn parse_key_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
