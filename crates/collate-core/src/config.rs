//! Run configuration.
//!
//! Loaded from YAML; every field has a default so a config file only needs
//! the store URLs and a manifest source.
//!
//! ```yaml
//! source: s3://image-bucket/gallery
//! destination: s3://upload-bucket/archives
//! manifest:
//!   directory: images
//! link_ttl: 5m
//! fetch:
//!   concurrency: 4
//!   timeout: 30s
//! on_fetch_failure: keep_empty
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::{IndexTemplate, TemplateError, DEFAULT_INDEX_ENTRY};
use crate::manifest::ManifestSource;
use crate::publish::{check_ttl, DEFAULT_LINK_TTL};
use crate::store::StoreSpec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// What to do with an entry whose fetch failed after it was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailurePolicy {
    /// Keep the entry with zero bytes.
    #[default]
    KeepEmpty,
    /// Leave the entry out of the archive.
    Omit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Name of the index entry inside the archive.
    pub entry_name: String,
    /// Template file; the bundled template is used when unset.
    pub template: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            entry_name: DEFAULT_INDEX_ENTRY.to_string(),
            template: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Fetches in flight at once. 1 keeps the run strictly sequential.
    pub concurrency: usize,
    /// Per-object deadline. Expiry counts as a failed fetch.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollateConfig {
    /// Bucket the manifest keys are fetched from.
    pub source: Option<String>,
    /// Bucket the finished archive is persisted to.
    pub destination: Option<String>,
    pub manifest: Option<ManifestSource>,
    #[serde(with = "humantime_serde")]
    pub link_ttl: Duration,
    /// Local directory the archive is assembled in.
    pub work_dir: PathBuf,
    pub archive_prefix: String,
    /// Keep the local archive after upload.
    pub keep_local: bool,
    pub index: IndexConfig,
    pub fetch: FetchConfig,
    pub on_fetch_failure: FetchFailurePolicy,
}

impl Default for CollateConfig {
    fn default() -> Self {
        Self {
            source: None,
            destination: None,
            manifest: None,
            link_ttl: DEFAULT_LINK_TTL,
            work_dir: PathBuf::from("downloads"),
            archive_prefix: "out".to_string(),
            keep_local: true,
            index: IndexConfig::default(),
            fetch: FetchConfig::default(),
            on_fetch_failure: FetchFailurePolicy::default(),
        }
    }
}

impl CollateConfig {
    pub fn from_yaml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text, &path.display().to_string())
    }

    /// Check the configuration and produce everything a run needs.
    pub fn validate(&self) -> Result<ResolvedConfig, ConfigError> {
        let source = self
            .source
            .as_deref()
            .ok_or(ConfigError::Missing("source"))?;
        let source = StoreSpec::parse(source).map_err(|e| ConfigError::Invalid {
            field: "source",
            reason: e.to_string(),
        })?;

        let destination = self
            .destination
            .as_deref()
            .ok_or(ConfigError::Missing("destination"))?;
        let destination = StoreSpec::parse(destination).map_err(|e| ConfigError::Invalid {
            field: "destination",
            reason: e.to_string(),
        })?;

        let manifest = self.manifest.clone().ok_or(ConfigError::Missing("manifest"))?;

        check_ttl(self.link_ttl).map_err(|e| ConfigError::Invalid {
            field: "link_ttl",
            reason: e.to_string(),
        })?;

        if self.fetch.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.fetch.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Invalid {
                field: "fetch.timeout",
                reason: "must be positive".to_string(),
            });
        }
        if self.archive_prefix.is_empty() || self.archive_prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "archive_prefix",
                reason: "must be a non-empty file name fragment".to_string(),
            });
        }
        crate::archive::validate_entry_name(&self.index.entry_name).map_err(|reason| {
            ConfigError::Invalid {
                field: "index.entry_name",
                reason,
            }
        })?;

        let template = match &self.index.template {
            Some(path) => IndexTemplate::from_file(path)?,
            None => IndexTemplate::default(),
        };

        Ok(ResolvedConfig {
            source,
            destination,
            manifest,
            settings: PipelineSettings {
                link_ttl: self.link_ttl,
                work_dir: self.work_dir.clone(),
                archive_prefix: self.archive_prefix.clone(),
                keep_local: self.keep_local,
                index_entry: self.index.entry_name.clone(),
                template,
                concurrency: self.fetch.concurrency,
                fetch_timeout: self.fetch.timeout,
                on_fetch_failure: self.on_fetch_failure,
            },
        })
    }
}

/// A validated configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub source: StoreSpec,
    pub destination: StoreSpec,
    pub manifest: ManifestSource,
    pub settings: PipelineSettings,
}

/// Settings the orchestrator runs with.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub link_ttl: Duration,
    pub work_dir: PathBuf,
    pub archive_prefix: String,
    pub keep_local: bool,
    pub index_entry: String,
    pub template: IndexTemplate,
    pub concurrency: usize,
    pub fetch_timeout: Option<Duration>,
    pub on_fetch_failure: FetchFailurePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            link_ttl: DEFAULT_LINK_TTL,
            work_dir: PathBuf::from("downloads"),
            archive_prefix: "out".to_string(),
            keep_local: true,
            index_entry: DEFAULT_INDEX_ENTRY.to_string(),
            template: IndexTemplate::default(),
            concurrency: 1,
            fetch_timeout: None,
            on_fetch_failure: FetchFailurePolicy::default(),
        }
    }
}
