use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::manifest::ResolutionError;
use crate::store::StoreError;

/// Stage of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Assemble,
    Seal,
    Persist,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Assemble => "assemble",
            Stage::Seal => "seal",
            Stage::Persist => "persist",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// A failure that aborts the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The archive container could not be created or appended to.
    #[error("archive assembly failed: {0}")]
    Archive(#[source] ArchiveError),

    #[error("cannot write index entry: {0}")]
    Index(#[source] ArchiveError),

    #[error("cannot seal archive: {0}")]
    Seal(#[source] ArchiveError),

    #[error("failed to persist {archive}: {source}")]
    Persist {
        archive: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to publish link for {archive}: {source}")]
    Publish {
        archive: String,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Resolution(_) => Stage::Resolve,
            Self::Archive(_) | Self::Index(_) => Stage::Assemble,
            Self::Seal(_) => Stage::Seal,
            Self::Persist { .. } => Stage::Persist,
            Self::Publish { .. } => Stage::Publish,
        }
    }

    /// Process exit code for this failure.
    ///
    /// - 3: manifest could not be resolved
    /// - 1: any later stage
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Resolution(_) => 3,
            _ => 1,
        }
    }
}

/// Why a single object could not be copied into its entry.
///
/// Never fatal; recorded in the run report.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot spool object: {0}")]
    Spool(#[from] std::io::Error),

    #[error("fetch timed out after {}", humantime::format_duration(*.0))]
    TimedOut(Duration),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}
