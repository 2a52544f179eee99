//! Archive container.
//!
//! An archive is a gzip-compressed tar file written once per run:
//! - the generated index entry (always first)
//! - one entry per manifest key, in manifest order
//!
//! # Lifecycle
//!
//! ```text
//! ArchiveWriter::create ──> begin_entry / commit ... ──> seal ──> SealedArchive
//! ```
//!
//! `seal` consumes the writer, so entries cannot be added afterwards, and
//! only a [`SealedArchive`] can be read back or uploaded.

pub mod reader;
pub mod writer;

use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use reader::{list_entries, read_entries, ArchiveEntry, EntryInfo, SealedArchive};
pub use writer::{ArchiveWriter, PendingEntry};

/// File extension of generated archives.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Errors raised by the archive writer and reader.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Entry name is invalid or already used in this archive.
    #[error("cannot add entry '{name}': {reason}")]
    EntryConflict { name: String, reason: String },

    /// The archive file could not be created.
    #[error("cannot create archive {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing an entry into the container failed.
    #[error("failed to write entry '{name}': {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Finalizing the container failed.
    #[error("failed to seal archive {name}: {source}")]
    Seal {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading a sealed archive failed.
    #[error("failed to read archive: {0}")]
    Read(#[source] std::io::Error),
}

impl ArchiveError {
    pub fn is_entry_conflict(&self) -> bool {
        matches!(self, Self::EntryConflict { .. })
    }
}

/// Candidate names for an archive created at `created`, most preferred first.
///
/// Yields `{prefix}_{unix_seconds}.tar.gz`, then `{prefix}_{unix_seconds}-1.tar.gz`,
/// `-2`, and so on.
pub fn archive_names(prefix: &str, created: DateTime<Utc>) -> impl Iterator<Item = String> {
    let stem = format!("{}_{}", prefix, created.timestamp());
    let plain = format!("{}.{}", stem, ARCHIVE_EXTENSION);
    std::iter::once(plain)
        .chain((1u32..).map(move |n| format!("{}-{}.{}", stem, n, ARCHIVE_EXTENSION)))
}

/// First name from [`archive_names`] not already present in `dir`.
pub fn archive_name(dir: &Path, prefix: &str, created: DateTime<Utc>) -> String {
    archive_names(prefix, created)
        .find(|candidate| !dir.join(candidate).exists())
        .unwrap_or_else(|| format!("{}_{}.{}", prefix, created.timestamp(), ARCHIVE_EXTENSION))
}

/// Check an entry name before it reaches the tar header.
pub(crate) fn validate_entry_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name is empty".to_string());
    }
    if name.contains('\0') {
        return Err("name contains a NUL byte".to_string());
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return Err("name is absolute".to_string());
    }
    if name.ends_with(['/', '\\']) {
        return Err("name denotes a directory".to_string());
    }
    for part in name.split(['/', '\\']) {
        match part {
            ".." => return Err("name escapes the archive root".to_string()),
            "." | "" => return Err("name is not in canonical form".to_string()),
            _ => {}
        }
    }
    Ok(())
}
