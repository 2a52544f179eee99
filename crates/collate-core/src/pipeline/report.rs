//! Per-run report.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::publish::AccessLink;

/// What happened to one manifest key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryOutcome {
    /// Copied in full.
    Written { bytes: u64 },
    /// Fetch failed; a zero-byte entry was kept.
    Empty { reason: String },
    /// Fetch failed; the entry was left out.
    Omitted { reason: String },
    /// The entry could not be opened; no fetch was attempted.
    Skipped { reason: String },
}

impl EntryOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }

    /// Whether the key has an entry in the archive.
    pub fn in_archive(&self) -> bool {
        matches!(self, Self::Written { .. } | Self::Empty { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Written { .. } => None,
            Self::Empty { reason } | Self::Omitted { reason } | Self::Skipped { reason } => {
                Some(reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub key: String,
    #[serde(flatten)]
    pub outcome: EntryOutcome,
}

/// Tally of entry outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub written: usize,
    pub empty: usize,
    pub omitted: usize,
    pub skipped: usize,
}

impl OutcomeCounts {
    pub fn failed(&self) -> usize {
        self.empty + self.omitted + self.skipped
    }
}

/// Everything a completed run did, in manifest order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub archive: String,
    /// Compressed archive size in bytes.
    pub archive_size: u64,
    pub index_entry: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<EntryReport>,
}

impl RunReport {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for entry in &self.entries {
            match entry.outcome {
                EntryOutcome::Written { .. } => counts.written += 1,
                EntryOutcome::Empty { .. } => counts.empty += 1,
                EntryOutcome::Omitted { .. } => counts.omitted += 1,
                EntryOutcome::Skipped { .. } => counts.skipped += 1,
            }
        }
        counts
    }

    /// True if any key failed.
    pub fn is_partial(&self) -> bool {
        self.entries.iter().any(|e| !e.outcome.is_written())
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries.iter().filter(|e| !e.outcome.is_written())
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub link: AccessLink,
    /// Local copy of the archive, if kept.
    pub local_path: Option<PathBuf>,
    pub report: RunReport,
}
