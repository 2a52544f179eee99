//! Run orchestration.
//!
//! ```text
//! RESOLVE ──> ASSEMBLE ──> SEAL ──> PERSIST ──> PUBLISH ──> link
//!    │           │           │         │           │
//!    └───────────┴───────────┴─────────┴───────────┴──> PipelineError
//! ```
//!
//! Only per-key failures are recovered: a key whose entry cannot be opened
//! is skipped, and a key whose fetch fails is kept as a zero-byte entry or
//! omitted depending on [`FetchFailurePolicy`]. Every other failure ends the
//! run, and no link is issued for an archive that was not persisted.
//!
//! Fetches may run concurrently (`concurrency > 1`). Each entry spools into
//! its own file and commits happen in manifest order on the calling task, so
//! the container itself is only ever written by one writer.

pub mod error;
pub mod report;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::archive::{archive_names, ArchiveError, ArchiveWriter, PendingEntry, SealedArchive};
use crate::config::{FetchFailurePolicy, PipelineSettings};
use crate::manifest::{Manifest, ManifestSource};
use crate::publish::AccessPublisher;
use crate::store::RemoteStore;

pub use error::{FetchError, PipelineError, Stage};
pub use report::{EntryOutcome, EntryReport, OutcomeCounts, RunOutcome, RunReport};

/// Names tried before a destination clash becomes a persist failure.
const MAX_NAME_ATTEMPTS: usize = 16;

/// Assembles, persists and publishes one archive per [`run`](Self::run).
pub struct Pipeline {
    settings: PipelineSettings,
    source: Arc<dyn RemoteStore>,
    destination: Arc<dyn RemoteStore>,
    publisher: Arc<dyn AccessPublisher>,
}

/// A key whose entry is either open or was refused.
enum Slot {
    Open(PendingEntry),
    Refused(String),
}

/// A key after its fetch attempt.
enum Fetched {
    Complete(PendingEntry),
    Failed(PendingEntry, FetchError),
    Refused(String),
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        source: Arc<dyn RemoteStore>,
        destination: Arc<dyn RemoteStore>,
        publisher: Arc<dyn AccessPublisher>,
    ) -> Self {
        Self {
            settings,
            source,
            destination,
            publisher,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run once against `manifest_source`.
    pub async fn run(&self, manifest_source: &ManifestSource) -> Result<RunOutcome, PipelineError> {
        let started_at = Utc::now();

        let manifest = manifest_source.resolve(self.source.as_ref()).await?;
        tracing::info!(
            stage = %Stage::Resolve,
            source = %manifest_source,
            keys = manifest.len(),
            "manifest resolved"
        );

        // Candidates derive from the run start and skip names used locally.
        let work_dir = self.settings.work_dir.clone();
        let mut names = archive_names(&self.settings.archive_prefix, started_at)
            .filter(move |name| !work_dir.join(name).exists());

        let (writer, entries) = self.assemble(&manifest, started_at, &mut names).await?;

        let mut sealed = writer.seal().map_err(PipelineError::Seal)?;
        tracing::info!(
            stage = %Stage::Seal,
            archive = %sealed.name(),
            entries = sealed.entry_names().len(),
            bytes = sealed.size(),
            "archive sealed"
        );

        let uploaded = self.persist(&mut sealed, &mut names).await?;
        let archive_name = sealed.name().to_string();
        tracing::info!(
            stage = %Stage::Persist,
            archive = %archive_name,
            bytes = uploaded,
            "archive persisted"
        );

        let link = self
            .publisher
            .presign(sealed.name(), self.settings.link_ttl)
            .await
            .map_err(|source| PipelineError::Publish {
                archive: archive_name.clone(),
                source,
            })?;
        tracing::info!(
            stage = %Stage::Publish,
            archive = %archive_name,
            expires_at = %link.expires_at,
            "link issued"
        );

        let report = RunReport {
            archive: archive_name,
            archive_size: sealed.size(),
            index_entry: self.settings.index_entry.clone(),
            started_at,
            finished_at: Utc::now(),
            entries,
        };

        let local_path = if self.settings.keep_local {
            Some(sealed.path().to_path_buf())
        } else {
            let path = sealed.path().display().to_string();
            if let Err(e) = sealed.remove_local() {
                tracing::warn!(path = %path, error = %e, "failed to remove local archive");
            }
            None
        };

        Ok(RunOutcome {
            link,
            local_path,
            report,
        })
    }

    /// Create the archive, write the index, then one entry per key.
    async fn assemble(
        &self,
        manifest: &Manifest,
        modified: DateTime<Utc>,
        names: &mut (impl Iterator<Item = String> + Send),
    ) -> Result<(ArchiveWriter, Vec<EntryReport>), PipelineError> {
        let work_dir = &self.settings.work_dir;
        let create_err = |source| {
            PipelineError::Archive(ArchiveError::Create {
                path: work_dir.display().to_string(),
                source,
            })
        };
        std::fs::create_dir_all(work_dir).map_err(create_err)?;

        let name = names.next().ok_or_else(|| {
            create_err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "no free archive name",
            ))
        })?;
        let mut writer =
            ArchiveWriter::create_named(work_dir, &name).map_err(PipelineError::Archive)?;
        tracing::info!(
            stage = %Stage::Assemble,
            archive = %writer.name(),
            "archive opened"
        );

        if let Err(e) = self.write_index(&mut writer, manifest, modified) {
            abandon(writer);
            return Err(PipelineError::Index(e));
        }

        match self.write_entries(&mut writer, manifest, modified).await {
            Ok(entries) => Ok((writer, entries)),
            Err(e) => {
                abandon(writer);
                Err(PipelineError::Archive(e))
            }
        }
    }

    /// Upload `sealed` under its name. If the destination already holds an
    /// object of that name, the archive moves to the next free name first.
    async fn persist(
        &self,
        sealed: &mut SealedArchive,
        names: &mut (impl Iterator<Item = String> + Send),
    ) -> Result<u64, PipelineError> {
        let mut attempts = 1;
        loop {
            let source = match self.destination.put_file(sealed.name(), sealed.path()).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => e,
            };
            let next = if source.is_already_exists() && attempts < MAX_NAME_ATTEMPTS {
                names.next()
            } else {
                None
            };
            let Some(next) = next else {
                return Err(PipelineError::Persist {
                    archive: sealed.name().to_string(),
                    source,
                });
            };
            tracing::warn!(
                stage = %Stage::Persist,
                archive = %sealed.name(),
                next = %next,
                "archive name taken in destination, renaming"
            );
            sealed
                .rename(&next)
                .map_err(|e| PipelineError::Persist {
                    archive: sealed.name().to_string(),
                    source: e.into(),
                })?;
            attempts += 1;
        }
    }

    fn write_index(
        &self,
        writer: &mut ArchiveWriter,
        manifest: &Manifest,
        modified: DateTime<Utc>,
    ) -> Result<(), ArchiveError> {
        let name = &self.settings.index_entry;
        let body = self.settings.template.render(manifest.keys());

        let mut entry = writer.begin_entry(name, modified)?;
        entry
            .write_all(&body)
            .map_err(|source| ArchiveError::Write {
                name: name.clone(),
                source,
            })?;
        let bytes = writer.commit(entry)?;
        tracing::debug!(entry = %name, bytes, "index written");
        Ok(())
    }

    /// Returns one report per manifest key. Errors only when the container
    /// itself can no longer be written.
    async fn write_entries(
        &self,
        writer: &mut ArchiveWriter,
        manifest: &Manifest,
        modified: DateTime<Utc>,
    ) -> Result<Vec<EntryReport>, ArchiveError> {
        // Claim names up front so conflicts are decided in manifest order.
        let slots: Vec<(String, Slot)> = manifest
            .iter()
            .map(|key| {
                let slot = match writer.begin_entry(key, modified) {
                    Ok(entry) => Slot::Open(entry),
                    Err(e) => Slot::Refused(e.to_string()),
                };
                (key.clone(), slot)
            })
            .collect();

        let source = self.source.as_ref();
        let deadline = self.settings.fetch_timeout;
        let mut fetches = futures::stream::iter(slots)
            .map(move |(key, slot)| async move {
                let fetched = match slot {
                    Slot::Open(mut entry) => match fetch_entry(source, &key, &mut entry, deadline).await {
                        Ok(()) => Fetched::Complete(entry),
                        Err(e) => Fetched::Failed(entry, e),
                    },
                    Slot::Refused(reason) => Fetched::Refused(reason),
                };
                (key, fetched)
            })
            .buffered(self.settings.concurrency.max(1));

        let mut reports = Vec::with_capacity(manifest.len());
        while let Some((key, fetched)) = fetches.next().await {
            let outcome = match fetched {
                Fetched::Complete(entry) => {
                    let bytes = writer.commit(entry)?;
                    tracing::debug!(key = %key, bytes, "entry written");
                    EntryOutcome::Written { bytes }
                }
                Fetched::Failed(mut entry, e) => {
                    let reason = e.to_string();
                    entry.discard_content();
                    match self.settings.on_fetch_failure {
                        FetchFailurePolicy::KeepEmpty => {
                            writer.commit(entry)?;
                            tracing::warn!(key = %key, error = %reason, "fetch failed, keeping empty entry");
                            EntryOutcome::Empty { reason }
                        }
                        FetchFailurePolicy::Omit => {
                            tracing::warn!(key = %key, error = %reason, "fetch failed, omitting entry");
                            EntryOutcome::Omitted { reason }
                        }
                    }
                }
                Fetched::Refused(reason) => {
                    tracing::warn!(key = %key, error = %reason, "entry refused, skipping key");
                    EntryOutcome::Skipped { reason }
                }
            };
            reports.push(EntryReport { key, outcome });
        }

        Ok(reports)
    }
}

/// Stream `key` into `entry`, bounded by `deadline` if set.
async fn fetch_entry(
    source: &dyn RemoteStore,
    key: &str,
    entry: &mut PendingEntry,
    deadline: Option<Duration>,
) -> Result<(), FetchError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, copy_object(source, key, entry))
            .await
            .unwrap_or(Err(FetchError::TimedOut(limit))),
        None => copy_object(source, key, entry).await,
    }
}

async fn copy_object(
    source: &dyn RemoteStore,
    key: &str,
    entry: &mut PendingEntry,
) -> Result<(), FetchError> {
    let mut stream = source.get(key).await?;
    while let Some(chunk) = stream.next().await {
        entry.write_chunk(chunk?).await?;
    }
    Ok(())
}

/// Drop an unfinished archive and its file.
fn abandon(writer: ArchiveWriter) {
    let path = writer.path().to_path_buf();
    drop(writer);
    remove_partial(&path);
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove unfinished archive");
    }
}
