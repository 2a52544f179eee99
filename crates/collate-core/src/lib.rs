//! Collect objects from a bucket into a single archive and publish it.
//!
//! A run resolves a [`Manifest`] of keys, writes a generated index entry,
//! streams every object into a `.tar.gz` container, seals it, uploads it to
//! a destination bucket and returns a time-bounded [`AccessLink`].

pub mod archive;
pub mod config;
pub mod index;
pub mod manifest;
pub mod pipeline;
pub mod publish;
pub mod store;

pub use archive::{ArchiveError, ArchiveWriter, EntryInfo, PendingEntry, SealedArchive};
pub use config::{CollateConfig, ConfigError, FetchFailurePolicy, PipelineSettings};
pub use index::{IndexTemplate, TemplateError};
pub use manifest::{Manifest, ManifestSource, ResolutionError};
pub use pipeline::{
    EntryOutcome, EntryReport, FetchError, Pipeline, PipelineError, RunOutcome, RunReport, Stage,
};
pub use publish::{AccessLink, AccessPublisher, DEFAULT_LINK_TTL};
pub use store::{ObjectStoreBackend, RemoteStore, StoreError, StoreSpec};
