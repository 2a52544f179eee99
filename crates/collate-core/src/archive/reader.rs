//! Reading sealed archives back.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use serde::Serialize;

use super::ArchiveError;

/// A finished archive on local disk.
///
/// Only obtainable from [`ArchiveWriter::seal`](super::ArchiveWriter::seal),
/// so holding one means the container is complete.
#[derive(Debug, Clone)]
pub struct SealedArchive {
    name: String,
    path: PathBuf,
    size: u64,
    entries: Vec<String>,
}

impl SealedArchive {
    pub(crate) fn new(name: String, path: PathBuf, size: u64, entries: Vec<String>) -> Self {
        Self {
            name,
            path,
            size,
            entries,
        }
    }

    /// Generated archive name, also the key it is persisted under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compressed size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Entry names in container order.
    pub fn entry_names(&self) -> &[String] {
        &self.entries
    }

    pub fn open(&self) -> Result<File, ArchiveError> {
        File::open(&self.path).map_err(ArchiveError::Read)
    }

    /// Read every entry, including content.
    pub fn read_entries(&self) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        read_entries(self.open()?)
    }

    /// Move the local file to `name` in the same directory. Never replaces
    /// an existing file.
    pub fn rename(&mut self, name: &str) -> std::io::Result<()> {
        let path = self.path.with_file_name(name);
        if path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            ));
        }
        std::fs::rename(&self.path, &path)?;
        self.name = name.to_string();
        self.path = path;
        Ok(())
    }

    /// Delete the local file.
    pub fn remove_local(self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)
    }
}

/// An entry with its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub modified: DateTime<Utc>,
    pub data: Vec<u8>,
}

/// Entry metadata without content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Read all entries of a `.tar.gz` stream.
pub fn read_entries<R: Read>(reader: R) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut out = Vec::new();

    for entry in archive.entries().map_err(ArchiveError::Read)? {
        let mut entry = entry.map_err(ArchiveError::Read)?;
        let name = entry_name(&entry)?;
        let modified = entry_mtime(&entry)?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data).map_err(ArchiveError::Read)?;
        out.push(ArchiveEntry {
            name,
            modified,
            data,
        });
    }

    Ok(out)
}

/// List entries of a `.tar.gz` stream without keeping their content.
pub fn list_entries<R: Read>(reader: R) -> Result<Vec<EntryInfo>, ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut out = Vec::new();

    for entry in archive.entries().map_err(ArchiveError::Read)? {
        let entry = entry.map_err(ArchiveError::Read)?;
        out.push(EntryInfo {
            name: entry_name(&entry)?,
            size: entry.size(),
            modified: entry_mtime(&entry)?,
        });
    }

    Ok(out)
}

fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String, ArchiveError> {
    let path = entry.path().map_err(ArchiveError::Read)?;
    Ok(path.to_string_lossy().into_owned())
}

fn entry_mtime<R: Read>(entry: &tar::Entry<'_, R>) -> Result<DateTime<Utc>, ArchiveError> {
    let secs = entry.header().mtime().map_err(ArchiveError::Read)?;
    Ok(Utc
        .timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_default())
}
