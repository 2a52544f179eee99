//! Single-writer archive container.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use tar::{Builder, EntryType, Header};

use super::{archive_name, validate_entry_name, ArchiveError, SealedArchive};

type TarSink = Builder<GzEncoder<BufWriter<File>>>;

/// Writes one `.tar.gz` archive.
///
/// Entries are opened with [`begin_entry`](Self::begin_entry), filled through
/// the returned [`PendingEntry`] (which implements [`Write`]), and appended
/// with [`commit`](Self::commit). Tar headers carry the entry size, so entry
/// bytes are spooled to an anonymous temp file next to the archive until the
/// commit; they are never held in memory.
///
/// # Example
///
/// ```no_run
/// use collate_core::archive::ArchiveWriter;
/// use std::io::Write;
///
/// let mut writer = ArchiveWriter::create("downloads".as_ref(), "out").unwrap();
/// let mut entry = writer.begin_entry("a.png", chrono::Utc::now()).unwrap();
/// entry.write_all(b"...").unwrap();
/// writer.commit(entry).unwrap();
/// let sealed = writer.seal().unwrap();
/// println!("{}", sealed.path().display());
/// ```
pub struct ArchiveWriter {
    name: String,
    path: PathBuf,
    spool_dir: PathBuf,
    tar: TarSink,
    reserved: HashSet<String>,
    committed: Vec<String>,
}

impl ArchiveWriter {
    /// Create a new archive in `dir`, named after the current time.
    pub fn create(dir: &Path, prefix: &str) -> Result<Self, ArchiveError> {
        let name = archive_name(dir, prefix, Utc::now());
        Self::create_named(dir, &name)
    }

    /// Create a new archive with an explicit file name. Fails if it exists.
    pub fn create_named(dir: &Path, name: &str) -> Result<Self, ArchiveError> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| ArchiveError::Create {
                path: path.display().to_string(),
                source,
            })?;

        let encoder = GzBuilder::new().write(BufWriter::new(file), Compression::default());

        Ok(Self {
            name: name.to_string(),
            path,
            spool_dir: dir.to_path_buf(),
            tar: Builder::new(encoder),
            reserved: HashSet::new(),
            committed: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries appended so far.
    pub fn entry_count(&self) -> usize {
        self.committed.len()
    }

    /// Open a new entry.
    ///
    /// Fails with [`ArchiveError::EntryConflict`] when the name is invalid or
    /// was already opened in this archive. A name stays claimed even if its
    /// entry is later dropped without a commit.
    pub fn begin_entry(
        &mut self,
        name: &str,
        modified: DateTime<Utc>,
    ) -> Result<PendingEntry, ArchiveError> {
        validate_entry_name(name).map_err(|reason| ArchiveError::EntryConflict {
            name: name.to_string(),
            reason,
        })?;

        if !self.reserved.insert(name.to_string()) {
            return Err(ArchiveError::EntryConflict {
                name: name.to_string(),
                reason: "an entry with this name already exists".to_string(),
            });
        }

        Ok(PendingEntry {
            name: name.to_string(),
            modified,
            spool_dir: self.spool_dir.clone(),
            spool: None,
            len: 0,
        })
    }

    /// Append a pending entry to the container. Returns the entry size.
    ///
    /// A failed commit leaves the container in an unknown state; callers
    /// should stop writing and discard the archive.
    pub fn commit(&mut self, mut entry: PendingEntry) -> Result<u64, ArchiveError> {
        if !self.reserved.contains(&entry.name) {
            return Err(ArchiveError::EntryConflict {
                name: entry.name,
                reason: "entry was not opened by this archive".to_string(),
            });
        }

        let len = entry.len;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(len);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(entry.modified.timestamp().max(0) as u64);

        let write_err = |source| ArchiveError::Write {
            name: entry.name.clone(),
            source,
        };

        match entry.spool.take() {
            Some(mut spool) => {
                spool.flush().map_err(write_err)?;
                spool.seek(SeekFrom::Start(0)).map_err(write_err)?;
                self.tar
                    .append_data(&mut header, &entry.name, spool.take(len))
                    .map_err(write_err)?;
            }
            None => {
                self.tar
                    .append_data(&mut header, &entry.name, io::empty())
                    .map_err(write_err)?;
            }
        }

        self.committed.push(entry.name);
        Ok(len)
    }

    /// Finish the container. No entries can be added afterwards.
    pub fn seal(self) -> Result<SealedArchive, ArchiveError> {
        let Self {
            name,
            path,
            tar,
            committed,
            ..
        } = self;

        let seal_err = |source| ArchiveError::Seal {
            name: name.clone(),
            source,
        };

        let encoder = tar.into_inner().map_err(seal_err)?;
        let buffered = encoder.finish().map_err(seal_err)?;
        let file = buffered
            .into_inner()
            .map_err(|e| seal_err(e.into_error()))?;
        file.sync_all().map_err(seal_err)?;
        let size = file.metadata().map_err(seal_err)?.len();

        Ok(SealedArchive::new(name, path, size, committed))
    }
}

/// An entry that has been opened but not yet appended.
///
/// Bytes written here land in a spool file that is created on the first
/// non-empty write, so an entry with no content never touches the disk.
pub struct PendingEntry {
    name: String,
    modified: DateTime<Utc>,
    spool_dir: PathBuf,
    spool: Option<File>,
    len: u64,
}

impl PendingEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop everything written so far, leaving a zero-byte entry.
    pub fn discard_content(&mut self) {
        self.spool = None;
        self.len = 0;
    }

    /// Append `chunk` from async code. The spool file is created and written
    /// on the blocking pool.
    ///
    /// If the write fails, or the future is dropped before it finishes, the
    /// entry is left empty.
    pub async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let spool = self.spool.take();
        let written = std::mem::take(&mut self.len);
        let dir = self.spool_dir.clone();
        let added = chunk.len() as u64;

        let spool = tokio::task::spawn_blocking(move || -> io::Result<File> {
            let mut spool = match spool {
                Some(spool) => spool,
                None => tempfile::tempfile_in(&dir)?,
            };
            spool.write_all(&chunk)?;
            Ok(spool)
        })
        .await
        .map_err(io::Error::other)??;

        self.spool = Some(spool);
        self.len = written + added;
        Ok(())
    }
}

impl Write for PendingEntry {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let spool = match self.spool.take() {
            Some(spool) => spool,
            None => tempfile::tempfile_in(&self.spool_dir)?,
        };
        let spool = self.spool.insert(spool);
        let n = spool.write(buf)?;
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.spool.as_mut() {
            Some(spool) => spool.flush(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEntry")
            .field("name", &self.name)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ArchiveWriter::create_named(dir.path(), "out_1.tar.gz").unwrap();

        let mut entry = writer.begin_entry("index.html", fixed_time()).unwrap();
        entry.write_all(b"<html></html>").unwrap();
        assert_eq!(writer.commit(entry).unwrap(), 13);

        let mut entry = writer.begin_entry("a.png", fixed_time()).unwrap();
        entry.write_all(b"first chunk,").unwrap();
        entry.write_all(b"second chunk").unwrap();
        writer.commit(entry).unwrap();

        let sealed = writer.seal().unwrap();
        assert_eq!(sealed.name(), "out_1.tar.gz");
        assert_eq!(sealed.entry_names(), ["index.html", "a.png"]);

        let entries = sealed.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "index.html");
        assert_eq!(entries[1].data, b"first chunk,second chunk");
        assert_eq!(entries[1].modified, fixed_time());
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ArchiveWriter::create_named(dir.path(), "out.tar.gz").unwrap();

        let entry = writer.begin_entry("a.png", fixed_time()).unwrap();
        writer.commit(entry).unwrap();

        let err = writer.begin_entry("a.png", fixed_time()).unwrap_err();
        assert!(err.is_entry_conflict());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ArchiveWriter::create_named(dir.path(), "out.tar.gz").unwrap();
        let err = writer.begin_entry("../escape", fixed_time()).unwrap_err();
        assert!(matches!(err, ArchiveError::EntryConflict { .. }));
        // A rejected name does not claim anything
        assert_eq!(writer.entry_count(), 0);
    }

    #[test]
    fn test_zero_byte_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ArchiveWriter::create_named(dir.path(), "out.tar.gz").unwrap();

        let mut entry = writer.begin_entry("missing.png", fixed_time()).unwrap();
        entry.write_all(b"partial").unwrap();
        entry.discard_content();
        assert!(entry.is_empty());
        assert_eq!(writer.commit(entry).unwrap(), 0);

        let sealed = writer.seal().unwrap();
        let entries = sealed.read_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "missing.png");
        assert!(entries[0].data.is_empty());
    }

    #[test]
    fn test_empty_archive_seals() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArchiveWriter::create_named(dir.path(), "out.tar.gz").unwrap();
        let sealed = writer.seal().unwrap();
        assert!(sealed.size() > 0);
        assert!(sealed.read_entries().unwrap().is_empty());
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.tar.gz"), b"old").unwrap();
        let result = ArchiveWriter::create_named(dir.path(), "out.tar.gz");
        assert!(matches!(result, Err(ArchiveError::Create { .. })));
    }

    #[test]
    fn test_long_entry_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ArchiveWriter::create_named(dir.path(), "out.tar.gz").unwrap();
        let long = format!("{}/photo.png", "nested".repeat(40));
        let mut entry = writer.begin_entry(&long, fixed_time()).unwrap();
        entry.write_all(b"x").unwrap();
        writer.commit(entry).unwrap();

        let entries = writer.seal().unwrap().read_entries().unwrap();
        assert_eq!(entries[0].name, long);
    }

    #[tokio::test]
    async fn test_write_chunk_spools_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ArchiveWriter::create_named(dir.path(), "out.tar.gz").unwrap();

        let mut entry = writer.begin_entry("a.png", fixed_time()).unwrap();
        entry.write_chunk(Bytes::from_static(b"first,")).await.unwrap();
        entry.write_chunk(Bytes::new()).await.unwrap();
        entry.write_chunk(Bytes::from_static(b"second")).await.unwrap();
        assert_eq!(entry.len(), 12);
        writer.commit(entry).unwrap();

        let entries = writer.seal().unwrap().read_entries().unwrap();
        assert_eq!(entries[0].data, b"first,second");
    }

    #[tokio::test]
    async fn test_failed_chunk_write_leaves_entry_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ArchiveWriter::create_named(dir.path(), "out.tar.gz").unwrap();
        let mut entry = writer.begin_entry("a.png", fixed_time()).unwrap();
        entry.write_chunk(Bytes::from_static(b"kept")).await.unwrap();

        // No spool directory, so the first chunk cannot create a spool file
        let mut orphan = writer.begin_entry("b.png", fixed_time()).unwrap();
        orphan.spool_dir = dir.path().join("missing");
        assert!(orphan.write_chunk(Bytes::from_static(b"x")).await.is_err());
        assert!(orphan.is_empty());
        writer.commit(orphan).unwrap();

        entry.write_chunk(Bytes::from_static(b"!")).await.unwrap();
        writer.commit(entry).unwrap();

        let entries = writer.seal().unwrap().read_entries().unwrap();
        assert!(entries[0].data.is_empty());
        assert_eq!(entries[1].data, b"kept!");
    }

    #[test]
    fn test_commit_from_other_archive_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = ArchiveWriter::create_named(dir.path(), "one.tar.gz").unwrap();
        let mut second = ArchiveWriter::create_named(dir.path(), "two.tar.gz").unwrap();

        let entry = first.begin_entry("a.png", fixed_time()).unwrap();
        let err = second.commit(entry).unwrap_err();
        assert!(err.is_entry_conflict());
    }
}
