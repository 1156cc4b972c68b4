//! Archiver: sealed log file → single-member zip archive
//!
//! Archive layout:
//! - one deflated member, named after the sealed file, byte-identical to it
//! - archive comment: JSON [`ArchiveMeta`] with the logical creation time
//!
//! The zip is written to `<name>.zip.tmp` and renamed into place once complete,
//! so a concurrent scan only ever sees finished archives. The source file is
//! removed only after the rename succeeded.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::writer::SealedFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Fixed suffix appended to a sealed file's name
pub const ARCHIVE_SUFFIX: &str = ".zip";

const TMP_SUFFIX: &str = ".tmp";

/// Metadata persisted in the archive comment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveMeta {
    /// When the archive was created; retention age is measured from here
    pub created_time: DateTime<Utc>,
    /// Data rows in the sealed file
    pub source_row_count: u64,
    /// File name of the archived member
    pub source: String,
}

/// An archive as found in the archive store
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    /// Logical creation time, or modification time when `meta` is absent
    pub created_time: DateTime<Utc>,
    /// Persisted metadata, if the archive carries any
    pub meta: Option<ArchiveMeta>,
    pub size_bytes: u64,
}

impl ArchiveInfo {
    /// Read an archive's metadata, falling back to file modification time.
    pub fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let fs_meta = std::fs::metadata(&path)?;

        let meta = match read_meta(&path) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::debug!("No readable metadata in {:?}: {}", path, e);
                None
            }
        };

        let created_time = match &meta {
            Some(m) => m.created_time,
            None => DateTime::<Utc>::from(fs_meta.modified()?),
        };

        Ok(Self {
            path,
            created_time,
            meta,
            size_bytes: fs_meta.len(),
        })
    }

    /// Data rows in the archived file, when known
    pub fn source_row_count(&self) -> Option<u64> {
        self.meta.as_ref().map(|m| m.source_row_count)
    }
}

/// Path of the archive for `source` inside `archive_dir`
pub fn archive_path_for(archive_dir: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    archive_dir.join(format!("{}{}", name, ARCHIVE_SUFFIX))
}

/// True for finished archives (not temp files, not other files)
pub fn is_archive(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(ARCHIVE_SUFFIX))
        .unwrap_or(false)
}

/// Compresses sealed files into the archive store
#[derive(Debug, Clone)]
pub struct Archiver {
    archive_dir: PathBuf,
}

impl Archiver {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Compress `sealed` into an archive, then delete the uncompressed file.
    ///
    /// An existing archive with the same name is never replaced. On any
    /// failure the uncompressed file is left in place. If the source cannot be
    /// removed the new archive is removed again, so every row stays in exactly
    /// one place.
    pub fn archive(&self, sealed: &SealedFile, created: DateTime<Utc>) -> StorageResult<ArchiveInfo> {
        std::fs::create_dir_all(&self.archive_dir)?;

        let target = archive_path_for(&self.archive_dir, &sealed.path);
        if target.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("archive {:?} already exists", target),
            )
            .into());
        }
        let tmp = PathBuf::from(format!("{}{}", target.display(), TMP_SUFFIX));

        let meta = ArchiveMeta {
            created_time: created,
            source_row_count: sealed.rows_written,
            source: member_name(&sealed.path),
        };

        let written = write_zip(&sealed.path, &tmp, &meta)
            .and_then(|()| std::fs::rename(&tmp, &target).map_err(StorageError::from));
        if let Err(e) = written {
            if let Err(cleanup) = std::fs::remove_file(&tmp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial archive {:?}: {}", tmp, cleanup);
                }
            }
            return Err(e);
        }

        if let Err(e) = std::fs::remove_file(&sealed.path) {
            tracing::error!(
                "Archived {:?} but could not remove it ({}); discarding {:?}",
                sealed.path,
                e,
                target
            );
            std::fs::remove_file(&target)?;
            return Err(e.into());
        }

        let size_bytes = std::fs::metadata(&target)?.len();
        tracing::info!(
            "Archived {:?} -> {:?} ({} rows, {} -> {} bytes)",
            sealed.path,
            target,
            sealed.rows_written,
            sealed.byte_size,
            size_bytes
        );

        Ok(ArchiveInfo {
            path: target,
            created_time: created,
            meta: Some(meta),
            size_bytes,
        })
    }

    /// Archive a closed log file that no writer owns (offline maintenance).
    pub fn archive_path(&self, path: &Path, created: DateTime<Utc>) -> StorageResult<ArchiveInfo> {
        let byte_size = std::fs::metadata(path)?.len();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let rows_written = reader.byte_records().filter(Result::is_ok).count() as u64;

        let sealed = SealedFile {
            path: path.to_path_buf(),
            start_time: created,
            rows_written,
            byte_size,
        };
        self.archive(&sealed, created)
    }

    /// All finished archives in the store, oldest first.
    ///
    /// A missing archive directory is an empty store.
    pub fn list(&self) -> StorageResult<Vec<ArchiveInfo>> {
        let entries = match std::fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || !is_archive(&path) {
                continue;
            }
            match ArchiveInfo::load(&path) {
                Ok(info) => archives.push(info),
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!("Skipping archive {:?}: {}", path, e),
            }
        }

        archives.sort_by(|a, b| {
            a.created_time
                .cmp(&b.created_time)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(archives)
    }
}

/// Decompress the single member of an archive.
pub fn read_member(path: &Path) -> StorageResult<Vec<u8>> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    if archive.len() == 0 {
        return Err(StorageError::Archive(zip::result::ZipError::FileNotFound));
    }
    let mut member = archive.by_index(0)?;
    let mut data = Vec::with_capacity(member.size() as usize);
    member.read_to_end(&mut data)?;
    Ok(data)
}

fn read_meta(path: &Path) -> StorageResult<Option<ArchiveMeta>> {
    let archive = ZipArchive::new(File::open(path)?)?;
    let comment = archive.comment();
    if comment.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(comment)?))
}

fn write_zip(source: &Path, tmp: &Path, meta: &ArchiveMeta) -> StorageResult<()> {
    let mut input = File::open(source)?;
    let output = File::create(tmp)?;

    let mut zip = ZipWriter::new(output);
    zip.set_comment(serde_json::to_string(meta)?);

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(meta.source.clone(), options)?;
    io::copy(&mut input, &mut zip)?;

    let output = zip.finish()?;
    output.sync_all()?;
    Ok(())
}

fn member_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log.csv".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    const CONTENT: &str = "timestamp,sensor_id,value,unit\n\
        2024-03-01T08:00:00Z,temp_01,20.1,°C\n\
        2024-03-01T08:00:01Z,temp_01,20.5,°C\n";

    fn sealed(path: &Path) -> SealedFile {
        std::fs::write(path, CONTENT).unwrap();
        SealedFile {
            path: path.to_path_buf(),
            start_time: Utc::now(),
            rows_written: 2,
            byte_size: CONTENT.len() as u64,
        }
    }

    #[test]
    fn test_archive_roundtrip_and_source_removed() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("sensors_1.csv");
        let archiver = Archiver::new(dir.path().join("archive"));

        let created = Utc::now();
        let info = archiver.archive(&sealed(&source), created).unwrap();

        assert!(!source.exists());
        assert_eq!(info.path, dir.path().join("archive/sensors_1.csv.zip"));
        assert_eq!(info.source_row_count(), Some(2));

        let member = read_member(&info.path).unwrap();
        assert_eq!(member, CONTENT.as_bytes());

        let loaded = ArchiveInfo::load(&info.path).unwrap();
        assert_eq!(loaded.created_time, created);
        assert_eq!(loaded.meta.unwrap().source, "sensors_1.csv");
    }

    #[test]
    fn test_archive_failure_keeps_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("sensors_1.csv");
        let sealed = sealed(&source);

        // A regular file where the archive directory should be
        let blocked = dir.path().join("archive");
        std::fs::write(&blocked, b"not a directory").unwrap();
        let archiver = Archiver::new(&blocked);

        assert!(archiver.archive(&sealed, Utc::now()).is_err());
        assert_eq!(std::fs::read_to_string(&source).unwrap(), CONTENT);
    }

    #[test]
    fn test_list_ignores_temp_and_foreign_files() {
        let dir = tempdir().unwrap();
        let archive_dir = dir.path().join("archive");
        let archiver = Archiver::new(&archive_dir);

        let now = Utc::now();
        archiver
            .archive(&sealed(&dir.path().join("b.csv")), now)
            .unwrap();
        archiver
            .archive(&sealed(&dir.path().join("a.csv")), now - Duration::days(1))
            .unwrap();
        std::fs::write(archive_dir.join("c.csv.zip.tmp"), b"partial").unwrap();
        std::fs::write(archive_dir.join("notes.txt"), b"hello").unwrap();

        let archives = archiver.list().unwrap();
        assert_eq!(archives.len(), 2);
        assert_eq!(archives[0].path, archive_dir.join("a.csv.zip"));
        assert_eq!(archives[1].path, archive_dir.join("b.csv.zip"));
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let archiver = Archiver::new(dir.path().join("nope"));
        assert!(archiver.list().unwrap().is_empty());
    }

    #[test]
    fn test_archive_path_counts_rows() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("orphan.csv");
        std::fs::write(&source, CONTENT).unwrap();

        let archiver = Archiver::new(dir.path().join("archive"));
        let info = archiver.archive_path(&source, Utc::now()).unwrap();
        assert_eq!(info.source_row_count(), Some(2));
        assert!(!source.exists());
    }

    #[test]
    fn test_existing_archive_is_not_replaced() {
        let dir = tempdir().unwrap();
        let archive_dir = dir.path().join("archive");
        let archiver = Archiver::new(&archive_dir);
        let source = dir.path().join("sensors_1.csv");

        let first = archiver.archive(&sealed(&source), Utc::now()).unwrap();

        // Same name again, different content
        std::fs::write(&source, "timestamp,sensor_id,value,unit\n").unwrap();
        let second = SealedFile {
            path: source.clone(),
            start_time: Utc::now(),
            rows_written: 0,
            byte_size: 31,
        };
        let err = archiver.archive(&second, Utc::now()).unwrap_err();
        assert!(matches!(err, StorageError::Io(ref e) if e.kind() == io::ErrorKind::AlreadyExists));

        assert!(source.exists());
        assert_eq!(read_member(&first.path).unwrap(), CONTENT.as_bytes());
        let names: Vec<_> = std::fs::read_dir(&archive_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("sensors_1.csv.zip")]);
    }
}
