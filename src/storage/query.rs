//! Query engine: lazy range scans over live files and archives
//!
//! A scan starts from a snapshot of the store: the live CSV files, the
//! committed length of the active file, and the archive list. Rows are then
//! pulled one file at a time:
//!
//! ```text
//! live files (name order) → archives (creation order)
//!   → CSV rows → parse → filter (range, sensor) → Reading
//! ```
//!
//! The active file is read only up to the length committed at snapshot time,
//! so a concurrent flush never produces a torn row. A live file sealed after
//! the snapshot is read from its archive instead; an archive pruned after the
//! snapshot is skipped. Results come out per file in file order, with no
//! global time ordering.

use crate::storage::archive::{archive_path_for, read_member, Archiver};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{LogQuery, LogRow, Reading};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

/// Extension of live (uncompressed) log files
pub const LIVE_EXTENSION: &str = "csv";

type Rows = csv::DeserializeRecordsIntoIter<Box<dyn Read + Send>, LogRow>;

/// One file to scan, as captured in the snapshot
#[derive(Debug, Clone, PartialEq)]
enum Source {
    Live {
        path: PathBuf,
        /// Committed length for the active file
        limit: Option<u64>,
        /// Where the file ends up if it gets sealed mid-scan
        archive: PathBuf,
    },
    Archive {
        path: PathBuf,
    },
}

impl Source {
    fn path(&self) -> &Path {
        match self {
            Source::Live { path, .. } | Source::Archive { path } => path,
        }
    }
}

/// The active file as seen at snapshot time: path and committed byte length
#[derive(Debug, Clone, Copy)]
pub struct ActiveSnapshot<'a> {
    pub path: &'a Path,
    pub committed_len: u64,
}

/// Lazy, finite iterator of readings matching a [`LogQuery`]
///
/// Malformed rows come out as `Err` items and the scan carries on with the
/// next row.
pub struct LogReader {
    query: LogQuery,
    sources: VecDeque<Source>,
    current: Option<Rows>,
    current_path: Option<PathBuf>,
}

impl LogReader {
    /// Snapshot `log_dir` and the archive store and prepare a scan.
    ///
    /// Only the listing happens here; no file is opened until the first
    /// `next()`.
    pub fn scan(
        log_dir: &Path,
        archiver: &Archiver,
        active: Option<ActiveSnapshot<'_>>,
        query: LogQuery,
    ) -> StorageResult<Self> {
        query.validate()?;

        let mut sources = VecDeque::new();

        for path in live_files(log_dir)? {
            let limit = active
                .filter(|a| a.path == path.as_path())
                .map(|a| a.committed_len);
            sources.push_back(Source::Live {
                archive: archive_path_for(archiver.dir(), &path),
                path,
                limit,
            });
        }

        for archive in archiver.list()? {
            sources.push_back(Source::Archive { path: archive.path });
        }

        tracing::debug!("Scanning {} files for {:?}", sources.len(), query);

        Ok(Self {
            query,
            sources,
            current: None,
            current_path: None,
        })
    }

    /// Files not yet opened
    pub fn remaining_files(&self) -> usize {
        self.sources.len()
    }

    fn open_next(&mut self) -> Option<StorageResult<()>> {
        loop {
            let source = self.sources.pop_front()?;
            match open_source(&source) {
                Ok(Some(rows)) => {
                    self.current = Some(rows);
                    self.current_path = Some(source.path().to_path_buf());
                    return Some(Ok(()));
                }
                Ok(None) => {
                    tracing::debug!("{:?} vanished before it could be read", source.path());
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Iterator for LogReader {
    type Item = StorageResult<Reading>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(rows) = self.current.as_mut() {
                match rows.next() {
                    Some(Ok(row)) => {
                        if let Some(id) = &self.query.sensor_id {
                            if &row.sensor_id != id {
                                continue;
                            }
                        }
                        match row.into_reading() {
                            Ok(reading) if self.query.matches(&reading) => {
                                return Some(Ok(reading))
                            }
                            Ok(_) => continue,
                            Err(e) => return Some(Err(e)),
                        }
                    }
                    Some(Err(e)) => {
                        if e.is_io_error() {
                            // The reader cannot make progress past an I/O error
                            self.current = None;
                        }
                        tracing::warn!("Bad row in {:?}: {}", self.current_path, e);
                        return Some(Err(StorageError::Csv(e)));
                    }
                    None => {
                        self.current = None;
                        self.current_path = None;
                    }
                }
            }

            match self.open_next()? {
                Ok(()) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Live log files in `log_dir`, sorted by name
pub fn live_files(log_dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|e| e == LIVE_EXTENSION).unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// The most recently written live file in `log_dir`.
///
/// Chosen by modification time: counter suffixes (`x-1.csv` < `x.csv`) break
/// name order.
pub fn newest_live_file(log_dir: &Path) -> StorageResult<Option<PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for path in live_files(log_dir)? {
        let modified = std::fs::metadata(&path)?.modified()?;
        if newest.as_ref().map_or(true, |(t, _)| modified >= *t) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

fn rows(reader: Box<dyn Read + Send>) -> Rows {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader)
        .into_deserialize()
}

fn open_source(source: &Source) -> StorageResult<Option<Rows>> {
    match source {
        Source::Live {
            path,
            limit,
            archive,
        } => match File::open(path) {
            Ok(file) => {
                let reader: Box<dyn Read + Send> = match limit {
                    Some(len) => Box::new(file.take(*len)),
                    None => Box::new(file),
                };
                Ok(Some(rows(reader)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Sealed since the snapshot
                match read_member(archive) {
                    Ok(mut data) => {
                        if let Some(len) = limit {
                            data.truncate(*len as usize);
                        }
                        Ok(Some(rows(Box::new(Cursor::new(data)))))
                    }
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e.into()),
        },
        Source::Archive { path } => match read_member(path) {
            Ok(data) => Ok(Some(rows(Box::new(Cursor::new(data))))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        },
    }
}
