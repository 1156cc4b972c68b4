//! Buffered writer for the active log file
//!
//! Readings accumulate in an ordered pending buffer and are appended to the
//! active CSV file in arrival order when the buffer fills up or the writer is
//! stopped.
//!
//! Each flush encodes the whole buffer into one block and appends it with a
//! single write. If the write fails the file is truncated back to its last
//! committed length and the buffer is kept, so a retried flush neither loses
//! nor duplicates rows.

use crate::storage::archive::archive_path_for;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::rotation::FileState;
use crate::storage::types::{Reading, CSV_HEADER};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Byte sink behind the active file
///
/// `File` is the production sink; tests plug in failing sinks.
pub trait LogSink: Send {
    /// Append `bytes` at the end of the sink
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Cut the sink back to `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// The currently open, appendable log file
pub struct ActiveLogFile {
    path: PathBuf,
    start_time: DateTime<Utc>,
    rows_written: u64,
    byte_size: u64,
    sink: Box<dyn LogSink>,
}

impl std::fmt::Debug for ActiveLogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveLogFile")
            .field("path", &self.path)
            .field("start_time", &self.start_time)
            .field("rows_written", &self.rows_written)
            .field("byte_size", &self.byte_size)
            .finish()
    }
}

impl ActiveLogFile {
    /// Open `path` for appending, creating it with a header row if it is new.
    ///
    /// An existing non-empty file is appended to as-is; its data rows and size
    /// count towards rotation.
    pub fn open(path: impl AsRef<Path>, start_time: DateTime<Utc>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let existing_len = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let existing_rows = if existing_len > 0 {
            count_data_rows(&path)?
        } else {
            0
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut active = Self {
            path,
            start_time,
            rows_written: existing_rows,
            byte_size: existing_len,
            sink: Box::new(file),
        };

        if existing_len == 0 {
            let header = encode_header()?;
            active.sink.append(&header)?;
            active.byte_size = header.len() as u64;
            tracing::debug!("Created log file {:?}", active.path);
        } else {
            tracing::debug!(
                "Reopened log file {:?} ({} rows, {} bytes)",
                active.path,
                existing_rows,
                existing_len
            );
        }

        Ok(active)
    }

    /// Wrap an arbitrary sink that already holds `byte_size` bytes
    pub fn with_sink(
        path: impl Into<PathBuf>,
        start_time: DateTime<Utc>,
        byte_size: u64,
        sink: Box<dyn LogSink>,
    ) -> Self {
        Self {
            path: path.into(),
            start_time,
            rows_written: 0,
            byte_size,
            sink,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Bytes committed to the file so far (header included)
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn state(&self) -> FileState {
        FileState {
            start_time: self.start_time,
            byte_size: self.byte_size,
            rows_written: self.rows_written,
        }
    }

    fn append_rows(&mut self, rows: &[Reading]) -> StorageResult<()> {
        let block = encode_rows(rows)?;
        let committed = self.byte_size;

        if let Err(e) = self.sink.append(&block) {
            if let Err(undo) = self.sink.truncate(committed) {
                tracing::error!(
                    "Failed to roll back partial write to {:?}: {}",
                    self.path,
                    undo
                );
            }
            return Err(e.into());
        }

        self.byte_size += block.len() as u64;
        self.rows_written += rows.len() as u64;
        Ok(())
    }

    fn seal(self) -> SealedFile {
        SealedFile {
            path: self.path,
            start_time: self.start_time,
            rows_written: self.rows_written,
            byte_size: self.byte_size,
        }
    }
}

/// A closed log file, ready for archiving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedFile {
    pub path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub rows_written: u64,
    pub byte_size: u64,
}

/// Pending buffer plus the active file
///
/// Not synchronized on its own; the engine keeps it behind its lock.
#[derive(Debug)]
pub struct BufferedWriter {
    buffer: Vec<Reading>,
    buffer_size: usize,
    active: Option<ActiveLogFile>,
}

impl BufferedWriter {
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            active: None,
        }
    }

    /// Attach a freshly opened active file
    pub fn start(&mut self, file: ActiveLogFile) {
        tracing::info!("Logging to {:?}", file.path());
        self.active = Some(file);
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ActiveLogFile> {
        self.active.as_ref()
    }

    pub fn file_state(&self) -> Option<FileState> {
        self.active.as_ref().map(ActiveLogFile::state)
    }

    /// Number of readings waiting to be written
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.buffer_size
    }

    /// Queue a reading; returns true once the buffer has reached its limit
    pub fn push(&mut self, reading: Reading) -> bool {
        self.buffer.push(reading);
        self.is_full()
    }

    /// Write every pending reading to the active file, in arrival order.
    ///
    /// Returns the number of rows written. On error the buffer is untouched.
    pub fn flush(&mut self) -> StorageResult<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let file = self.active.as_mut().ok_or(StorageError::NotRunning)?;
        file.append_rows(&self.buffer)?;

        let written = self.buffer.len();
        self.buffer.clear();
        tracing::debug!("Flushed {} rows to {:?}", written, file.path());
        Ok(written)
    }

    /// Flush and close the active file.
    ///
    /// Returns the sealed file, or `None` if nothing was open. A failed flush
    /// leaves the file open and the buffer intact.
    pub fn stop(&mut self) -> StorageResult<Option<SealedFile>> {
        if self.active.is_none() {
            return Ok(None);
        }
        self.flush()?;
        Ok(self.active.take().map(ActiveLogFile::seal))
    }
}

/// How [`next_log_path`] treats a live file that already carries the name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameReuse {
    /// Reopen an existing live file (engine start)
    Resume,
    /// Always pick a name no live file uses (after a rotation)
    Fresh,
}

/// Path of the active file for `now`.
///
/// The name comes from `pattern` (strftime, UTC). A counter is inserted before
/// the extension while an archive with that name exists, and with
/// [`NameReuse::Fresh`] also while a live file with that name exists.
pub fn next_log_path(
    log_dir: &Path,
    archive_dir: &Path,
    pattern: &str,
    now: DateTime<Utc>,
    reuse: NameReuse,
) -> StorageResult<PathBuf> {
    let mut base = String::new();
    write!(base, "{}", now.format(pattern)).map_err(|_| invalid_pattern(pattern))?;

    let taken = |name: &str| {
        archive_path_for(archive_dir, Path::new(name)).exists()
            || (reuse == NameReuse::Fresh && log_dir.join(name).exists())
    };

    let mut name = base.clone();
    let mut counter = 0u32;
    while taken(&name) {
        counter += 1;
        name = with_counter(&base, counter);
    }

    Ok(log_dir.join(name))
}

/// Check a file name pattern: a plain `.csv` file name with at least one valid
/// strftime conversion.
pub fn validate_filename_pattern(pattern: &str) -> StorageResult<()> {
    if pattern.is_empty() {
        return Err(StorageError::Config(
            "filename_pattern must not be empty".to_string(),
        ));
    }
    if pattern.contains('/') || pattern.contains('\\') {
        return Err(StorageError::Config(
            "filename_pattern must be a plain file name".to_string(),
        ));
    }
    if !pattern.ends_with(".csv") {
        return Err(StorageError::Config(
            "filename_pattern must end with .csv".to_string(),
        ));
    }

    let mut has_conversion = false;
    for item in StrftimeItems::new(pattern) {
        match item {
            Item::Error => return Err(invalid_pattern(pattern)),
            Item::Numeric(..) | Item::Fixed(_) => has_conversion = true,
            _ => {}
        }
    }

    if has_conversion {
        Ok(())
    } else {
        Err(StorageError::Config(
            "filename_pattern must contain a time conversion such as %Y".to_string(),
        ))
    }
}

fn invalid_pattern(pattern: &str) -> StorageError {
    StorageError::Config(format!(
        "filename_pattern {:?} is not a valid strftime pattern",
        pattern
    ))
}

fn with_counter(name: &str, counter: u32) -> String {
    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{}-{}.{}",
            stem.to_string_lossy(),
            counter,
            ext.to_string_lossy()
        ),
        _ => format!("{}-{}", name, counter),
    }
}

fn encode_header() -> StorageResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

fn encode_rows(rows: &[Reading]) -> StorageResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(rows.len() * 48));
    for reading in rows {
        writer.serialize(reading.to_row())?;
    }
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

fn count_data_rows(path: &Path) -> StorageResult<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut count = 0u64;
    for record in reader.byte_records() {
        if record.is_ok() {
            count += 1;
        }
    }
    Ok(count)
}
