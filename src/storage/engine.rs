//! Sensorlog Engine
//!
//! The engine orchestrates all components:
//! - Write path: Reading → pending buffer → flush → rotation check
//! - Rotation: seal → compress → prune → restart
//! - Read path: snapshot → live files + archives → filter
//!
//! All writer state sits behind one Tokio mutex. Rotation runs while holding
//! it, so ingestion waits for a rotation to finish and never sees a
//! half-sealed file.

use crate::storage::archive::{ArchiveInfo, Archiver};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::query::{ActiveSnapshot, LogReader};
use crate::storage::retention::{RetentionReaper, RetentionReport};
use crate::storage::rotation::{RotationPolicy, RotationTrigger};
use crate::storage::types::{LogQuery, Reading};
use crate::storage::writer::{
    next_log_path, validate_filename_pattern, ActiveLogFile, BufferedWriter, NameReuse,
};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::interval;

/// Configuration for the logging engine
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding the live CSV files
    pub log_dir: PathBuf,
    /// Directory holding archives (default: `<log_dir>/archive`)
    pub archive_dir: PathBuf,
    /// strftime pattern for new file names, formatted in UTC
    pub filename_pattern: String,
    /// Flush threshold in rows
    pub buffer_size: usize,
    /// Maximum age of an active file
    pub rotate_every: Duration,
    /// Maximum size of an active file in bytes
    pub max_size_bytes: u64,
    /// Maximum data rows per file (None = no row trigger)
    pub rotate_after_lines: Option<u64>,
    /// Archives older than this many days are pruned
    pub retention_days: u32,
    /// Period of the write-independent rotation check (None = off)
    pub rotation_check: Option<std::time::Duration>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("sensor_logs")
    }
}

impl LogConfig {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let log_dir = log_dir.into();
        Self {
            archive_dir: log_dir.join("archive"),
            log_dir,
            filename_pattern: "sensors_%Y%m%d_%H%M%S.csv".to_string(),
            buffer_size: 100,
            rotate_every: Duration::hours(24),
            max_size_bytes: 10 * 1024 * 1024, // 10 MB
            rotate_after_lines: None,
            retention_days: 30,
            rotation_check: None,
        }
    }

    /// Builder method: flush threshold
    pub fn buffer_size(mut self, rows: usize) -> Self {
        self.buffer_size = rows;
        self
    }

    /// Builder method: row trigger
    pub fn rotate_after_lines(mut self, rows: u64) -> Self {
        self.rotate_after_lines = Some(rows);
        self
    }

    /// Builder method: retention window
    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> StorageResult<()> {
        if self.buffer_size == 0 {
            return Err(StorageError::Config(
                "buffer_size must be at least 1".to_string(),
            ));
        }
        if self.rotate_after_lines == Some(0) {
            return Err(StorageError::Config(
                "rotate_after_lines must be at least 1".to_string(),
            ));
        }
        validate_filename_pattern(&self.filename_pattern)
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy::new(
            self.rotate_every,
            self.max_size_bytes,
            self.rotate_after_lines,
        )
    }
}

/// Internal state for the engine; reachable only through the lock
struct EngineState {
    writer: BufferedWriter,
    /// Between `start()` and `stop()`
    running: bool,
    /// Completed rotations since the engine was created
    rotations: u64,
    last_rotation_error: Option<String>,
}

/// The buffered, rotating, compressing sensor log
pub struct LogEngine {
    config: LogConfig,
    policy: RotationPolicy,
    archiver: Archiver,
    reaper: RetentionReaper,
    state: Mutex<EngineState>,
}

impl LogEngine {
    /// Create an engine and its directories. Call [`start`](Self::start)
    /// before logging.
    pub fn new(config: LogConfig) -> StorageResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.log_dir)?;
        std::fs::create_dir_all(&config.archive_dir)?;

        let archiver = Archiver::new(&config.archive_dir);
        let reaper = RetentionReaper::new(archiver.clone(), config.retention_days);

        Ok(Self {
            policy: config.rotation_policy(),
            state: Mutex::new(EngineState {
                writer: BufferedWriter::new(config.buffer_size),
                running: false,
                rotations: 0,
                last_rotation_error: None,
            }),
            archiver,
            reaper,
            config,
        })
    }

    /// Create and start an engine
    pub async fn open(config: LogConfig) -> StorageResult<Self> {
        let engine = Self::new(config)?;
        engine.start().await?;
        Ok(engine)
    }

    /// Open the active file. No-op if one is already open.
    ///
    /// A live file that already carries the current name is reopened and
    /// appended to.
    pub async fn start(&self) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        if !state.writer.is_open() {
            self.open_active(&mut state, NameReuse::Resume)?;
        }
        state.running = true;
        Ok(())
    }

    /// Flush pending readings and close the active file.
    ///
    /// Idempotent: stopping a stopped engine does nothing. If the final flush
    /// fails the engine stays running with its buffer intact, so `stop` can be
    /// retried.
    pub async fn stop(&self) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        if !state.running && !state.writer.is_open() {
            return Ok(());
        }

        if !state.writer.is_open() && state.writer.pending() > 0 {
            self.open_active(&mut state, NameReuse::Fresh)?;
        }

        if let Some(sealed) = state.writer.stop()? {
            tracing::info!(
                "Closed {:?} ({} rows, {} bytes)",
                sealed.path,
                sealed.rows_written,
                sealed.byte_size
            );
        }
        state.running = false;
        Ok(())
    }

    /// Ingestion entry point.
    ///
    /// The reading is buffered; once the buffer reaches `buffer_size` it is
    /// flushed and the rotation policy evaluated.
    ///
    /// If the flush this reading triggered fails, the error is returned and the
    /// reading stays pending: retry with [`flush`](Self::flush), do not
    /// resubmit. If the buffer is still full from an earlier failure, the
    /// flush is retried first and the new reading is rejected if that fails.
    ///
    /// A failed rotation does not fail the call; it is logged and shows up in
    /// [`LogStats::last_rotation_error`].
    pub async fn log_reading(&self, reading: Reading) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        if !state.running {
            return Err(StorageError::NotRunning);
        }

        if state.writer.is_full() {
            self.flush_locked(&mut state)?;
        }

        if state.writer.push(reading) {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// Convenience wrapper around [`log_reading`](Self::log_reading)
    pub async fn log(
        &self,
        sensor_id: &str,
        timestamp: DateTime<Utc>,
        value: f64,
        unit: &str,
    ) -> StorageResult<()> {
        self.log_reading(Reading::new(sensor_id, timestamp, value, unit))
            .await
    }

    /// Force a flush of the pending buffer, then evaluate rotation.
    ///
    /// Returns the number of rows written.
    pub async fn flush(&self) -> StorageResult<usize> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state)
    }

    /// Seal the active file now, regardless of the policy.
    ///
    /// Returns the new archive, or `None` if no file was open.
    pub async fn rotate(&self) -> StorageResult<Option<ArchiveInfo>> {
        let mut state = self.state.lock().await;
        self.rotate_locked(&mut state, RotationTrigger::Manual)
    }

    /// Evaluate the rotation policy without waiting for a flush.
    ///
    /// Lets low-traffic deployments honour the time trigger.
    pub async fn check_rotation(&self) -> StorageResult<Option<RotationTrigger>> {
        let mut state = self.state.lock().await;
        if !state.running {
            return Ok(None);
        }

        let trigger = match state.writer.file_state() {
            Some(file) => self.policy.evaluate(&file, Utc::now()),
            None => None,
        };

        if let Some(trigger) = trigger {
            self.rotate_locked(&mut state, trigger)?;
        }
        Ok(trigger)
    }

    /// Range scan over the active file and every archive.
    ///
    /// The returned reader is lazy and owns a snapshot taken under the lock;
    /// iterating it does not block ingestion.
    pub async fn read_logs(&self, query: LogQuery) -> StorageResult<LogReader> {
        let state = self.state.lock().await;
        let active = state
            .writer
            .active()
            .map(|file| (file.path().to_path_buf(), file.byte_size()));

        LogReader::scan(
            &self.config.log_dir,
            &self.archiver,
            active.as_ref().map(|(path, len)| ActiveSnapshot {
                path,
                committed_len: *len,
            }),
            query,
        )
    }

    /// Run a retention pass outside of a rotation
    pub async fn prune(&self) -> StorageResult<RetentionReport> {
        let _state = self.state.lock().await;
        self.reaper.prune(Utc::now())
    }

    /// Get engine statistics
    pub async fn stats(&self) -> LogStats {
        let (active_file, active_rows, active_bytes, pending, rotations, last_rotation_error, running) = {
            let state = self.state.lock().await;
            let active = state.writer.active();
            (
                active.map(|f| f.path().to_path_buf()),
                active.map(|f| f.rows_written()).unwrap_or(0),
                active.map(|f| f.byte_size()).unwrap_or(0),
                state.writer.pending(),
                state.rotations,
                state.last_rotation_error.clone(),
                state.running,
            )
        };

        let archives = match self.archiver.list() {
            Ok(archives) => archives,
            Err(e) => {
                tracing::warn!("Failed to list archives for stats: {}", e);
                Vec::new()
            }
        };

        LogStats {
            running,
            active_file,
            active_rows,
            active_bytes,
            pending,
            archive_count: archives.len(),
            archive_bytes: archives.iter().map(|a| a.size_bytes).sum(),
            rotations,
            last_rotation_error,
        }
    }

    /// Start the periodic rotation check.
    ///
    /// Ticks every `every` until `shutdown` flips; rotation errors are logged.
    pub fn start_rotation_timer(
        self: &Arc<Self>,
        every: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(every);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.check_rotation().await {
                            Ok(Some(trigger)) => {
                                tracing::debug!("Timer-driven rotation ({})", trigger);
                            }
                            Ok(None) => {}
                            Err(e) => tracing::error!("Timer-driven rotation failed: {}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Rotation timer stopped");
        })
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    /// Get the live log directory
    pub fn log_dir(&self) -> &Path {
        &self.config.log_dir
    }

    fn open_active(&self, state: &mut EngineState, reuse: NameReuse) -> StorageResult<()> {
        let now = Utc::now();
        let path = next_log_path(
            &self.config.log_dir,
            &self.config.archive_dir,
            &self.config.filename_pattern,
            now,
            reuse,
        )?;
        let file = ActiveLogFile::open(&path, now)?;
        state.writer.start(file);
        Ok(())
    }

    fn flush_locked(&self, state: &mut EngineState) -> StorageResult<usize> {
        if state.writer.pending() == 0 {
            return Ok(0);
        }

        // A previous rotation may have failed to start a new file
        if state.running && !state.writer.is_open() {
            self.open_active(state, NameReuse::Fresh)?;
        }

        let written = state.writer.flush()?;

        let trigger = state
            .writer
            .file_state()
            .and_then(|file| self.policy.evaluate(&file, Utc::now()));

        if let Some(trigger) = trigger {
            if let Err(e) = self.rotate_locked(state, trigger) {
                tracing::error!("Rotation failed: {}", e);
            }
        }

        Ok(written)
    }

    /// Seal + compress + prune + restart, with the lock held.
    ///
    /// A new active file is started even when compression or pruning fails.
    fn rotate_locked(
        &self,
        state: &mut EngineState,
        trigger: RotationTrigger,
    ) -> StorageResult<Option<ArchiveInfo>> {
        let sealed = match state.writer.stop()? {
            Some(sealed) => sealed,
            None => return Ok(None),
        };

        tracing::info!(
            "Rotating {:?} ({}: {} rows, {} bytes)",
            sealed.path,
            trigger,
            sealed.rows_written,
            sealed.byte_size
        );

        let now = Utc::now();
        let result = match self.archiver.archive(&sealed, now) {
            Ok(archive) => {
                state.rotations += 1;
                match self.reaper.prune(now) {
                    Ok(report) => {
                        if !report.removed.is_empty() {
                            tracing::info!(
                                "Retention removed {} archive(s)",
                                report.removed.len()
                            );
                        }
                        Ok(Some(archive))
                    }
                    Err(e) => Err(StorageError::rotation(&archive.path, e)),
                }
            }
            Err(e) => {
                tracing::error!(
                    "Compression of {:?} failed, keeping uncompressed file: {}",
                    sealed.path,
                    e
                );
                Err(StorageError::rotation(&sealed.path, e))
            }
        };

        if state.running {
            // A sealed file whose compression failed stays live; never reopen it
            if let Err(e) = self.open_active(state, NameReuse::Fresh) {
                tracing::error!("Failed to start a new log file after rotation: {}", e);
                if result.is_ok() {
                    state.last_rotation_error = Some(e.to_string());
                    return Err(StorageError::rotation(&sealed.path, e));
                }
            }
        }

        match &result {
            Ok(_) => state.last_rotation_error = None,
            Err(e) => state.last_rotation_error = Some(e.to_string()),
        }
        result
    }
}

/// Engine statistics
#[derive(Debug, Clone, PartialEq)]
pub struct LogStats {
    pub running: bool,
    pub active_file: Option<PathBuf>,
    pub active_rows: u64,
    pub active_bytes: u64,
    pub pending: usize,
    pub archive_count: usize,
    pub archive_bytes: u64,
    pub rotations: u64,
    pub last_rotation_error: Option<String>,
}

impl std::fmt::Display for LogStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self
            .active_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string());
        write!(
            f,
            "Active: {} ({} rows, {} bytes), Pending: {}, Archives: {} ({:.2} MB), Rotations: {}",
            active,
            self.active_rows,
            self.active_bytes,
            self.pending,
            self.archive_count,
            self.archive_bytes as f64 / (1024.0 * 1024.0),
            self.rotations
        )?;
        if let Some(err) = &self.last_rotation_error {
            write!(f, ", Last rotation error: {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
impl LogEngine {
    /// Start with an already opened active file, e.g. one backed by a failing sink
    async fn start_with(&self, file: ActiveLogFile) {
        let mut state = self.state.lock().await;
        state.writer.start(file);
        state.running = true;
    }
}
