//! Retention reaper: time-bounded garbage collection of archives.

use crate::storage::archive::{ArchiveInfo, Archiver};
use crate::storage::error::StorageResult;
use chrono::{DateTime, Duration, Utc};
use std::io;
use std::path::PathBuf;

/// Outcome of one retention pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionReport {
    /// Archives examined
    pub scanned: usize,
    /// Archives deleted
    pub removed: Vec<PathBuf>,
    /// Expired archives that could not be deleted
    pub failed: Vec<PathBuf>,
}

impl RetentionReport {
    pub fn retained(&self) -> usize {
        self.scanned - self.removed.len() - self.failed.len()
    }
}

/// Deletes archives whose age exceeds the retention window
#[derive(Debug, Clone)]
pub struct RetentionReaper {
    archiver: Archiver,
    window: Duration,
}

impl RetentionReaper {
    pub fn new(archiver: Archiver, retention_days: u32) -> Self {
        Self {
            archiver,
            window: Duration::days(i64::from(retention_days)),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// An archive is expired once its age is strictly greater than the window.
    pub fn is_expired(&self, archive: &ArchiveInfo, now: DateTime<Utc>) -> bool {
        now - archive.created_time > self.window
    }

    /// Archives a pass at `now` would delete
    pub fn expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<ArchiveInfo>> {
        Ok(self
            .archiver
            .list()?
            .into_iter()
            .filter(|a| self.is_expired(a, now))
            .collect())
    }

    /// Delete every expired archive.
    ///
    /// Best-effort per archive: a failed deletion is logged and recorded, and
    /// the scan continues. Only failing to list the store is an error.
    pub fn prune(&self, now: DateTime<Utc>) -> StorageResult<RetentionReport> {
        let archives = self.archiver.list()?;
        let mut report = RetentionReport {
            scanned: archives.len(),
            ..Default::default()
        };

        for archive in archives.into_iter().filter(|a| self.is_expired(a, now)) {
            match std::fs::remove_file(&archive.path) {
                Ok(()) => {
                    tracing::info!(
                        "Removed expired archive {:?} (created {})",
                        archive.path,
                        archive.created_time
                    );
                    report.removed.push(archive.path);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    report.scanned -= 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to remove expired archive {:?}: {}", archive.path, e);
                    report.failed.push(archive.path);
                }
            }
        }

        if !report.removed.is_empty() || !report.failed.is_empty() {
            tracing::debug!(
                "Retention pass: {} scanned, {} removed, {} failed",
                report.scanned,
                report.removed.len(),
                report.failed.len()
            );
        }

        Ok(report)
    }
}
