//! Rotation policy
//!
//! A pure decision over the active file's state. The engine evaluates it after
//! every flush; nothing here touches the filesystem.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Snapshot of the active file as seen by the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileState {
    pub start_time: DateTime<Utc>,
    pub byte_size: u64,
    pub rows_written: u64,
}

/// Why a file was (or should be) sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationTrigger {
    /// The file has been open longer than the rotation interval
    Elapsed,
    /// The file reached the size limit
    Size,
    /// The file reached the row limit
    Rows,
    /// Requested explicitly by an operator or caller
    Manual,
}

impl fmt::Display for RotationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationTrigger::Elapsed => write!(f, "elapsed"),
            RotationTrigger::Size => write!(f, "size"),
            RotationTrigger::Rows => write!(f, "rows"),
            RotationTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Three-trigger rotation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Maximum age of an active file
    pub interval: Duration,
    /// Maximum size of an active file in bytes
    pub max_bytes: u64,
    /// Maximum data rows per file; `None` disables the row trigger
    pub max_rows: Option<u64>,
}

impl RotationPolicy {
    pub fn new(interval: Duration, max_bytes: u64, max_rows: Option<u64>) -> Self {
        Self {
            interval,
            max_bytes,
            max_rows,
        }
    }

    /// Decide whether `state` must be sealed at `now`.
    ///
    /// Triggers are checked in order elapsed, size, rows; the first that fires
    /// is reported.
    pub fn evaluate(&self, state: &FileState, now: DateTime<Utc>) -> Option<RotationTrigger> {
        if now - state.start_time >= self.interval {
            return Some(RotationTrigger::Elapsed);
        }
        if state.byte_size >= self.max_bytes {
            return Some(RotationTrigger::Size);
        }
        match self.max_rows {
            Some(limit) if state.rows_written >= limit => Some(RotationTrigger::Rows),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> RotationPolicy {
        RotationPolicy::new(Duration::hours(24), 1024, Some(5))
    }

    fn state(start: DateTime<Utc>, bytes: u64, rows: u64) -> FileState {
        FileState {
            start_time: start,
            byte_size: bytes,
            rows_written: rows,
        }
    }

    #[test]
    fn test_no_trigger_below_thresholds() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = t0 + Duration::hours(23);
        assert_eq!(policy().evaluate(&state(t0, 1023, 4), now), None);
    }

    #[test]
    fn test_elapsed_trigger_at_boundary() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = t0 + Duration::hours(24);
        assert_eq!(
            policy().evaluate(&state(t0, 0, 0), now),
            Some(RotationTrigger::Elapsed)
        );
    }

    #[test]
    fn test_size_trigger() {
        let t0 = Utc::now();
        assert_eq!(
            policy().evaluate(&state(t0, 1024, 0), t0),
            Some(RotationTrigger::Size)
        );
    }

    #[test]
    fn test_row_trigger() {
        let t0 = Utc::now();
        assert_eq!(
            policy().evaluate(&state(t0, 10, 5), t0),
            Some(RotationTrigger::Rows)
        );
    }

    #[test]
    fn test_row_trigger_disabled_without_limit() {
        let t0 = Utc::now();
        let policy = RotationPolicy::new(Duration::hours(1), u64::MAX, None);
        assert_eq!(policy.evaluate(&state(t0, 10, 1_000_000), t0), None);
    }
}
