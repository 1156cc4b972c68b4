//! Core data types for the sensor log
//!
//! - `Reading`: a single timestamped sensor measurement
//! - `LogRow`: the on-disk CSV shape of a reading
//! - `LogQuery`: a time range plus optional sensor filter

use crate::storage::error::{StorageError, StorageResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Column names of the header row, in order.
pub const CSV_HEADER: [&str; 4] = ["timestamp", "sensor_id", "value", "unit"];

/// A single sensor measurement
///
/// Immutable once created; persisted exactly once, either as a row of the
/// active file or inside an archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// When the value was sampled
    pub timestamp: DateTime<Utc>,
    /// Producer identifier (e.g. "temp_01")
    pub sensor_id: String,
    /// The measured value
    pub value: f64,
    /// Unit of measurement (e.g. "°C", "hPa")
    pub unit: String,
}

impl Reading {
    pub fn new(
        sensor_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            sensor_id: sensor_id.into(),
            value,
            unit: unit.into(),
        }
    }

    /// Create a reading stamped with the current time
    pub fn now(sensor_id: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self::new(sensor_id, Utc::now(), value, unit)
    }

    pub(crate) fn to_row(&self) -> LogRow {
        LogRow {
            timestamp: format_timestamp(&self.timestamp),
            sensor_id: self.sensor_id.clone(),
            value: self.value,
            unit: self.unit.clone(),
        }
    }
}

/// One CSV row, column order matches [`CSV_HEADER`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LogRow {
    pub timestamp: String,
    pub sensor_id: String,
    pub value: f64,
    pub unit: String,
}

impl LogRow {
    pub fn into_reading(self) -> StorageResult<Reading> {
        Ok(Reading {
            timestamp: parse_timestamp(&self.timestamp)?,
            sensor_id: self.sensor_id,
            value: self.value,
            unit: self.unit,
        })
    }
}

/// Format a timestamp the way it is persisted (RFC 3339, UTC, `Z` suffix).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with any offset, and naive date-times without an offset
/// (taken as UTC).
pub fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let formats = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    for fmt in formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.and_utc());
        }
    }

    Err(StorageError::InvalidTimestamp(s.to_string()))
}

/// A range scan over the log: `start <= timestamp <= end`, optionally
/// restricted to one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sensor_id: Option<String>,
}

impl LogQuery {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            sensor_id: None,
        }
    }

    /// Builder method: restrict to one sensor
    pub fn sensor(mut self, sensor_id: impl Into<String>) -> Self {
        self.sensor_id = Some(sensor_id.into());
        self
    }

    /// Everything logged in the last `hours` hours
    pub fn last_hours(hours: i64) -> Self {
        let end = Utc::now();
        Self::new(end - chrono::Duration::hours(hours), end)
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.start > self.end {
            return Err(StorageError::InvalidTimeRange);
        }
        Ok(())
    }

    /// Check if a reading falls inside the range and matches the sensor filter
    pub fn matches(&self, reading: &Reading) -> bool {
        if reading.timestamp < self.start || reading.timestamp > self.end {
            return false;
        }
        match &self.sensor_id {
            Some(id) => &reading.sensor_id == id,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_timestamp_format_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        let s = format_timestamp(&ts);
        assert_eq!(s, "2024-05-01T12:30:15Z");
        assert_eq!(parse_timestamp(&s).unwrap(), ts);

        let precise = ts + Duration::microseconds(250);
        assert_eq!(
            parse_timestamp(&format_timestamp(&precise)).unwrap(),
            precise
        );
    }

    #[test]
    fn test_parse_naive_and_offset_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:30:15").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-05-01 12:30:15").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2024-05-01T14:30:15+02:00").unwrap(),
            expected
        );
        assert!(matches!(
            parse_timestamp("last tuesday"),
            Err(StorageError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_query_matches_inclusive_bounds() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let query = LogQuery::new(t0, t0 + Duration::seconds(10));

        assert!(query.matches(&Reading::new("a", t0, 1.0, "u")));
        assert!(query.matches(&Reading::new("b", t0 + Duration::seconds(10), 1.0, "u")));
        assert!(!query.matches(&Reading::new("a", t0 - Duration::seconds(1), 1.0, "u")));

        let query = query.sensor("a");
        assert!(query.matches(&Reading::new("a", t0, 1.0, "u")));
        assert!(!query.matches(&Reading::new("b", t0, 1.0, "u")));
    }

    #[test]
    fn test_query_validate() {
        let t0 = Utc::now();
        assert!(LogQuery::new(t0, t0).validate().is_ok());
        assert!(matches!(
            LogQuery::new(t0, t0 - Duration::seconds(1)).validate(),
            Err(StorageError::InvalidTimeRange)
        ));
    }
}
