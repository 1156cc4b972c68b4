//! Wire format for network ingestion
//!
//! One newline-terminated JSON object per connection:
//!
//! ```text
//! {"sensor": "temp_01", "value": 21.4, "unit": "°C", "timestamp": "2024-03-01T08:00:00Z"}\n
//! ```
//!
//! A successful write is acknowledged with the literal bytes `ACK\n`.

use crate::storage::types::{format_timestamp, parse_timestamp};
use crate::storage::Reading;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Acknowledgement sent after a reading was accepted
pub const ACK: &[u8] = b"ACK\n";

/// Longest accepted payload line, newline included
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Errors decoding an ingestion payload
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    Timestamp(String),

    #[error("Field {0} must not be empty")]
    EmptyField(&'static str),

    #[error("Value is not a finite number")]
    NonFiniteValue,

    #[error("Payload exceeds 64 KiB")]
    TooLarge,

    #[error("Connection closed before a complete line was received")]
    Incomplete,
}

/// One reading as sent over the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestPayload {
    pub sensor: String,
    pub value: f64,
    pub unit: String,
    /// ISO-8601 timestamp
    pub timestamp: String,
}

impl IngestPayload {
    /// Decode one payload line (trailing newline optional)
    pub fn decode(line: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(line)?)
    }

    /// Encode as a newline-terminated line
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Validate and convert into a [`Reading`]
    pub fn into_reading(self) -> Result<Reading, ProtocolError> {
        if self.sensor.is_empty() {
            return Err(ProtocolError::EmptyField("sensor"));
        }
        if !self.value.is_finite() {
            return Err(ProtocolError::NonFiniteValue);
        }
        let timestamp = parse_timestamp(&self.timestamp)
            .map_err(|_| ProtocolError::Timestamp(self.timestamp.clone()))?;

        Ok(Reading::new(self.sensor, timestamp, self.value, self.unit))
    }
}

impl From<&Reading> for IngestPayload {
    fn from(reading: &Reading) -> Self {
        Self {
            sensor: reading.sensor_id.clone(),
            value: reading.value,
            unit: reading.unit.clone(),
            timestamp: format_timestamp(&reading.timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_decode_payload() {
        let line = r#"{"sensor": "temp_01", "value": 20.5, "unit": "°C", "timestamp": "2024-03-01T08:00:01"}"#;
        let reading = IngestPayload::decode(line.as_bytes()).unwrap().into_reading().unwrap();

        assert_eq!(reading.sensor_id, "temp_01");
        assert_eq!(reading.value, 20.5);
        assert_eq!(reading.unit, "°C");
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 1).unwrap()
        );
    }

    #[test]
    fn test_encode_is_one_line() {
        let reading = Reading::new(
            "hum_01",
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
            48.25,
            "%",
        );
        let line = IngestPayload::from(&reading).encode().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);

        let back = IngestPayload::decode(&line).unwrap().into_reading().unwrap();
        assert_eq!(back, reading);
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            IngestPayload::decode(b"not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            IngestPayload::decode(br#"{"sensor": "a", "value": 1}"#),
            Err(ProtocolError::Json(_))
        ));

        let bad_ts = IngestPayload {
            sensor: "a".into(),
            value: 1.0,
            unit: "u".into(),
            timestamp: "yesterday".into(),
        };
        assert!(matches!(
            bad_ts.into_reading(),
            Err(ProtocolError::Timestamp(_))
        ));

        let no_sensor = IngestPayload {
            sensor: String::new(),
            value: 1.0,
            unit: "u".into(),
            timestamp: "2024-03-01T08:00:00Z".into(),
        };
        assert!(matches!(
            no_sensor.into_reading(),
            Err(ProtocolError::EmptyField("sensor"))
        ));
    }
}
