//! Simulated sensors
//!
//! Each kind follows a daily profile keyed on the local hour of the sample
//! time, plus uniform noise. Values are clamped to the kind's range and
//! rounded to two decimals.

use crate::sensors::{ReadingSource, SensorError};
use crate::storage::Reading;
use chrono::{DateTime, Local, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Physical quantity a simulated sensor measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Pressure,
    Light,
}

impl SensorKind {
    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Pressure => "hPa",
            SensorKind::Light => "lx",
        }
    }

    /// Inclusive value range `(min, max)`
    pub fn range(&self) -> (f64, f64) {
        match self {
            SensorKind::Temperature => (-20.0, 50.0),
            SensorKind::Humidity => (0.0, 100.0),
            SensorKind::Pressure => (950.0, 1050.0),
            SensorKind::Light => (0.0, 10_000.0),
        }
    }

    /// Draw a value for the given local hour (0-23).
    pub fn sample<R: Rng + ?Sized>(&self, hour: u32, rng: &mut R) -> f64 {
        let h = f64::from(hour);
        let raw = match self {
            SensorKind::Temperature => {
                let cycle = (2.0 * PI * h / 24.0).sin();
                20.0 + 8.0 * cycle + rng.gen_range(-1.5..=1.5)
            }
            SensorKind::Humidity => {
                let base = match hour {
                    5..=8 | 18..=21 => rng.gen_range(65.0..=85.0),
                    9..=17 => rng.gen_range(35.0..=55.0),
                    _ => rng.gen_range(55.0..=75.0),
                };
                base + rng.gen_range(-4.0..=4.0)
            }
            SensorKind::Pressure => {
                let base = if (6..18).contains(&hour) {
                    rng.gen_range(1000.0..=1020.0)
                } else {
                    rng.gen_range(980.0..=1005.0)
                };
                base + rng.gen_range(-5.0..=5.0)
            }
            SensorKind::Light => {
                let base = if (6..=18).contains(&hour) {
                    10_000.0 * (PI * (h - 6.0) / 12.0).sin()
                } else {
                    rng.gen_range(0.0..=20.0)
                };
                base + rng.gen_range(-100.0..=100.0)
            }
        };

        let (min, max) = self.range();
        round2(raw.clamp(min, max))
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Temperature => write!(f, "temperature"),
            SensorKind::Humidity => write!(f, "humidity"),
            SensorKind::Pressure => write!(f, "pressure"),
            SensorKind::Light => write!(f, "light"),
        }
    }
}

/// A synthetic sensor of one [`SensorKind`]
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    id: String,
    kind: SensorKind,
    active: bool,
    last_value: Option<f64>,
}

impl SimulatedSensor {
    /// Create an active sensor
    pub fn new(id: impl Into<String>, kind: SensorKind) -> Self {
        Self {
            id: id.into(),
            kind,
            active: true,
            last_value: None,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start(&mut self) {
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Most recent value, if the sensor has been read
    pub fn last_value(&self) -> Option<f64> {
        self.last_value
    }

    /// Scale the last value by `factor`, taking a fresh sample first if the
    /// sensor has never been read.
    pub fn calibrate(&mut self, factor: f64) -> Result<f64, SensorError> {
        let current = match self.last_value {
            Some(value) => value,
            None => self.read_value(Utc::now())?,
        };
        let calibrated = current * factor;
        self.last_value = Some(calibrated);
        Ok(calibrated)
    }

    fn read_value(&mut self, at: DateTime<Utc>) -> Result<f64, SensorError> {
        if !self.active {
            return Err(SensorError::Inactive(self.id.clone()));
        }
        let hour = at.with_timezone(&Local).hour();
        let value = self.kind.sample(hour, &mut rand::thread_rng());
        self.last_value = Some(value);
        Ok(value)
    }
}

impl ReadingSource for SimulatedSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn produce(&mut self, at: DateTime<Utc>) -> Result<Reading, SensorError> {
        let value = self.read_value(at)?;
        Ok(Reading::new(self.id.clone(), at, value, self.kind.unit()))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const KINDS: [SensorKind; 4] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Pressure,
        SensorKind::Light,
    ];

    #[test]
    fn test_samples_stay_in_range_and_rounded() {
        let mut rng = StdRng::seed_from_u64(7);
        for kind in KINDS {
            let (min, max) = kind.range();
            for hour in 0..24 {
                for _ in 0..50 {
                    let v = kind.sample(hour, &mut rng);
                    assert!(v >= min && v <= max, "{} at {}h: {}", kind, hour, v);
                    assert!(((v * 100.0).round() - v * 100.0).abs() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_daily_profiles() {
        let mut rng = StdRng::seed_from_u64(42);

        // Light: bright at noon, dark at midnight
        assert!(SensorKind::Light.sample(12, &mut rng) > 9_000.0);
        assert!(SensorKind::Light.sample(0, &mut rng) <= 120.0);

        // Humidity: dry midday band
        let midday = SensorKind::Humidity.sample(13, &mut rng);
        assert!((31.0..=59.0).contains(&midday));

        // Pressure: day band is higher than the night floor
        let day = SensorKind::Pressure.sample(10, &mut rng);
        assert!(day >= 995.0);
    }

    #[test]
    fn test_produce_reading() {
        let mut sensor = SimulatedSensor::new("press_01", SensorKind::Pressure);
        let at = Utc::now();
        let reading = sensor.produce(at).unwrap();

        assert_eq!(reading.sensor_id, "press_01");
        assert_eq!(reading.unit, "hPa");
        assert_eq!(reading.timestamp, at);
        assert_eq!(sensor.last_value(), Some(reading.value));
    }

    #[test]
    fn test_inactive_sensor_is_typed_error() {
        let mut sensor = SimulatedSensor::new("temp_01", SensorKind::Temperature);
        sensor.stop();

        let err = sensor.produce(Utc::now()).unwrap_err();
        assert_eq!(err, SensorError::Inactive("temp_01".to_string()));
        assert!(sensor.calibrate(1.1).is_err());

        sensor.start();
        assert!(sensor.produce(Utc::now()).is_ok());
    }

    #[test]
    fn test_calibrate_scales_last_value() {
        let mut sensor = SimulatedSensor::new("hum_01", SensorKind::Humidity);
        let reading = sensor.produce(Utc::now()).unwrap();

        let calibrated = sensor.calibrate(2.0).unwrap();
        assert!((calibrated - reading.value * 2.0).abs() < 1e-9);
        assert_eq!(sensor.last_value(), Some(calibrated));
    }

    #[test]
    fn test_kind_deserializes_lowercase() {
        let kind: SensorKind = serde_json::from_str("\"light\"").unwrap();
        assert_eq!(kind, SensorKind::Light);
        assert_eq!(kind.unit(), "lx");
    }
}
