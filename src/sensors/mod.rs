//! Reading producers
//!
//! A producer is anything that can yield a [`Reading`] on demand. The daemon
//! drives a set of them through the [`Poller`]; the network ingestion server is
//! the other producer and talks to the engine directly.
//!
//! - **simulated**: synthetic temperature / humidity / pressure / light sensors
//! - **poller**: periodic loop feeding producers into the engine

pub mod poller;
pub mod simulated;

pub use poller::{PollStats, Poller};
pub use simulated::{SensorKind, SimulatedSensor};

use crate::storage::Reading;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors a producer can return instead of a reading
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    /// The sensor has been stopped and produces nothing until restarted
    #[error("Sensor {0} is inactive")]
    Inactive(String),
}

/// Capability interface for anything that yields readings
pub trait ReadingSource: Send {
    /// Sensor identifier written to the log
    fn id(&self) -> &str;

    /// Sample the sensor at `at`
    fn produce(&mut self, at: DateTime<Utc>) -> Result<Reading, SensorError>;
}
