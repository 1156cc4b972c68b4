//! # Sensorlog
//!
//! Sensor telemetry logger: a buffered, rotating, compressing CSV log with
//! retention and range queries over live files and archives.
//!
//! ## Features
//!
//! - **Buffered writes**: readings are appended to the active CSV file in batches
//! - **Rotation**: by file age, size or row count
//! - **Archives**: sealed files are zipped, expired archives pruned
//! - **Range queries**: one lazy scan over the active file and every archive
//! - **Producers**: simulated sensors and a TCP ingestion endpoint
//!
//! ## Modules
//!
//! - [`storage`]: The logging engine
//! - [`sensors`]: Simulated sensors and the local poll loop
//! - [`ingest`]: Network ingestion server and client
//! - [`config`]: File and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sensorlog::storage::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LogConfig::new("./sensor_logs").buffer_size(3).retention_days(7);
//!     let engine = LogEngine::open(config).await?;
//!
//!     let now = chrono::Utc::now();
//!     engine.log("temp_01", now, 20.1, "°C").await?;
//!     engine.log("hum_01", now, 48.0, "%").await?;
//!
//!     let readings: Vec<Reading> = engine
//!         .read_logs(LogQuery::last_hours(1))
//!         .await?
//!         .collect::<Result<_, _>>()?;
//!     println!("Found {} readings", readings.len());
//!
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod ingest;
pub mod sensors;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    ArchiveInfo, Archiver, LogConfig, LogEngine, LogQuery, LogReader, LogStats, Reading,
    RetentionReaper, RetentionReport, RotationPolicy, RotationTrigger, StorageError,
    StorageResult,
};

pub use sensors::{Poller, ReadingSource, SensorError, SensorKind, SimulatedSensor};

pub use ingest::{ClientConfig, ClientError, IngestClient, IngestPayload, IngestServer};

pub use config::{Config, ConfigError, LoggingConfig};
