//! Sensorlog Storage Engine
//!
//! This module provides the rotating telemetry log:
//!
//! - **types**: Core data structures (Reading, LogQuery)
//! - **writer**: Pending buffer and the active CSV file
//! - **rotation**: Elapsed / size / row rotation policy
//! - **archive**: Sealed file → zip archive, archive store listing
//! - **retention**: Time-bounded pruning of archives
//! - **query**: Range scans across live files and archives
//! - **engine**: Main engine orchestrating all components
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Reading → Buffer → Flush (CSV append) → Rotation check
//!
//! Rotation:
//!   Seal → Compress (zip) → Prune expired archives → New active file
//!
//! Read Path:
//!   Query → Snapshot live files + archives → Decompress → Filter → Readings
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sensorlog::storage::{LogConfig, LogEngine, LogQuery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = LogEngine::open(LogConfig::new("./sensor_logs")).await?;
//!
//!     engine.log("temp_01", chrono::Utc::now(), 21.4, "°C").await?;
//!     engine.flush().await?;
//!
//!     for reading in engine.read_logs(LogQuery::last_hours(24).sensor("temp_01")).await? {
//!         println!("{:?}", reading?);
//!     }
//!
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod engine;
pub mod error;
pub mod query;
pub mod retention;
pub mod rotation;
pub mod types;
pub mod writer;

pub use archive::{ArchiveInfo, ArchiveMeta, Archiver};
pub use engine::{LogConfig, LogEngine, LogStats};
pub use error::{StorageError, StorageResult};
pub use query::LogReader;
pub use retention::{RetentionReaper, RetentionReport};
pub use rotation::{RotationPolicy, RotationTrigger};
pub use types::{LogQuery, Reading};
