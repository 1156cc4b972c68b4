//! Local poll loop
//!
//! Samples every registered producer once per tick and hands the readings to
//! the engine. Runs until the shutdown signal flips or the engine stops.

use crate::sensors::{ReadingSource, SensorError};
use crate::storage::{LogEngine, StorageError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Counters for one poll loop run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub ticks: u64,
    pub logged: u64,
    /// Samples skipped because the producer was inactive
    pub skipped: u64,
    /// Readings the engine rejected
    pub failed: u64,
}

/// Periodic driver for a set of [`ReadingSource`]s
pub struct Poller {
    engine: Arc<LogEngine>,
    sources: Vec<Box<dyn ReadingSource>>,
    period: Duration,
}

impl Poller {
    pub fn new(engine: Arc<LogEngine>, period: Duration) -> Self {
        Self {
            engine,
            sources: Vec::new(),
            period,
        }
    }

    /// Register a producer
    pub fn add_source(mut self, source: impl ReadingSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Sample every producer once.
    ///
    /// Returns `false` once the engine no longer accepts readings.
    pub async fn poll_once(&mut self, stats: &mut PollStats) -> bool {
        let now = Utc::now();
        stats.ticks += 1;

        for source in self.sources.iter_mut() {
            let reading = match source.produce(now) {
                Ok(reading) => reading,
                Err(SensorError::Inactive(id)) => {
                    tracing::trace!("Skipping inactive sensor {}", id);
                    stats.skipped += 1;
                    continue;
                }
            };

            match self.engine.log_reading(reading).await {
                Ok(()) => stats.logged += 1,
                Err(StorageError::NotRunning) => return false,
                Err(e) => {
                    tracing::warn!("Failed to log reading from {}: {}", source.id(), e);
                    stats.failed += 1;
                }
            }
        }
        true
    }

    /// Run until `shutdown` becomes true or the engine stops.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PollStats {
        let mut stats = PollStats::default();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Polling {} sensor(s) every {:?}",
            self.sources.len(),
            self.period
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.poll_once(&mut stats).await {
                        tracing::info!("Engine stopped, ending poll loop");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            "Poll loop finished: {} ticks, {} logged, {} skipped, {} failed",
            stats.ticks,
            stats.logged,
            stats.skipped,
            stats.failed
        );
        stats
    }

    /// Spawn [`run`](Self::run) on the runtime
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<PollStats> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{SensorKind, SimulatedSensor};
    use crate::storage::{LogConfig, LogQuery};
    use chrono::Duration as ChronoDuration;
    use tempfile::tempdir;

    async fn engine(dir: &std::path::Path) -> Arc<LogEngine> {
        Arc::new(
            LogEngine::open(LogConfig::new(dir).buffer_size(1))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_poll_once_skips_inactive() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path()).await;

        let mut stopped = SimulatedSensor::new("light_01", SensorKind::Light);
        stopped.stop();

        let mut poller = Poller::new(Arc::clone(&engine), Duration::from_millis(10))
            .add_source(SimulatedSensor::new("temp_01", SensorKind::Temperature))
            .add_source(SimulatedSensor::new("hum_01", SensorKind::Humidity))
            .add_source(stopped);
        assert_eq!(poller.source_count(), 3);

        let mut stats = PollStats::default();
        assert!(poller.poll_once(&mut stats).await);
        assert_eq!(stats.logged, 2);
        assert_eq!(stats.skipped, 1);

        let query = LogQuery::new(
            Utc::now() - ChronoDuration::minutes(1),
            Utc::now() + ChronoDuration::minutes(1),
        );
        let ids: Vec<String> = engine
            .read_logs(query)
            .await
            .unwrap()
            .map(|r| r.unwrap().sensor_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&"light_01".to_string()));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let (tx, rx) = watch::channel(false);

        let handle = Poller::new(Arc::clone(&engine), Duration::from_millis(5))
            .add_source(SimulatedSensor::new("press_01", SensorKind::Pressure))
            .spawn(rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert!(stats.ticks >= 1);
        assert_eq!(stats.logged, stats.ticks);
    }

    #[tokio::test]
    async fn test_run_ends_when_engine_stops() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path()).await;
        engine.stop().await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let stats = Poller::new(Arc::clone(&engine), Duration::from_millis(5))
            .add_source(SimulatedSensor::new("temp_01", SensorKind::Temperature))
            .run(rx)
            .await;

        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.logged, 0);
    }
}
