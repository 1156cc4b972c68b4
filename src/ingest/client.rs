//! Ingestion client
//!
//! Sends one reading per connection and waits for `ACK\n`. A missing or wrong
//! acknowledgement, a refused connection or a timeout all count as a failed
//! attempt; the client reconnects and resends up to `retries` times.

use crate::ingest::protocol::{IngestPayload, ProtocolError, ACK};
use crate::storage::Reading;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Configuration for the ingestion client
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect / send / acknowledge timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total attempts per reading
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base delay between attempts; grows linearly with the attempt number
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

pub(crate) fn default_port() -> u16 {
    5000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ClientConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Errors that can occur when sending a reading
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Request timeout")]
    Timeout,

    #[error("Server closed the connection without acknowledging")]
    NoAck,

    #[error("Gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },
}

/// One-reading-per-connection client with bounded retries
#[derive(Debug, Clone)]
pub struct IngestClient {
    config: ClientConfig,
}

impl IngestClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `reading`, retrying until acknowledged or out of attempts.
    pub async fn send(&self, reading: &Reading) -> Result<(), ClientError> {
        let line = IngestPayload::from(reading).encode()?;
        let attempts = self.config.retries.max(1);
        let mut last_error = ClientError::NoAck;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = Duration::from_millis(self.config.retry_delay_ms * u64::from(attempt));
                tokio::time::sleep(delay).await;
            }

            match self.attempt(&line).await {
                Ok(()) => {
                    tracing::debug!(
                        "Reading from {} acknowledged (attempt {})",
                        reading.sensor_id,
                        attempt + 1
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Send attempt {}/{} to {} failed: {}",
                        attempt + 1,
                        attempts,
                        self.config.addr(),
                        e
                    );
                    last_error = e;
                }
            }
        }

        Err(ClientError::Exhausted {
            attempts,
            last: Box::new(last_error),
        })
    }

    async fn attempt(&self, line: &[u8]) -> Result<(), ClientError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);

        let exchange = async {
            let mut stream = TcpStream::connect(self.config.addr()).await?;
            stream.write_all(line).await?;

            let mut reply = Vec::with_capacity(ACK.len());
            (&mut stream)
                .take(ACK.len() as u64)
                .read_to_end(&mut reply)
                .await?;

            if reply == ACK {
                Ok(())
            } else {
                Err(ClientError::NoAck)
            }
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    fn config_for(port: u16, retries: u32) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeout_ms: 1000,
            retries,
            retry_delay_ms: 1,
        }
    }

    /// Fake server: drops the first `failures` connections, then acknowledges.
    async fn flaky_server(failures: u32) -> (u16, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let mut reader = tokio::io::BufReader::new(stream);
                let mut line = String::new();
                let _ = reader.read_line(&mut line).await;
                if n >= failures {
                    let _ = reader.get_mut().write_all(ACK).await;
                }
            }
        });

        (port, seen)
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.addr(), "127.0.0.1:5000");
        assert_eq!(config.retries, 3);
    }

    #[tokio::test]
    async fn test_retries_until_ack() {
        let (port, seen) = flaky_server(2).await;
        let client = IngestClient::new(config_for(port, 3));

        client
            .send(&Reading::now("temp_01", 21.0, "°C"))
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempt_budget() {
        let (port, seen) = flaky_server(u32::MAX).await;
        let client = IngestClient::new(config_for(port, 2));

        let err = client
            .send(&Reading::new("temp_01", Utc::now(), 21.0, "°C"))
            .await
            .unwrap_err();

        match err {
            ClientError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, ClientError::NoAck));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried() {
        // Bind and drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = IngestClient::new(config_for(port, 2));

        let err = client.send(&Reading::now("a", 1.0, "u")).await.unwrap_err();
        assert!(matches!(err, ClientError::Exhausted { attempts: 2, .. }));
    }
}
