//! TCP ingestion server
//!
//! One task per connection. Each connection carries exactly one payload line;
//! the server decodes it, hands the reading to the engine and answers `ACK\n`.
//! Anything that goes wrong closes the connection without a reply, which the
//! client treats as a reason to retry.

use crate::ingest::protocol::{IngestPayload, ProtocolError, ACK, MAX_LINE_BYTES};
use crate::storage::{LogEngine, StorageError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;

/// Why a connection was closed without an acknowledgement
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Timed out waiting for payload")]
    Timeout,
}

/// Accepts ingestion connections and forwards readings to the engine
pub struct IngestServer {
    listener: TcpListener,
    engine: Arc<LogEngine>,
    read_timeout: Duration,
}

impl IngestServer {
    /// Bind the listening socket
    pub async fn bind(
        addr: impl ToSocketAddrs,
        engine: Arc<LogEngine>,
        read_timeout: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            engine,
            read_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` becomes true.
    ///
    /// Connections already being handled are left to finish on their own.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.local_addr() {
            Ok(addr) => tracing::info!("Ingestion server listening on {}", addr),
            Err(e) => tracing::warn!("Ingestion server listening (address unknown: {})", e),
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let engine = Arc::clone(&self.engine);
                            let read_timeout = self.read_timeout;
                            tokio::spawn(async move {
                                tracing::debug!("Accepted connection from {}", peer);
                                if let Err(e) = handle_connection(stream, &engine, read_timeout).await {
                                    tracing::warn!("Dropped connection from {}: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => tracing::error!("Failed to accept connection: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Ingestion server stopped");
    }

    /// Spawn [`run`](Self::run) on the runtime
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Read one payload line, log it, acknowledge.
pub async fn handle_connection(
    mut stream: TcpStream,
    engine: &LogEngine,
    read_timeout: Duration,
) -> Result<(), ConnectionError> {
    let line = tokio::time::timeout(read_timeout, read_line(&mut stream))
        .await
        .map_err(|_| ConnectionError::Timeout)??;

    let reading = IngestPayload::decode(&line)?.into_reading()?;
    tracing::debug!(
        "Received {} = {} {} at {}",
        reading.sensor_id,
        reading.value,
        reading.unit,
        reading.timestamp
    );

    engine.log_reading(reading).await?;

    stream.write_all(ACK).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn read_line(stream: &mut TcpStream) -> Result<Vec<u8>, ConnectionError> {
    let mut reader = BufReader::new(stream).take(MAX_LINE_BYTES as u64);
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;

    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() >= MAX_LINE_BYTES {
        return Err(ProtocolError::TooLarge.into());
    }

    if line.iter().all(u8::is_ascii_whitespace) {
        return Err(ProtocolError::Incomplete.into());
    }
    Ok(line)
}
