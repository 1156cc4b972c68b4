//! Network ingestion
//!
//! - **protocol**: JSON line payload and `ACK\n` acknowledgement
//! - **server**: TCP listener forwarding payloads to the engine
//! - **client**: retrying sender used by remote producers and the CLI

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{ClientConfig, ClientError, IngestClient};
pub use protocol::{IngestPayload, ProtocolError};
pub use server::{ConnectionError, IngestServer};
