use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// Raw bytes from the gateway, not aligned to frame boundaries.
    DataReceived(Bytes),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active gateway connection.
/// The transport is a dumb pipe for bytes with no knowledge of the bus framing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends raw data to the gateway.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// Where and how to reach the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)>;
}
