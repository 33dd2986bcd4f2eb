//! Tokio-based TCP transport implementation for busgate
//!
//! This crate provides a concrete implementation of the Transport trait
//! over a plain `TcpStream` to the bus gateway.

use async_trait::async_trait;
use busgate_core::net::{Endpoint, Transport, TransportEvent, TransportFactory};
use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::AbortHandle;

const READ_BUFFER_SIZE: usize = 4096;
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Tokio-based TCP transport
pub struct TokioTcpTransport {
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    read_pump: AbortHandle,
}

impl TokioTcpTransport {
    fn new(writer: OwnedWriteHalf, read_pump: AbortHandle) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Some(writer))),
            read_pump,
        }
    }
}

#[async_trait]
impl Transport for TokioTcpTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        trace!("--> Writing {} bytes", data.len());
        writer
            .write_all(data)
            .await
            .map_err(|e| anyhow::anyhow!("TCP send error: {}", e))?;
        writer
            .flush()
            .await
            .map_err(|e| anyhow::anyhow!("TCP flush error: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            debug!("Error shutting down TCP writer: {e}");
        }
        // Dropping the pump's sender ends the event stream.
        self.read_pump.abort();
    }
}

/// Factory for creating Tokio TCP transports
pub struct TokioTcpTransportFactory;

impl TokioTcpTransportFactory {
    /// Create a new factory instance
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioTcpTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for TokioTcpTransportFactory {
    async fn create_transport(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        info!("Dialing {addr}");

        let stream = tokio::time::timeout(endpoint.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Connecting to {addr} timed out after {:?}",
                    endpoint.connect_timeout
                )
            })?
            .map_err(|e| anyhow::anyhow!("TCP connect to {addr} failed: {}", e))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {e}");
        }

        let (reader, writer) = stream.into_split();

        // Create event channel
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Queue Connected before the pump can report any data
        let _ = event_tx.send(TransportEvent::Connected).await;

        let pump = tokio::task::spawn(read_pump(reader, event_tx));
        let transport = Arc::new(TokioTcpTransport::new(writer, pump.abort_handle()));

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut reader: OwnedReadHalf, event_tx: mpsc::Sender<TransportEvent>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                trace!("TCP stream ended");
                break;
            }
            Ok(n) => {
                debug!("<-- Received {n} bytes");
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if event_tx
                    .send(TransportEvent::DataReceived(chunk))
                    .await
                    .is_err()
                {
                    warn!("Event receiver dropped, closing read pump");
                    break;
                }
            }
            Err(e) => {
                error!("Error reading from TCP stream: {e}");
                break;
            }
        }
    }

    // Send disconnected event
    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
