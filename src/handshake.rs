use crate::transport::{Transport, TransportEvent};
use busgate_core::framing::encode_frame;
use busgate_core::packet::Packet;
use busgate_core::proto::OP_HANDSHAKE;
use busgate_core::{compress, hash};
use log::debug;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

const AUTH_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECTED_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
    #[error("Timed out during authentication")]
    Timeout,
    #[error("Unexpected event during handshake: {0}")]
    UnexpectedEvent(String),
}

type Result<T> = std::result::Result<T, HandshakeError>;

/// Authentication request: the vendor password hash from the client address.
pub fn build_auth_packet(client_address: u16, password: &str) -> Packet {
    Packet::new(
        OP_HANDSHAKE,
        client_address,
        0,
        0,
        hash::server_hash(password).to_vec(),
    )
}

/// Packet -> container -> length-prefixed frame.
pub fn frame_packet(packet: &Packet) -> std::result::Result<Vec<u8>, anyhow::Error> {
    encode_frame(&compress::compress(&packet.encode()))
}

/// Waits for the transport's `Connected` event.
///
/// The gateway stays silent until it has seen the authentication packet, so
/// anything received before that is noise.
async fn await_connected(transport_events: &mut mpsc::Receiver<TransportEvent>) -> Result<()> {
    loop {
        match timeout(CONNECTED_EVENT_TIMEOUT, transport_events.recv()).await {
            Ok(Some(TransportEvent::Connected)) => return Ok(()),
            Ok(Some(TransportEvent::DataReceived(data))) => {
                debug!(target: "Client", "Dropping {} bytes received before connect", data.len());
            }
            Ok(Some(TransportEvent::Disconnected)) => {
                return Err(HandshakeError::UnexpectedEvent(
                    "Disconnected during handshake".to_string(),
                ));
            }
            Ok(None) => {
                return Err(HandshakeError::UnexpectedEvent(
                    "Transport event stream closed".to_string(),
                ));
            }
            Err(_) => return Err(HandshakeError::Timeout),
        }
    }
}

/// Sends the authentication packet.
///
/// The gateway answers asynchronously with `AuthGranted` or `AuthDenied`,
/// which the read loop handles.
pub async fn do_handshake(
    transport: &dyn Transport,
    transport_events: &mut mpsc::Receiver<TransportEvent>,
    client_address: u16,
    password: &str,
) -> Result<()> {
    await_connected(transport_events).await?;

    debug!(target: "Client", "--> Sending authentication from {client_address}");
    let framed = frame_packet(&build_auth_packet(client_address, password))?;
    timeout(AUTH_WRITE_TIMEOUT, transport.send(&framed))
        .await
        .map_err(|_| HandshakeError::Timeout)??;

    Ok(())
}
