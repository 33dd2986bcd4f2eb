use crate::config::ClientConfig;
use crate::detail::{DetailRequester, DetailScheduler};
use crate::handshake::{self, HandshakeError};
use crate::store::DeviceRegistry;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::events::{AuthResult, ConnectionState, Event, EventBus};
use anyhow::anyhow;
use async_trait::async_trait;
use busgate_core::Address;
use busgate_core::command::{CommandError, OutboundCommand, build_packet};
use busgate_core::compress;
use busgate_core::framing::FrameDecoder;
use busgate_core::interpret::{self, Interpretation, ValueHistory};
use busgate_core::packet::Packet;
use busgate_core::proto::OP_MODULE;
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, broadcast, mpsc, watch};
use tokio::time::{Instant, sleep};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("gateway rejected the password")]
    AuthenticationFailed,
    #[error("timed out talking to the gateway")]
    Timeout,
    #[error("invalid command: {0}")]
    Command(#[from] CommandError),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

impl From<HandshakeError> for ClientError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Transport(e) => ClientError::Transport(e),
            HandshakeError::Timeout => ClientError::Timeout,
            HandshakeError::UnexpectedEvent(msg) => ClientError::Transport(anyhow!(msg)),
        }
    }
}

/// One gateway session: connection, authentication, inbound decoding and the
/// serialized write path.
pub struct Client {
    pub(crate) config: ClientConfig,
    transport_factory: Arc<dyn TransportFactory>,
    registry: Arc<dyn DeviceRegistry>,
    pub event_bus: Arc<EventBus>,

    transport: Mutex<Option<Arc<dyn Transport>>>,
    transport_events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    /// Held for the whole of a write so frames never interleave.
    write_gate: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    history: Mutex<ValueHistory>,
    pub(crate) last_received: Mutex<Instant>,

    detail_wakeup: Arc<Notify>,
    pub(crate) shutdown_notifier: Notify,
    pub(crate) connection_id: AtomicU64,
    is_running: AtomicBool,
    is_connecting: AtomicBool,
    expected_disconnect: AtomicBool,
    enable_auto_reconnect: AtomicBool,
    auto_reconnect_errors: AtomicU32,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        registry: Arc<dyn DeviceRegistry>,
    ) -> Arc<Self> {
        let auto_reconnect = config.auto_reconnect;
        Arc::new(Self {
            config,
            transport_factory,
            registry,
            event_bus: Arc::new(EventBus::new()),

            transport: Mutex::new(None),
            transport_events: Mutex::new(None),
            write_gate: Mutex::new(()),
            state: watch::Sender::new(ConnectionState::Disconnected),
            history: Mutex::new(ValueHistory::new()),
            last_received: Mutex::new(Instant::now()),

            detail_wakeup: Arc::new(Notify::new()),
            shutdown_notifier: Notify::new(),
            connection_id: AtomicU64::new(0),
            is_running: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            expected_disconnect: AtomicBool::new(false),
            enable_auto_reconnect: AtomicBool::new(auto_reconnect),
            auto_reconnect_errors: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<dyn DeviceRegistry> {
        self.registry.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_bus.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.enable_auto_reconnect.store(enabled, Ordering::Relaxed);
    }

    /// Scheduler wired to this session's registry, event bus and discovery.
    pub fn detail_scheduler(self: &Arc<Self>) -> Arc<DetailScheduler> {
        DetailScheduler::new(
            self.config.detail.clone(),
            self.registry.clone(),
            self.clone(),
            self.event_bus.clone(),
            self.detail_wakeup.clone(),
        )
    }

    fn set_state(&self, new: ConnectionState) {
        let old = self.state.send_replace(new);
        if old != new {
            debug!(target: "Client", "Connection state {old} -> {new}");
            self.event_bus.dispatch(&Event::ConnectionStateChanged(new));
        }
    }

    /// Connects, then processes inbound data until the connection ends,
    /// reconnecting with a growing delay while auto-reconnect is on.
    ///
    /// A rejected password ends the loop with `AuthenticationFailed`.
    pub async fn run(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("Client `run` method called while already running.");
            return Ok(());
        }
        while self.is_running.load(Ordering::Relaxed) {
            self.expected_disconnect.store(false, Ordering::Relaxed);

            if let Err(e) = self.connect().await {
                error!("Failed to connect: {e}, will retry...");
            } else {
                match self.read_messages_loop().await {
                    Err(ClientError::AuthenticationFailed) => {
                        self.is_running.store(false, Ordering::Relaxed);
                        return Err(ClientError::AuthenticationFailed);
                    }
                    Err(e) => warn!(
                        "Message loop exited with an error: {e}. Will attempt to reconnect if enabled."
                    ),
                    Ok(()) if self.expected_disconnect.load(Ordering::Relaxed) => {
                        debug!("Message loop exited gracefully (expected disconnect).")
                    }
                    Ok(()) => info!("Message loop exited gracefully."),
                }

                self.cleanup_connection_state().await;
            }

            if !self.enable_auto_reconnect.load(Ordering::Relaxed) {
                info!("Auto-reconnect disabled, shutting down.");
                self.is_running.store(false, Ordering::Relaxed);
                break;
            }
            if !self.is_running.load(Ordering::Relaxed) {
                break;
            }

            let error_count = self.auto_reconnect_errors.fetch_add(1, Ordering::SeqCst);
            let delay = Duration::from_secs(u64::from(error_count * 2).min(30));
            info!(
                "Will attempt to reconnect in {:?} (attempt {})",
                delay,
                error_count + 1
            );
            sleep(delay).await;
        }
        info!("Client run loop has shut down.");
        Ok(())
    }

    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyConnected);
        }

        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        if self.state() != ConnectionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }

        self.set_state(ConnectionState::Connecting);
        let (transport, mut transport_events) = match self
            .transport_factory
            .create_transport(&self.config.endpoint())
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::Transport(e));
            }
        };

        self.set_state(ConnectionState::Authenticating);
        if let Err(e) = handshake::do_handshake(
            transport.as_ref(),
            &mut transport_events,
            self.config.client_address,
            &self.config.password,
        )
        .await
        {
            transport.disconnect().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }

        *self.transport.lock().await = Some(transport);
        *self.transport_events.lock().await = Some(transport_events);
        *self.last_received.lock().await = Instant::now();
        self.history.lock().await.clear();
        self.auto_reconnect_errors.store(0, Ordering::Relaxed);
        let connection_id = self.connection_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(ConnectionState::Connected);
        info!(target: "Client", "Connected to {}:{}", self.config.host, self.config.port);

        let client_clone = self.clone();
        tokio::spawn(async move { client_clone.keepalive_loop(connection_id).await });

        // Modules registered while offline are still waiting.
        self.detail_wakeup.notify_one();
        Ok(())
    }

    /// Closes the session for good; `run()` returns after this.
    pub async fn disconnect(&self) {
        info!("Disconnecting client intentionally.");
        self.expected_disconnect.store(true, Ordering::Relaxed);
        self.is_running.store(false, Ordering::Relaxed);
        self.shutdown_notifier.notify_waiters();

        self.close_transport().await;
        self.cleanup_connection_state().await;
    }

    /// Drops the current connection but lets `run()` reconnect.
    pub async fn reconnect(&self) {
        info!("Dropping connection to force a reconnect.");
        self.close_transport().await;
    }

    async fn close_transport(&self) {
        let transport = self.transport.lock().await.clone();
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
    }

    async fn cleanup_connection_state(&self) {
        *self.transport.lock().await = None;
        *self.transport_events.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
        match self.registry.demote_in_progress().await {
            Ok(0) => {}
            Ok(n) => debug!(target: "Client", "Reset {n} in-flight detail requests"),
            Err(e) => warn!(target: "Client", "Failed to reset in-flight detail requests: {e}"),
        }
    }

    pub(crate) async fn read_messages_loop(self: &Arc<Self>) -> Result<(), ClientError> {
        info!(target: "Client", "Starting message processing loop...");

        let mut rx_guard = self.transport_events.lock().await;
        let mut transport_events = rx_guard.take().ok_or(ClientError::NotConnected)?;
        drop(rx_guard);

        let mut frame_decoder = FrameDecoder::new();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => {
                    info!(target: "Client", "Shutdown signaled in message loop. Exiting message loop.");
                    return Ok(());
                },
                event = transport_events.recv() => match event {
                    Some(TransportEvent::DataReceived(data)) => {
                        *self.last_received.lock().await = Instant::now();
                        frame_decoder.feed(&data);
                        while let Some(frame) = frame_decoder.decode_frame() {
                            self.process_frame(&frame).await?;
                        }
                    }
                    Some(TransportEvent::Connected) => {
                        debug!("Transport connected event received");
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        self.cleanup_connection_state().await;
                        if self.expected_disconnect.load(Ordering::Relaxed) {
                            info!("Transport disconnected as expected.");
                            return Ok(());
                        }
                        info!("Transport disconnected unexpectedly.");
                        return Err(ClientError::Transport(anyhow!(
                            "Transport disconnected unexpectedly"
                        )));
                    }
                },
            }
        }
    }

    /// Container -> packet -> event. Malformed input is logged and dropped.
    async fn process_frame(&self, frame: &[u8]) -> Result<(), ClientError> {
        let payload = match compress::decompress(frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(target: "Client/Recv", "Dropping frame: {e}");
                return Ok(());
            }
        };
        let decoded = match Packet::decode(&payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(target: "Client/Recv", "Dropping packet: {e}");
                return Ok(());
            }
        };
        if let Some(mismatch) = decoded.checksum_mismatch {
            warn!(target: "Client/Recv", "{mismatch} in {}", decoded.packet);
        }
        self.handle_packet(decoded.packet).await
    }

    async fn handle_packet(&self, packet: Packet) -> Result<(), ClientError> {
        trace!(target: "Client/Recv", "<-- {packet}");

        if packet.opcode == OP_MODULE && packet.addr_src != self.config.client_address {
            self.note_module(Address::Module(packet.addr_src)).await;
        }

        let interpretation = {
            let mut history = self.history.lock().await;
            interpret::interpret(&packet, &mut history)
        };
        let event = match interpretation {
            Ok(Interpretation::Event(event)) => event,
            Ok(Interpretation::Keepalive) => {
                trace!(target: "Client/Recv", "Keepalive from gateway");
                return Ok(());
            }
            Ok(Interpretation::Ignored(_)) => return Ok(()),
            Err(e) => {
                warn!(target: "Client/Recv", "Dropping {packet}: {e}");
                return Ok(());
            }
        };

        match &event {
            Event::AuthResult(AuthResult { accepted: false }) => {
                error!(target: "Client", "Gateway rejected the password");
                self.event_bus.dispatch(&event);
                self.expected_disconnect.store(true, Ordering::Relaxed);
                self.close_transport().await;
                self.cleanup_connection_state().await;
                return Err(ClientError::AuthenticationFailed);
            }
            Event::AuthResult(AuthResult { accepted: true }) => {
                info!(target: "Client", "Gateway accepted the password");
            }
            Event::DetailAck(details) => {
                if let Err(e) = self.registry.apply_details(details).await {
                    warn!(target: "Client", "Failed to store details of {}: {e}", details.module);
                }
            }
            _ => {}
        }

        self.event_bus.dispatch(&event);
        Ok(())
    }

    async fn note_module(&self, module: Address) {
        match self.registry.discover(module).await {
            Ok(true) => {
                info!(target: "Client", "Discovered module {module}");
                self.detail_wakeup.notify_one();
            }
            Ok(false) => {}
            Err(e) => warn!(target: "Client", "Failed to register module {module}: {e}"),
        }
    }

    /// Encodes and writes one packet. Only valid while `Connected`.
    pub(crate) async fn send_packet(&self, packet: &Packet) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let frame = handshake::frame_packet(packet)?;

        let _gate = self.write_gate.lock().await;
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;
        debug!(target: "Client/Send", "--> {packet}");
        transport.send(&frame).await?;
        Ok(())
    }

    pub async fn send(
        &self,
        target: Address,
        object: u16,
        command: OutboundCommand,
    ) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let packet = build_packet(self.config.client_address, target, object, &command)?;
        self.send_packet(&packet).await
    }

    pub async fn request_details(&self, module: Address) -> Result<(), ClientError> {
        self.send(module, 0, OutboundCommand::RequestDetails).await
    }
}

#[async_trait]
impl DetailRequester for Client {
    async fn request_details(&self, module: Address) -> Result<(), ClientError> {
        Client::request_details(self, module).await
    }
}
