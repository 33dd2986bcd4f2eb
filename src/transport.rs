pub use busgate_core::net::{Endpoint, Transport, TransportEvent, TransportFactory};
pub use busgate_tokio_transport::TokioTcpTransportFactory;

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::handshake::frame_packet;
    use async_trait::async_trait;
    use busgate_core::compress;
    use busgate_core::framing::{FrameDecoder, encode_frame};
    use busgate_core::packet::Packet;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Records every write and reports `Disconnected` when closed.
    pub struct MockTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
        closed: AtomicBool,
    }

    impl MockTransport {
        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }

        /// Every written frame decoded back into its packet.
        pub fn sent_packets(&self) -> Vec<Packet> {
            let mut decoder = FrameDecoder::new();
            for chunk in self.sent() {
                decoder.feed(&chunk);
            }
            let mut packets = Vec::new();
            while let Some(frame) = decoder.decode_frame() {
                let payload = compress::decompress(&frame).unwrap();
                packets.push(Packet::decode(&payload).unwrap().packet);
            }
            packets
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
            if self.is_closed() {
                anyhow::bail!("mock transport is closed");
            }
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn disconnect(&self) {
            self.closed.store(true, Ordering::SeqCst);
            let events = self.events.lock().unwrap().take();
            if let Some(events) = events {
                let _ = events.try_send(TransportEvent::Disconnected);
            }
        }
    }

    /// Hands out `MockTransport`s and lets a test play the gateway side.
    #[derive(Default)]
    pub struct MockTransportFactory {
        last: Mutex<Option<Arc<MockTransport>>>,
        inbound: Mutex<Option<mpsc::Sender<TransportEvent>>>,
        fail_next: AtomicBool,
    }

    impl MockTransportFactory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_next_connect(&self) {
            self.fail_next.store(true, Ordering::SeqCst);
        }

        pub fn last_transport(&self) -> Option<Arc<MockTransport>> {
            self.last.lock().unwrap().clone()
        }

        fn inbound(&self) -> mpsc::Sender<TransportEvent> {
            self.inbound
                .lock()
                .unwrap()
                .clone()
                .expect("no transport created yet")
        }

        pub async fn inject_bytes(&self, data: &[u8]) {
            self.inbound()
                .send(TransportEvent::DataReceived(Bytes::copy_from_slice(data)))
                .await
                .unwrap();
        }

        /// Sends a length-prefixed frame around an arbitrary container.
        pub async fn inject_frame(&self, container: &[u8]) {
            self.inject_bytes(&encode_frame(container).unwrap()).await;
        }

        pub async fn inject_packet(&self, packet: &Packet) {
            self.inject_bytes(&frame_packet(packet).unwrap()).await;
        }

        pub async fn drop_connection(&self) {
            self.inbound()
                .send(TransportEvent::Disconnected)
                .await
                .unwrap();
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn create_transport(
            &self,
            _endpoint: &Endpoint,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            let (tx, rx) = mpsc::channel(100);
            tx.send(TransportEvent::Connected).await?;
            let transport = Arc::new(MockTransport {
                sent: Mutex::new(Vec::new()),
                events: Mutex::new(Some(tx.clone())),
                closed: AtomicBool::new(false),
            });
            *self.last.lock().unwrap() = Some(transport.clone());
            *self.inbound.lock().unwrap() = Some(tx);
            Ok((transport, rx))
        }
    }
}
