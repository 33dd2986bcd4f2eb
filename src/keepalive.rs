use crate::client::Client;
use busgate_core::packet::Packet;
use busgate_core::proto::OP_KEEPALIVE;
use log::{debug, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Spread applied to each interval, in percent of the configured value.
const KEEP_ALIVE_JITTER_PERCENT: u64 = 20;

fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let spread = base_ms * KEEP_ALIVE_JITTER_PERCENT / 100;
    let ms = rand::rng().random_range(base_ms.saturating_sub(spread)..=base_ms + spread);
    Duration::from_millis(ms.max(1))
}

impl Client {
    /// Sends a single keepalive packet. Returns true if it was written.
    async fn send_keepalive(&self) -> bool {
        if !self.is_connected() {
            return false;
        }

        debug!(target: "Client/Keepalive", "Sending keepalive");
        let packet = Packet::new(OP_KEEPALIVE, self.config.client_address, 0, 0, Vec::new());
        match self.send_packet(&packet).await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "Client/Keepalive", "Keepalive failed: {e}");
                false
            }
        }
    }

    /// Periodic keepalive plus idle watchdog for one connection. Spawned by
    /// `connect()`; exits when that connection is gone.
    pub(crate) async fn keepalive_loop(self: Arc<Self>, connection_id: u64) {
        let interval = self.config.keepalive_interval;
        if interval.is_zero() {
            debug!(target: "Client/Keepalive", "Keepalive disabled.");
            return;
        }
        let max_idle = self.config.keepalive_max_idle;
        let mut error_count = 0u32;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(jittered(interval)) => {
                    if !self.is_connected()
                        || self.connection_id.load(Ordering::SeqCst) != connection_id
                    {
                        debug!(target: "Client/Keepalive", "Connection gone, exiting keepalive loop.");
                        return;
                    }

                    let idle = self.last_received.lock().await.elapsed();
                    if !max_idle.is_zero() && idle > max_idle {
                        warn!(
                            target: "Client/Keepalive",
                            "Nothing received for {} seconds, forcing reconnect.",
                            idle.as_secs()
                        );
                        self.reconnect().await;
                        return;
                    }

                    if self.send_keepalive().await {
                        if error_count > 0 {
                            info!(target: "Client/Keepalive", "Keepalive restored.");
                        }
                        error_count = 0;
                    } else {
                        error_count += 1;
                        warn!(target: "Client/Keepalive", "Keepalive error count: {error_count}");
                    }
                },
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client/Keepalive", "Shutdown signaled, exiting keepalive loop.");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::store::MemoryRegistry;
    use crate::transport::mock::MockTransportFactory;
    use crate::types::events::ConnectionState;

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..100 {
            let d = jittered(Duration::from_secs(10));
            assert!(d >= Duration::from_secs(8) && d <= Duration::from_secs(12));
        }
        assert_eq!(jittered(Duration::from_millis(0)), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_sent_then_idle_forces_reconnect() {
        let _ = env_logger::builder().is_test(true).try_init();
        let factory = Arc::new(MockTransportFactory::new());
        let mut config = ClientConfig::new("gateway.test", "pw");
        config.auto_reconnect = false;
        config.keepalive_interval = Duration::from_secs(10);
        config.keepalive_max_idle = Duration::from_secs(25);
        let client = Client::new(config, factory.clone(), Arc::new(MemoryRegistry::new()));
        client.connect().await.unwrap();

        let loop_client = client.clone();
        let read_loop = tokio::spawn(async move { loop_client.read_messages_loop().await });

        // First keepalive after ~10s, the watchdog trips once idle passes 25s.
        tokio::time::sleep(Duration::from_secs(15)).await;
        let transport = factory.last_transport().unwrap();
        assert!(
            transport
                .sent_packets()
                .iter()
                .any(|p| p.opcode == OP_KEEPALIVE)
        );

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(transport.is_closed());
        assert!(read_loop.await.unwrap().is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
