//! Background retrieval of module details.
//!
//! One request is outstanding at a time. Each module moves through
//! `Pending -> InProgress -> Completed | Pending (retry) | Failed` and the
//! registry is the single source of truth for that state.

use crate::client::ClientError;
use crate::config::duration_ms;
use crate::store::{DeviceRegistry, StoreError};
use crate::types::events::EventBus;
use async_trait::async_trait;
use busgate_core::Address;
use busgate_core::types::{DetailRequestState, DetailStatus, Event};
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, broadcast, watch};
use tokio::time::{Instant, sleep, sleep_until};

/// Sends the detail-read command for a module.
#[async_trait]
pub trait DetailRequester: Send + Sync {
    async fn request_details(&self, module: Address) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailSchedulerConfig {
    pub enabled: bool,
    #[serde(with = "duration_ms")]
    pub ack_timeout: Duration,
    /// Gap between two successive requests.
    #[serde(with = "duration_ms")]
    pub request_delay: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_ms")]
    pub retry_backoff: Duration,
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
}

impl Default for DetailSchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ack_timeout: Duration::from_secs(5),
            request_delay: Duration::from_millis(500),
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl DetailSchedulerConfig {
    /// Delay before the next attempt after `retry_count` timeouts.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        self.retry_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Resolves once the stop flag is set, returning at once if it already is.
async fn wait_stopped(stopped: &mut watch::Receiver<bool>) {
    let _ = stopped.wait_for(|s| *s).await;
}

enum AckWait {
    Acked,
    TimedOut,
    Stopped,
}

/// What the run loop does with a module after one request.
enum Attempt {
    Done,
    RetryAt(Instant),
    /// The session is down; wait for the next wakeup before trying anyone.
    Offline,
}

pub struct DetailScheduler {
    config: DetailSchedulerConfig,
    registry: Arc<dyn DeviceRegistry>,
    requester: Arc<dyn DetailRequester>,
    event_bus: Arc<EventBus>,
    wakeup: Arc<Notify>,
    stopped: watch::Sender<bool>,
}

impl DetailScheduler {
    pub fn new(
        config: DetailSchedulerConfig,
        registry: Arc<dyn DeviceRegistry>,
        requester: Arc<dyn DetailRequester>,
        event_bus: Arc<EventBus>,
        wakeup: Arc<Notify>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            requester,
            event_bus,
            wakeup,
            stopped: watch::Sender::new(false),
        })
    }

    pub fn config(&self) -> &DetailSchedulerConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Asks the scheduler to look for pending devices again.
    pub fn wake(&self) {
        self.wakeup.notify_one();
    }

    /// Cancels any wait, drops the queue and leaves no device `InProgress`.
    pub async fn stop(&self) {
        if !self.stopped.send_replace(true) {
            info!(target: "Detail", "Stopping detail scheduler");
        }
        self.demote_in_progress().await;
    }

    async fn demote_in_progress(&self) {
        match self.registry.demote_in_progress().await {
            Ok(0) => {}
            Ok(n) => debug!(target: "Detail", "Demoted {n} in-flight detail requests to pending"),
            Err(e) => warn!(target: "Detail", "Failed to demote in-flight detail requests: {e}"),
        }
    }

    /// Drives the queue until `stop()` is called. Spawn this as a task.
    pub async fn run(self: Arc<Self>) {
        info!(target: "Detail", "Detail scheduler started");
        let mut acks = self.event_bus.subscribe();
        let mut queue: VecDeque<Address> = VecDeque::new();
        let mut not_before: HashMap<Address, Instant> = HashMap::new();

        while !self.is_stopped() {
            if queue.is_empty()
                && let Err(e) = self.refill(&mut queue, &mut not_before).await
            {
                warn!(target: "Detail", "Failed to read pending devices: {e}");
            }

            let Some(module) = queue.pop_front() else {
                self.idle(&not_before).await;
                continue;
            };

            match self.request_one(module, &mut acks).await {
                Ok(Attempt::Done) => {}
                Ok(Attempt::RetryAt(at)) => {
                    not_before.insert(module, at);
                }
                Ok(Attempt::Offline) => {
                    queue.clear();
                    self.idle(&HashMap::new()).await;
                    continue;
                }
                Err(e) => warn!(target: "Detail", "Registry error while handling {module}: {e}"),
            }
            self.pause(self.config.request_delay).await;
        }

        queue.clear();
        self.demote_in_progress().await;
        info!(target: "Detail", "Detail scheduler stopped");
    }

    async fn refill(
        &self,
        queue: &mut VecDeque<Address>,
        not_before: &mut HashMap<Address, Instant>,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        not_before.retain(|_, at| *at > now);
        for id in self.registry.pending().await? {
            if !not_before.contains_key(&id) && !queue.contains(&id) {
                queue.push_back(id);
            }
        }
        if !queue.is_empty() {
            debug!(target: "Detail", "{} devices queued for detail retrieval", queue.len());
        }
        Ok(())
    }

    async fn idle(&self, not_before: &HashMap<Address, Instant>) {
        let next_retry = not_before.values().min().copied();
        let mut stopped = self.stopped.subscribe();
        tokio::select! {
            _ = self.wakeup.notified() => {
                debug!(target: "Detail", "Woken up, re-reading pending devices");
            }
            _ = async {
                match next_retry {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => {}
            _ = wait_stopped(&mut stopped) => {}
        }
    }

    async fn pause(&self, duration: Duration) {
        let mut stopped = self.stopped.subscribe();
        tokio::select! {
            _ = sleep(duration) => {}
            _ = wait_stopped(&mut stopped) => {}
        }
    }

    async fn request_one(
        &self,
        module: Address,
        acks: &mut broadcast::Receiver<Event>,
    ) -> Result<Attempt, StoreError> {
        if self.is_stopped() {
            return Ok(Attempt::Done);
        }
        let Some(device) = self.registry.get(module).await? else {
            return Ok(Attempt::Done);
        };
        if device.detail.status != DetailStatus::Pending {
            return Ok(Attempt::Done);
        }

        let mut state = device.detail;
        state.status = DetailStatus::InProgress;
        state.last_request_time = Some(Utc::now());
        self.registry.set_detail_state(module, state.clone()).await?;

        debug!(
            target: "Detail",
            "Requesting details from {module} (attempt {})",
            state.retry_count + 1
        );
        if let Err(e) = self.requester.request_details(module).await {
            state.status = DetailStatus::Pending;
            self.registry.set_detail_state(module, state).await?;
            return Ok(match e {
                ClientError::NotConnected => {
                    debug!(target: "Detail", "Not connected, {module} stays pending");
                    Attempt::Offline
                }
                e => {
                    warn!(target: "Detail", "Failed to request details from {module}: {e}");
                    Attempt::RetryAt(Instant::now() + self.config.retry_backoff)
                }
            });
        }

        match self.wait_for_ack(module, acks).await {
            AckWait::Acked => {
                // The session stored the details; only fix up a lost race.
                if let Some(current) = self.registry.get(module).await?
                    && current.detail.status == DetailStatus::InProgress
                {
                    let mut done = current.detail;
                    done.status = DetailStatus::Completed;
                    self.registry.set_detail_state(module, done).await?;
                }
                info!(target: "Detail", "Received details from {module}");
                Ok(Attempt::Done)
            }
            AckWait::TimedOut => {
                // The details may have landed without us seeing the ack.
                let Some(mut state) = self.still_in_progress(module).await? else {
                    return Ok(Attempt::Done);
                };
                state.retry_count += 1;
                if state.retry_count >= self.config.max_retries {
                    warn!(
                        target: "Detail",
                        "No details from {module} after {} attempts, giving up",
                        state.retry_count
                    );
                    state.status = DetailStatus::Failed;
                    self.registry.set_detail_state(module, state).await?;
                    return Ok(Attempt::Done);
                }

                let backoff = self.config.backoff_for(state.retry_count);
                debug!(
                    target: "Detail",
                    "No details from {module} yet, retrying in {backoff:?}"
                );
                state.status = DetailStatus::Pending;
                self.registry.set_detail_state(module, state).await?;
                Ok(Attempt::RetryAt(Instant::now() + backoff))
            }
            AckWait::Stopped => {
                if let Some(mut state) = self.still_in_progress(module).await? {
                    state.status = DetailStatus::Pending;
                    self.registry.set_detail_state(module, state).await?;
                }
                Ok(Attempt::Done)
            }
        }
    }

    /// Current request state of `module`, if nothing has settled it yet.
    async fn still_in_progress(
        &self,
        module: Address,
    ) -> Result<Option<DetailRequestState>, StoreError> {
        Ok(self
            .registry
            .get(module)
            .await?
            .map(|device| device.detail)
            .filter(|detail| detail.status == DetailStatus::InProgress))
    }

    async fn wait_for_ack(
        &self,
        module: Address,
        acks: &mut broadcast::Receiver<Event>,
    ) -> AckWait {
        let deadline = Instant::now() + self.config.ack_timeout;
        let mut stopped = self.stopped.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = wait_stopped(&mut stopped) => return AckWait::Stopped,
                event = acks.recv() => match event {
                    Ok(Event::DetailAck(details)) if details.module == module => {
                        return AckWait::Acked;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "Detail", "Event bus lagged by {skipped} events");
                        if let Ok(Some(device)) = self.registry.get(module).await
                            && device.detail.status == DetailStatus::Completed
                        {
                            return AckWait::Acked;
                        }
                    }
                    Err(RecvError::Closed) => return AckWait::Stopped,
                },
                _ = sleep_until(deadline) => return AckWait::TimedOut,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRegistry;
    use busgate_core::types::{Device, ModuleDetails};
    use std::sync::Mutex;

    const MODULE: Address = Address::Module(0x0A01);

    #[derive(Clone, Copy)]
    enum Gateway {
        Silent,
        Answers,
        /// Stores the details but the ack never reaches the bus.
        AnswersUnseen,
        Offline,
    }

    struct FakeRequester {
        gateway: Mutex<Gateway>,
        registry: Arc<MemoryRegistry>,
        event_bus: Arc<EventBus>,
        requests: Mutex<Vec<(Address, Instant)>>,
    }

    impl FakeRequester {
        fn requests(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request_times(&self) -> Vec<Instant> {
            self.requests.lock().unwrap().iter().map(|(_, at)| *at).collect()
        }

        fn set_gateway(&self, gateway: Gateway) {
            *self.gateway.lock().unwrap() = gateway;
        }
    }

    #[async_trait]
    impl DetailRequester for FakeRequester {
        async fn request_details(&self, module: Address) -> Result<(), ClientError> {
            let gateway = *self.gateway.lock().unwrap();
            if let Gateway::Offline = gateway {
                return Err(ClientError::NotConnected);
            }
            self.requests.lock().unwrap().push((module, Instant::now()));
            if let Gateway::Answers | Gateway::AnswersUnseen = gateway {
                let details = ModuleDetails {
                    module,
                    hardware_type: 0x20,
                    sensor_count: 0,
                    actor_count: 8,
                    firmware: (1, 4),
                };
                self.registry.apply_details(&details).await.unwrap();
                if let Gateway::Answers = gateway {
                    self.event_bus.dispatch(&Event::DetailAck(details));
                }
            }
            Ok(())
        }
    }

    struct Harness {
        registry: Arc<MemoryRegistry>,
        requester: Arc<FakeRequester>,
        scheduler: Arc<DetailScheduler>,
    }

    fn harness(gateway: Gateway, config: DetailSchedulerConfig) -> Harness {
        harness_with(gateway, config, [Device::module(MODULE)])
    }

    fn harness_with(
        gateway: Gateway,
        config: DetailSchedulerConfig,
        devices: impl IntoIterator<Item = Device>,
    ) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let registry = Arc::new(MemoryRegistry::with_devices(devices));
        let event_bus = Arc::new(EventBus::new());
        let requester = Arc::new(FakeRequester {
            gateway: Mutex::new(gateway),
            registry: registry.clone(),
            event_bus: event_bus.clone(),
            requests: Mutex::new(Vec::new()),
        });
        let scheduler = DetailScheduler::new(
            config,
            registry.clone(),
            requester.clone(),
            event_bus,
            Arc::new(Notify::new()),
        );
        Harness {
            registry,
            requester,
            scheduler,
        }
    }

    fn fast_config() -> DetailSchedulerConfig {
        DetailSchedulerConfig {
            ack_timeout: Duration::from_secs(1),
            request_delay: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(100),
            ..Default::default()
        }
    }

    async fn status(registry: &MemoryRegistry) -> (DetailStatus, u32) {
        let device = registry.get(MODULE).await.unwrap().unwrap();
        (device.detail.status, device.detail.retry_count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_completes_device() {
        let h = harness(Gateway::Answers, fast_config());
        let task = tokio::spawn(h.scheduler.clone().run());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(status(&h.registry).await, (DetailStatus::Completed, 0));
        assert_eq!(h.requester.requests(), 1);

        h.scheduler.stop().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_device_fails_after_max_retries() {
        let h = harness(Gateway::Silent, fast_config());
        let task = tokio::spawn(h.scheduler.clone().run());

        sleep(Duration::from_secs(30)).await;
        assert_eq!(status(&h.registry).await, (DetailStatus::Failed, 3));
        assert_eq!(h.requester.requests(), 3);

        // Failed devices are never picked up again.
        h.scheduler.wake();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.requester.requests(), 3);

        h.scheduler.stop().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_nothing_in_progress() {
        let config = DetailSchedulerConfig {
            ack_timeout: Duration::from_secs(60),
            ..fast_config()
        };
        let h = harness(Gateway::Silent, config);
        let task = tokio::spawn(h.scheduler.clone().run());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(status(&h.registry).await, (DetailStatus::InProgress, 0));

        h.scheduler.stop().await;
        assert!(h.scheduler.is_stopped());
        task.await.unwrap();
        assert_eq!(status(&h.registry).await, (DetailStatus::Pending, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_keeps_pending_without_spending_retries() {
        let h = harness(Gateway::Offline, fast_config());
        let task = tokio::spawn(h.scheduler.clone().run());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(status(&h.registry).await, (DetailStatus::Pending, 0));

        h.scheduler.stop().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_device_is_requested_after_wake() {
        let h = harness(Gateway::Offline, fast_config());
        let task = tokio::spawn(h.scheduler.clone().run());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.requester.requests(), 0);

        h.requester.set_gateway(Gateway::Answers);
        h.scheduler.wake();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(status(&h.registry).await, (DetailStatus::Completed, 0));
        assert_eq!(h.requester.requests(), 1);

        h.scheduler.stop().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_racing_the_deadline_still_completes() {
        let config = DetailSchedulerConfig {
            ack_timeout: Duration::ZERO,
            max_retries: 1,
            ..fast_config()
        };
        let h = harness(Gateway::Answers, config);
        let task = tokio::spawn(h.scheduler.clone().run());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(status(&h.registry).await, (DetailStatus::Completed, 0));

        h.scheduler.stop().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_details_stored_without_ack() {
        let config = DetailSchedulerConfig {
            max_retries: 1,
            ..fast_config()
        };
        let h = harness(Gateway::AnswersUnseen, config);
        let task = tokio::spawn(h.scheduler.clone().run());

        sleep(Duration::from_secs(5)).await;
        let device = h.registry.get(MODULE).await.unwrap().unwrap();
        assert_eq!(device.detail.status, DetailStatus::Completed);
        assert_eq!(device.detail.retry_count, 0);
        assert_eq!(device.actor_count, 8);
        assert_eq!(h.requester.requests(), 1);

        h.scheduler.stop().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spaced_by_request_delay() {
        let config = DetailSchedulerConfig {
            request_delay: Duration::from_millis(500),
            ..fast_config()
        };
        let h = harness_with(
            Gateway::Answers,
            config.clone(),
            [
                Device::module(Address::Module(0x0A01)),
                Device::module(Address::Module(0x0A02)),
            ],
        );
        let task = tokio::spawn(h.scheduler.clone().run());

        sleep(Duration::from_secs(5)).await;
        let times = h.requester.request_times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= config.request_delay);

        h.scheduler.stop().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_wait_for_backoff() {
        let config = DetailSchedulerConfig {
            ack_timeout: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(2),
            ..fast_config()
        };
        let h = harness(Gateway::Silent, config.clone());
        let task = tokio::spawn(h.scheduler.clone().run());

        // First timeout at 1s, retry not before 3s.
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.requester.requests(), 1);

        sleep(Duration::from_secs(30)).await;
        let times = h.requester.request_times();
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= config.ack_timeout + config.backoff_for(1));
        assert!(times[2] - times[1] >= config.ack_timeout + config.backoff_for(2));
        assert_eq!(status(&h.registry).await, (DetailStatus::Failed, 3));

        h.scheduler.stop().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_request_goes_out_after_stop() {
        let h = harness(Gateway::Answers, fast_config());
        let mut acks = h.scheduler.event_bus.subscribe();
        h.scheduler.stop().await;

        let attempt = h.scheduler.request_one(MODULE, &mut acks).await.unwrap();
        assert!(matches!(attempt, Attempt::Done));
        assert_eq!(h.requester.requests(), 0);
        assert_eq!(status(&h.registry).await, (DetailStatus::Pending, 0));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = DetailSchedulerConfig::default();
        assert_eq!(config.backoff_for(1), Duration::from_secs(2));
        assert_eq!(config.backoff_for(2), Duration::from_secs(4));
        assert_eq!(config.backoff_for(3), Duration::from_secs(8));
        assert_eq!(config.backoff_for(6), Duration::from_secs(60));
        assert_eq!(config.backoff_for(200), Duration::from_secs(60));
    }

    #[test]
    fn test_config_durations_are_milliseconds() {
        let config: DetailSchedulerConfig =
            serde_json::from_str(r#"{"ack_timeout": 250, "max_backoff": 1000}"#).unwrap();
        assert_eq!(config.ack_timeout, Duration::from_millis(250));
        assert_eq!(config.max_backoff, Duration::from_secs(1));
        assert_eq!(config.max_retries, 3);
        assert!(config.enabled);
    }
}
