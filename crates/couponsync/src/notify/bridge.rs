//! Broker bridge: the supervised task that owns the broker subscription.
//!
//! Request handlers never touch the broker connection. They send publish
//! commands through a [`BridgeHandle`] and get the outcome back on a oneshot
//! channel, while the bridge task handles subscription loss, reconnect
//! backoff and the fall back to local-only delivery.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use couponsync_core::cache::CachePubSub;

use super::{NotificationHub, NotifyError};
use crate::config::Config;

/// Commands queued between the bridge task and its handles.
const COMMAND_CAPACITY: usize = 256;

/// Connection state of the broker bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerState {
    /// First subscription not established yet.
    Connecting,
    Connected,
    /// Subscription lost, backing off between attempts.
    Reconnecting,
    /// Gave up on the broker; events reach local clients only until a
    /// periodic re-probe subscribes again.
    Degraded,
}

/// Exponential backoff with jitter and a bounded number of attempts.
///
/// Once the attempts run out the bridge degrades, then keeps probing the
/// broker every `degraded_reprobe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub degraded_reprobe: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.broker_reconnect_attempts.max(1),
            base_delay: config.broker_reconnect_base,
            max_delay: config.broker_reconnect_max,
            degraded_reprobe: config.broker_degraded_reprobe.max(Duration::from_millis(100)),
        }
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }

    /// Backoff plus up to 20% random jitter, so peers that lost the broker
    /// together do not reconnect in lockstep.
    fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let jitter_ms = backoff.as_millis() as u64 / 5;
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            degraded_reprobe: Duration::from_secs(60),
        }
    }
}

enum BridgeCommand {
    Publish {
        channel: String,
        payload: String,
        reply: oneshot::Sender<Result<(), NotifyError>>,
    },
}

/// Cheap, cloneable access to the bridge task.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    commands: mpsc::Sender<BridgeCommand>,
    state: watch::Receiver<BrokerState>,
}

impl std::fmt::Debug for BridgeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeCommand::Publish { channel, .. } => {
                f.debug_struct("Publish").field("channel", channel).finish()
            }
        }
    }
}

impl BridgeHandle {
    /// A handle with no broker behind it, permanently in degraded mode.
    pub fn local_only() -> Self {
        let (commands, _) = mpsc::channel(1);
        let (_, state) = watch::channel(BrokerState::Degraded);
        Self { commands, state }
    }

    pub fn state(&self) -> BrokerState {
        *self.state.borrow()
    }

    /// Publishes a payload to peers through the bridge task.
    pub async fn publish(&self, channel: &str, payload: String) -> Result<(), NotifyError> {
        if self.state() == BrokerState::Degraded {
            return Err(NotifyError::BrokerDegraded);
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(BridgeCommand::Publish {
                channel: channel.to_string(),
                payload,
                reply,
            })
            .await
            .map_err(|_| NotifyError::BridgeClosed)?;

        response.await.map_err(|_| NotifyError::BridgeClosed)?
    }
}

/// The bridge task, before it is spawned.
pub struct BrokerBridge {
    broker: Arc<dyn CachePubSub>,
    channels: Vec<String>,
    policy: ReconnectPolicy,
    publish_timeout: Duration,
    commands: mpsc::Receiver<BridgeCommand>,
    state: watch::Sender<BrokerState>,
}

impl BrokerBridge {
    /// Creates the bridge and the handle the hub publishes through.
    pub fn new(
        broker: Arc<dyn CachePubSub>,
        channels: Vec<String>,
        policy: ReconnectPolicy,
        publish_timeout: Duration,
    ) -> (BridgeHandle, Self) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(BrokerState::Connecting);

        let handle = BridgeHandle {
            commands: commands_tx,
            state: state_rx,
        };
        let bridge = Self {
            broker,
            channels,
            policy,
            publish_timeout,
            commands,
            state: state_tx,
        };
        (handle, bridge)
    }

    /// Spawns the bridge task. Remote events are fanned out through `hub`.
    pub fn spawn(
        self,
        hub: Arc<NotificationHub>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(hub, shutdown_rx))
    }

    fn set_state(&self, state: BrokerState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!(from = ?*current, to = ?state, "Broker bridge state changed");
            *current = state;
            true
        });
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        if *self.state.borrow() == BrokerState::Degraded {
            return Err(NotifyError::BrokerDegraded);
        }
        match tokio::time::timeout(self.publish_timeout, self.broker.publish(channel, payload))
            .await
        {
            Ok(result) => result.map_err(NotifyError::from),
            Err(_) => Err(NotifyError::Broker(
                couponsync_core::cache::CacheError::Timeout(
                    self.publish_timeout.as_millis() as u64
                ),
            )),
        }
    }

    async fn run(mut self, hub: Arc<NotificationHub>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut subscription: Option<mpsc::Receiver<String>> = None;
        let mut attempt: u32 = 0;
        let mut retry_at: Option<Instant> = Some(Instant::now());

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(BridgeCommand::Publish { channel, payload, reply }) = command else {
                        debug!("All bridge handles dropped");
                        break;
                    };
                    let result = self.publish(&channel, &payload).await;
                    if let Err(e) = &result {
                        warn!(channel = %channel, error = %e, "Broker publish failed");
                    }
                    let _ = reply.send(result);
                }

                message = recv_subscription(&mut subscription), if subscription.is_some() => {
                    match message {
                        Some(payload) => hub.receive_remote(&payload),
                        None => {
                            warn!("Broker subscription lost");
                            subscription = None;
                            attempt = 0;
                            retry_at = Some(Instant::now());
                            self.set_state(BrokerState::Reconnecting);
                        }
                    }
                }

                _ = wait_until(retry_at), if retry_at.is_some() => {
                    attempt += 1;
                    match self.broker.subscribe(&self.channels).await {
                        Ok(rx) => {
                            info!(channels = ?self.channels, attempt, "Subscribed to broker channels");
                            subscription = Some(rx);
                            attempt = 0;
                            retry_at = None;
                            self.set_state(BrokerState::Connected);
                        }
                        Err(e) if *self.state.borrow() == BrokerState::Degraded => {
                            debug!(error = %e, "Broker still unreachable");
                            retry_at = Some(Instant::now() + self.policy.degraded_reprobe);
                        }
                        Err(e) if attempt >= self.policy.max_attempts => {
                            error!(
                                error = %e,
                                attempts = attempt,
                                reprobe_secs = self.policy.degraded_reprobe.as_secs(),
                                "Giving up on the broker, delivering to local clients only"
                            );
                            retry_at = Some(Instant::now() + self.policy.degraded_reprobe);
                            self.set_state(BrokerState::Degraded);
                        }
                        Err(e) => {
                            let delay = self.policy.delay(attempt);
                            warn!(
                                error = %e,
                                attempt,
                                max_attempts = self.policy.max_attempts,
                                delay_ms = delay.as_millis() as u64,
                                "Broker subscribe failed, retrying"
                            );
                            retry_at = Some(Instant::now() + delay);
                            if *self.state.borrow() != BrokerState::Connecting {
                                self.set_state(BrokerState::Reconnecting);
                            }
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    debug!("Broker bridge shutting down");
                    break;
                }
            }
        }
    }
}

async fn recv_subscription(subscription: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
