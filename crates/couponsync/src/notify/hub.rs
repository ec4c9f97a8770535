use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use couponsync_core::cache::broker_channel;
use couponsync_core::entity::{ChangeEvent, EntityType, ALL_CHANNEL};

use super::{BridgeHandle, BrokerEnvelope, BrokerState, ClientMessage, NotifyError};

/// A locally connected client.
#[derive(Debug)]
struct ClientConnection {
    channels: HashSet<String>,
    sender: mpsc::Sender<ClientMessage>,
    connected_at: DateTime<Utc>,
}

impl ClientConnection {
    fn wants(&self, event: &ChangeEvent) -> bool {
        self.channels.iter().any(|c| event.matches_channel(c))
    }

    fn sorted_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.iter().cloned().collect();
        channels.sort();
        channels
    }
}

/// Connection statistics reported on the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub instance_id: String,
    pub connected_clients: usize,
    pub broker: BrokerState,
    pub published: u64,
    pub delivered: u64,
    pub failed_deliveries: u64,
    pub remote_received: u64,
}

fn validate_channel(channel: &str) -> Result<(), NotifyError> {
    let known = channel == ALL_CHANNEL || EntityType::all().iter().any(|t| t.plural() == channel);
    if known {
        Ok(())
    } else {
        Err(NotifyError::UnknownChannel(channel.to_string()))
    }
}

/// Registry of locally connected clients plus cross-instance fan-out.
///
/// Each client owns a bounded outbound queue. Delivery uses `try_send`, so a
/// slow or vanished client never holds up the others: a full queue drops the
/// message for that client only, and a closed queue removes the client.
#[derive(Debug)]
pub struct NotificationHub {
    instance_id: String,
    clients: RwLock<HashMap<String, ClientConnection>>,
    bridge: BridgeHandle,
    queue_capacity: usize,
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    remote_received: AtomicU64,
}

impl NotificationHub {
    pub fn new(bridge: BridgeHandle, queue_capacity: usize) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            clients: RwLock::new(HashMap::new()),
            bridge,
            queue_capacity: queue_capacity.max(1),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            remote_received: AtomicU64::new(0),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<String, ClientConnection>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<String, ClientConnection>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a client subscribed to `channels`.
    ///
    /// The first message on the returned receiver is the `subscribed`
    /// confirmation.
    pub fn connect(
        &self,
        channels: &[String],
    ) -> Result<(String, mpsc::Receiver<ClientMessage>), NotifyError> {
        for channel in channels {
            validate_channel(channel)?;
        }

        let client_id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let connection = ClientConnection {
            channels: channels.iter().cloned().collect(),
            sender,
            connected_at: Utc::now(),
        };
        let _ = connection.sender.try_send(ClientMessage::Subscribed {
            client_id: client_id.clone(),
            channels: connection.sorted_channels(),
        });

        let mut clients = self.write_clients();
        clients.insert(client_id.clone(), connection);
        tracing::info!(
            client_id = %client_id,
            channels = ?channels,
            connected = clients.len(),
            "Client connected"
        );

        Ok((client_id, receiver))
    }

    /// Removes a client. Returns false if it was not connected.
    pub fn disconnect(&self, client_id: &str) -> bool {
        let removed = self.write_clients().remove(client_id);
        if let Some(connection) = &removed {
            let session = Utc::now() - connection.connected_at;
            tracing::info!(
                client_id = %client_id,
                session_secs = session.num_seconds(),
                "Client disconnected"
            );
        }
        removed.is_some()
    }

    /// Adds channels to a client's subscription set and returns the full set.
    ///
    /// The updated set is also confirmed on the client's stream. A full
    /// queue loses that confirmation, which is logged and counted as a failed
    /// delivery; the subscription itself still applies.
    pub fn subscribe(&self, client_id: &str, channels: &[String]) -> Result<Vec<String>, NotifyError> {
        for channel in channels {
            validate_channel(channel)?;
        }

        let (all, confirmation) = {
            let mut clients = self.write_clients();
            let connection = clients
                .get_mut(client_id)
                .ok_or_else(|| NotifyError::UnknownClient(client_id.to_string()))?;
            connection.channels.extend(channels.iter().cloned());

            let all = connection.sorted_channels();
            let confirmation = connection.sender.try_send(ClientMessage::Subscribed {
                client_id: client_id.to_string(),
                channels: all.clone(),
            });
            (all, confirmation)
        };

        match confirmation {
            Ok(()) => Ok(all),
            Err(TrySendError::Full(_)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    client_id = %client_id,
                    "Client queue full, dropping subscription confirmation"
                );
                Ok(all)
            }
            Err(TrySendError::Closed(_)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.disconnect(client_id);
                Err(NotifyError::UnknownClient(client_id.to_string()))
            }
        }
    }

    /// Answers a client heartbeat with a timestamped acknowledgment.
    pub fn heartbeat(&self, client_id: &str) -> Result<DateTime<Utc>, NotifyError> {
        let timestamp = Utc::now();
        let result = {
            let clients = self.read_clients();
            let connection = clients
                .get(client_id)
                .ok_or_else(|| NotifyError::UnknownClient(client_id.to_string()))?;
            connection.sender.try_send(ClientMessage::HeartbeatAck {
                client_id: client_id.to_string(),
                timestamp,
            })
        };

        match result {
            Ok(()) => Ok(timestamp),
            // Still alive, just behind; the reply itself is the acknowledgment.
            Err(TrySendError::Full(_)) => Ok(timestamp),
            Err(TrySendError::Closed(_)) => {
                self.disconnect(client_id);
                Err(NotifyError::UnknownClient(client_id.to_string()))
            }
        }
    }

    /// Delivers an event to local clients whose subscriptions match it.
    ///
    /// Returns how many clients it reached.
    pub fn broadcast_locally(&self, event: &ChangeEvent) -> usize {
        let message = ClientMessage::change(event);
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let clients = self.read_clients();
            for (client_id, connection) in clients.iter().filter(|(_, c)| c.wants(event)) {
                match connection.sender.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            client_id = %client_id,
                            entity_id = %event.entity_id,
                            "Client queue full, dropping message"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        closed.push(client_id.clone());
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut clients = self.write_clients();
            for client_id in &closed {
                clients.remove(client_id);
            }
            tracing::debug!(pruned = closed.len(), "Removed closed client connections");
        }

        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Fans an event out locally, then forwards it to peer instances.
    ///
    /// Local delivery happens even when the broker is unreachable; the
    /// broker failure is still returned so the caller can react to it.
    pub async fn publish(&self, event: &ChangeEvent) -> Result<usize, NotifyError> {
        self.published.fetch_add(1, Ordering::Relaxed);
        let delivered = self.broadcast_locally(event);

        let envelope = BrokerEnvelope {
            origin: self.instance_id.clone(),
            event: event.clone(),
        };
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| NotifyError::Serialization(e.to_string()))?;

        self.bridge
            .publish(&broker_channel(event.entity_type), payload)
            .await?;

        tracing::debug!(
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            version = event.version,
            delivered,
            "Change event published"
        );
        Ok(delivered)
    }

    /// Handles a payload received from the broker.
    pub fn receive_remote(&self, payload: &str) {
        let envelope: BrokerEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed broker message");
                return;
            }
        };

        // Our own publish echoed back; local clients already have it.
        if envelope.origin == self.instance_id {
            return;
        }

        self.remote_received.fetch_add(1, Ordering::Relaxed);
        self.broadcast_locally(&envelope.event);
    }

    pub fn broker_state(&self) -> BrokerState {
        self.bridge.state()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            instance_id: self.instance_id.clone(),
            connected_clients: self.read_clients().len(),
            broker: self.bridge.state(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_deliveries: self.failed.load(Ordering::Relaxed),
            remote_received: self.remote_received.load(Ordering::Relaxed),
        }
    }
}
