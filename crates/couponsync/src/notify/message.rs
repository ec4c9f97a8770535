use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use couponsync_core::entity::ChangeEvent;

/// Message pushed to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// An entity changed. `version` is repeated at the top level so clients
    /// can resolve overlapping updates without parsing the event.
    Change {
        channel: String,
        version: i64,
        event: ChangeEvent,
    },
    /// Reply to a client heartbeat.
    HeartbeatAck {
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The client's full subscription set after connect or subscribe. Also
    /// tells a fresh connection the id to use for heartbeats.
    Subscribed {
        client_id: String,
        channels: Vec<String>,
    },
}

impl ClientMessage {
    pub fn change(event: &ChangeEvent) -> Self {
        ClientMessage::Change {
            channel: event.channel().to_string(),
            version: event.version,
            event: event.clone(),
        }
    }

    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Change { .. } => "change",
            ClientMessage::HeartbeatAck { .. } => "heartbeat_ack",
            ClientMessage::Subscribed { .. } => "subscribed",
        }
    }
}

/// Payload carried on the broker between instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerEnvelope {
    /// Instance that published the event. It already fanned out locally.
    pub origin: String,
    pub event: ChangeEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use couponsync_core::entity::{ChangeType, Entity, EntityType};
    use serde_json::json;

    #[test]
    fn test_change_message_shape() {
        let coupon = Entity::new(
            EntityType::Coupon,
            "c1",
            json!({"title": "Deal", "storeId": "s1"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let event = ChangeEvent::from_entity(&coupon, ChangeType::Created, 1700000000000);

        let message = ClientMessage::change(&event);
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "change");
        assert_eq!(value["channel"], "coupons");
        assert_eq!(value["version"], 1700000000000i64);
        assert_eq!(value["event"]["entityId"], "c1");
        assert_eq!(message.event_name(), "change");
    }

    #[test]
    fn test_heartbeat_ack_shape() {
        let message = ClientMessage::HeartbeatAck {
            client_id: "abc".to_string(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "heartbeat_ack");
        assert_eq!(value["client_id"], "abc");
    }
}
