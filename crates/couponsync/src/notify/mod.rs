//! Real-time change notification.
//!
//! The [`NotificationHub`] owns the process-local client registry. The
//! broker bridge is a supervised task that owns the broker subscription and
//! carries events between this instance and its peers.

mod bridge;
mod error;
mod hub;
mod message;

pub use bridge::{BridgeHandle, BrokerBridge, BrokerState, ReconnectPolicy};
pub use error::NotifyError;
pub use hub::{HubStats, NotificationHub};
pub use message::{BrokerEnvelope, ClientMessage};
