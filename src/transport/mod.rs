//! Transport layer for the messaging session
//!
//! This module provides the transport abstraction the messaging client talks
//! to, and its MQTT implementation.

use serde::Serialize;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::{EventRoute, MqttError};

/// Process-local identifier handed back for each publish/subscribe request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MessageId(pub u64);

/// Transport trait for the broker session
///
/// This trait provides an abstraction over the broker connection to enable
/// dependency injection and testing. All traffic is at-least-once and never
/// retained.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open the session; routed events arrive on the returned channel
    async fn start(&self) -> Result<mpsc::Receiver<EventRoute>, MqttError>;

    /// Publish an already serialized payload
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<MessageId, MqttError>;

    /// Subscribe to a topic filter
    async fn subscribe(&self, topic: &str) -> Result<MessageId, MqttError>;

    /// Stop the session without reporting a loss
    async fn stop(&self) -> Result<(), MqttError>;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
