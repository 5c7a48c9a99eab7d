//! MQTT broker client boundary

use tokio::sync::broadcast;
use trait_variant::make;

use crate::core::error::MqttResult;

/// A message delivered on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl MqttMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Abstraction over an MQTT client session
///
/// Only messages on topics matching an active subscription are delivered
/// on the message channel.
#[make(Send)]
pub trait MqttBroker: Send + Sync + 'static {
    async fn connect(&self, host: &str, port: u16, client_id: &str) -> MqttResult<()>;

    async fn disconnect(&self) -> MqttResult<()>;

    async fn subscribe(&self, filter: &str) -> MqttResult<()>;

    async fn unsubscribe(&self, filter: &str) -> MqttResult<()>;

    async fn publish(&self, topic: &str, payload: &[u8]) -> MqttResult<()>;

    /// Subscribe to inbound messages
    fn messages(&self) -> broadcast::Receiver<MqttMessage>;
}
