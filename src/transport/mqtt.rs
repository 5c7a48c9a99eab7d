//! MQTT transport
//!
//! Devices reached over WiFi talk MQTT: commands go to
//! `devices/{id}/commands`, devices answer on `devices/{id}/responses` and
//! report state on `devices/{id}/status`.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, future, stream::BoxStream};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    backend::{MqttBroker, MqttMessage},
    core::{
        command::{CommandResponse, ControlCommand},
        error::{MqttError, MqttResult},
        types::Device,
    },
    transport::{ControlTransport, bounded},
    util::{broadcast_stream, topic_matches},
};

/// Filter matching every device's status topic
pub const STATUS_FILTER: &str = "devices/+/status";

/// Filter matching every device's response topic
pub const RESPONSE_FILTER: &str = "devices/+/responses";

pub fn command_topic(device_id: &str) -> String {
    format!("devices/{device_id}/commands")
}

pub fn status_topic(device_id: &str) -> String {
    format!("devices/{device_id}/status")
}

pub fn response_topic(device_id: &str) -> String {
    format!("devices/{device_id}/responses")
}

/// Device id segment of a `devices/{id}/...` topic
pub fn device_id_from_topic(topic: &str) -> Option<&str> {
    let mut levels = topic.split('/');
    match (levels.next(), levels.next()) {
        (Some("devices"), Some(id)) if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// Time limits for MQTT operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqttTimeouts {
    pub connect: Duration,
    pub disconnect: Duration,
    /// Subscribe, unsubscribe and publish
    pub operation: Duration,
}

impl Default for MqttTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            disconnect: Duration::from_secs(5),
            operation: Duration::from_secs(5),
        }
    }
}

/// MQTT transport over an [`MqttBroker`] client
pub struct MqttTransport<K: MqttBroker> {
    broker: Arc<K>,
    timeouts: MqttTimeouts,
    connected: AtomicBool,
    topics: RwLock<HashSet<String>>,
}

impl<K: MqttBroker> MqttTransport<K> {
    pub fn new(broker: Arc<K>, timeouts: MqttTimeouts) -> Self {
        Self {
            broker,
            timeouts,
            connected: AtomicBool::new(false),
            topics: RwLock::new(HashSet::new()),
        }
    }

    /// Open the broker session
    pub async fn connect_broker(&self, host: &str, port: u16, client_id: &str) -> MqttResult<bool> {
        bounded(
            self.timeouts.connect,
            MqttError::Timeout,
            self.broker.connect(host, port, client_id),
        )
        .await?;

        self.connected.store(true, Ordering::SeqCst);
        info!(host, port, client_id, "mqtt broker connected");
        Ok(true)
    }

    /// Close the broker session and forget all subscriptions
    pub async fn disconnect_broker(&self) -> MqttResult<bool> {
        if !self.is_connected() {
            return Ok(true);
        }

        bounded(
            self.timeouts.disconnect,
            MqttError::Timeout,
            self.broker.disconnect(),
        )
        .await?;

        self.connected.store(false, Ordering::SeqCst);
        self.topics.write().await.clear();
        info!("mqtt broker disconnected");
        Ok(true)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn subscribed_topics(&self) -> HashSet<String> {
        self.topics.read().await.clone()
    }

    fn ensure_connected(&self) -> MqttResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }

    pub async fn subscribe(&self, topic: &str) -> MqttResult<bool> {
        self.ensure_connected()?;
        bounded(
            self.timeouts.operation,
            MqttError::Timeout,
            self.broker.subscribe(topic),
        )
        .await?;

        self.topics.write().await.insert(topic.to_string());
        debug!(topic, "mqtt subscribed");
        Ok(true)
    }

    pub async fn unsubscribe(&self, topic: &str) -> MqttResult<bool> {
        self.ensure_connected()?;
        bounded(
            self.timeouts.operation,
            MqttError::Timeout,
            self.broker.unsubscribe(topic),
        )
        .await?;

        self.topics.write().await.remove(topic);
        debug!(topic, "mqtt unsubscribed");
        Ok(true)
    }

    pub async fn publish(&self, topic: &str, message: &str) -> MqttResult<bool> {
        self.ensure_connected()?;
        bounded(
            self.timeouts.operation,
            MqttError::Timeout,
            self.broker.publish(topic, message.as_bytes()),
        )
        .await?;

        debug!(topic, len = message.len(), "mqtt published");
        Ok(true)
    }

    /// Inbound messages whose topic matches `filter`, from now on
    pub fn receive_messages(&self, filter: &str) -> BoxStream<'static, MqttMessage> {
        let filter = filter.to_string();
        broadcast_stream(self.broker.messages())
            .filter(move |message| future::ready(topic_matches(&filter, &message.topic)))
            .boxed()
    }
}

impl<K: MqttBroker> ControlTransport for MqttTransport<K> {
    type Error = MqttError;

    fn is_service_available(&self) -> bool {
        self.is_connected()
    }

    /// MQTT devices are registered, not discovered
    async fn scan_for_devices(&self) -> MqttResult<Vec<Device>> {
        self.ensure_connected()?;
        Ok(Vec::new())
    }

    /// Attach to the device's status and response topics
    async fn connect(&self, device: &Device) -> MqttResult<bool> {
        self.subscribe(&status_topic(&device.id)).await?;
        self.subscribe(&response_topic(&device.id)).await?;
        info!(device_id = %device.id, "mqtt device attached");
        Ok(true)
    }

    async fn disconnect(&self, device: &Device) -> MqttResult<bool> {
        self.unsubscribe(&status_topic(&device.id)).await?;
        self.unsubscribe(&response_topic(&device.id)).await?;
        info!(device_id = %device.id, "mqtt device detached");
        Ok(true)
    }

    async fn send_command(&self, command: &ControlCommand, device: &Device) -> MqttResult<bool> {
        let payload = command
            .to_payload()
            .map_err(|e| MqttError::PublishFailed(e.to_string()))?;
        self.publish(&command_topic(&device.id), &payload).await
    }

    fn command_responses(&self) -> BoxStream<'static, CommandResponse> {
        self.receive_messages(RESPONSE_FILTER)
            .filter_map(|message| future::ready(CommandResponse::from_payload(&message.payload)))
            .boxed()
    }
}
