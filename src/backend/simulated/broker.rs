//! Simulated MQTT broker session

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::sync::{Mutex, broadcast};

use super::simulated_response;
use crate::{
    backend::{MqttBroker, MqttMessage},
    core::{
        command::CommandPayload,
        error::{MqttError, MqttResult},
        types::DeviceStatus,
    },
    util::topic_matches,
};

#[derive(Debug)]
struct BrokerInner {
    connected: bool,
    subscriptions: HashSet<String>,
    should_fail_connect: bool,
    should_fail_subscribe: bool,
    should_fail_publish: bool,
    auto_respond: bool,
    reported_status: DeviceStatus,
    latency: Duration,
    published: Vec<MqttMessage>,
}

impl BrokerInner {
    fn ensure_connected(&self) -> MqttResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|f| topic_matches(f, topic))
    }
}

/// Simulated broker answering `devices/{id}/commands` on `devices/{id}/responses`
#[derive(Debug, Clone)]
pub struct SimulatedBroker {
    inner: Arc<Mutex<BrokerInner>>,
    messages: broadcast::Sender<MqttMessage>,
}

impl SimulatedBroker {
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(BrokerInner {
                connected: false,
                subscriptions: HashSet::new(),
                should_fail_connect: false,
                should_fail_subscribe: false,
                should_fail_publish: false,
                auto_respond: true,
                reported_status: DeviceStatus::Idle,
                latency: Duration::ZERO,
                published: vec![],
            })),
            messages,
        }
    }

    pub async fn set_connect_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_connect = should_fail;
    }

    pub async fn set_subscribe_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_subscribe = should_fail;
    }

    pub async fn set_publish_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_publish = should_fail;
    }

    pub async fn set_auto_respond(&self, auto_respond: bool) {
        self.inner.lock().await.auto_respond = auto_respond;
    }

    pub async fn set_reported_status(&self, status: DeviceStatus) {
        self.inner.lock().await.reported_status = status;
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.inner.lock().await.latency = latency;
    }

    /// Deliver a device-originated message, if anything subscribes to its topic
    pub async fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let inner = self.inner.lock().await;
        if inner.is_subscribed(topic) {
            let _ = self.messages.send(MqttMessage::new(topic, payload));
        }
    }

    pub async fn publish_count(&self) -> usize {
        self.inner.lock().await.published.len()
    }

    pub async fn published(&self) -> Vec<MqttMessage> {
        self.inner.lock().await.published.clone()
    }

    pub async fn subscriptions(&self) -> HashSet<String> {
        self.inner.lock().await.subscriptions.clone()
    }
}

impl Default for SimulatedBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttBroker for SimulatedBroker {
    async fn connect(&self, host: &str, port: u16, _client_id: &str) -> MqttResult<()> {
        let latency = self.inner.lock().await.latency;
        tokio::time::sleep(latency).await;

        let mut inner = self.inner.lock().await;
        if inner.should_fail_connect {
            return Err(MqttError::ConnectionFailed(format!("{host}:{port} refused")));
        }
        inner.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> MqttResult<()> {
        let mut inner = self.inner.lock().await;
        inner.connected = false;
        inner.subscriptions.clear();
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> MqttResult<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_connected()?;
        if inner.should_fail_subscribe {
            return Err(MqttError::SubscriptionFailed(filter.to_string()));
        }
        inner.subscriptions.insert(filter.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> MqttResult<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_connected()?;
        inner.subscriptions.remove(filter);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> MqttResult<()> {
        let mut inner = self.inner.lock().await;
        inner.ensure_connected()?;
        if inner.should_fail_publish {
            return Err(MqttError::PublishFailed(topic.to_string()));
        }
        inner.published.push(MqttMessage::new(topic, payload));

        if !inner.auto_respond {
            return Ok(());
        }
        let Ok(command) = serde_json::from_slice::<CommandPayload>(payload) else {
            return Ok(());
        };
        let response_topic = format!("devices/{}/responses", command.device_id);
        if !inner.is_subscribed(&response_topic) {
            return Ok(());
        }

        let response = simulated_response(
            command.command_id,
            &command.device_id,
            command.command_type,
            inner.reported_status,
        );
        if let Ok(body) = serde_json::to_vec(&response) {
            let messages = self.messages.clone();
            let latency = inner.latency;
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                let _ = messages.send(MqttMessage::new(response_topic, body));
            });
        }

        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<MqttMessage> {
        self.messages.subscribe()
    }
}
