//! Forwarding of device-originated status reports into the state manager

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::{
    backend::{Backends, MqttMessage, PropertyReport},
    core::{device_state::DeviceStateManager, types::DeviceStatus},
    transport::{Transports, mqtt},
};

/// Topic filter covering every device's status topic
pub const STATUS_TOPIC_FILTER: &str = mqtt::STATUS_FILTER;

/// Background tasks feeding MQTT and Matter status reports to a
/// [`DeviceStateManager`]; aborted on drop
pub struct StatusFeed {
    tasks: Vec<JoinHandle<()>>,
}

impl StatusFeed {
    /// Start forwarding
    ///
    /// MQTT messages only arrive for topics the broker connection subscribes.
    pub fn start<B: Backends>(transports: &Transports<B>, states: Arc<DeviceStateManager>) -> Self {
        let mut mqtt = transports.mqtt.receive_messages(STATUS_TOPIC_FILTER);
        let mqtt_states = states.clone();
        let mqtt_task = tokio::spawn(async move {
            while let Some(message) = mqtt.next().await {
                match status_from_mqtt(&message) {
                    Some((device_id, status)) => {
                        trace!(%device_id, ?status, "mqtt status report");
                        mqtt_states.update_device_status(device_id, status).await;
                    }
                    None => warn!(topic = %message.topic, "unreadable status message"),
                }
            }
            debug!("mqtt status feed ended");
        });

        let mut matter = transports.matter.property_reports();
        let matter_task = tokio::spawn(async move {
            while let Some(report) = matter.next().await {
                if let Some(status) = status_from_matter(&report) {
                    trace!(device_id = %report.device_id, ?status, "matter status report");
                    states.update_device_status(&report.device_id, status).await;
                }
            }
            debug!("matter status feed ended");
        });

        Self {
            tasks: vec![mqtt_task, matter_task],
        }
    }

    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for StatusFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `devices/{id}/status` carrying `"charging"` or `{"status": "charging"}`
fn status_from_mqtt(message: &MqttMessage) -> Option<(&str, DeviceStatus)> {
    let device_id = message
        .topic
        .strip_prefix("devices/")?
        .strip_suffix("/status")?;
    if device_id.is_empty() || device_id.contains('/') {
        return None;
    }

    let status = match serde_json::from_slice::<Value>(&message.payload) {
        Ok(Value::Object(mut map)) => serde_json::from_value(map.remove("status")?).ok()?,
        Ok(value) => serde_json::from_value(value).ok()?,
        Err(_) => {
            let text = std::str::from_utf8(&message.payload).ok()?.trim();
            serde_json::from_value(Value::String(text.to_string())).ok()?
        }
    };
    Some((device_id, status))
}

fn status_from_matter(report: &PropertyReport) -> Option<DeviceStatus> {
    serde_json::from_value(report.properties.get("status")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::testing::rig;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    fn message(topic: &str, payload: &str) -> MqttMessage {
        MqttMessage::new(topic, payload)
    }

    #[test]
    fn test_mqtt_payload_forms() {
        assert_eq!(
            status_from_mqtt(&message("devices/d1/status", "charging")),
            Some(("d1", DeviceStatus::Charging))
        );
        assert_eq!(
            status_from_mqtt(&message("devices/d1/status", r#""working""#)),
            Some(("d1", DeviceStatus::Working))
        );
        assert_eq!(
            status_from_mqtt(&message("devices/d1/status", r#"{"status":"error","code":7}"#)),
            Some(("d1", DeviceStatus::Error))
        );
        assert_eq!(status_from_mqtt(&message("devices/d1/status", "sleepy")), None);
        assert_eq!(status_from_mqtt(&message("devices/d1/responses", "idle")), None);
    }

    async fn eventually(states: &DeviceStateManager, device_id: &str, expected: DeviceStatus) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while states.get_device_status(device_id).await != Some(expected) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_forwards_mqtt_and_matter_reports() {
        let rig = rig().await;
        rig.transports
            .mqtt
            .connect_broker("localhost", 1883, "feed")
            .await
            .unwrap();
        rig.transports
            .mqtt
            .subscribe(STATUS_TOPIC_FILTER)
            .await
            .unwrap();
        let states = Arc::new(DeviceStateManager::new());
        let _feed = StatusFeed::start(&rig.transports, states.clone());

        rig.broker.inject("devices/d1/status", "charging").await;
        eventually(&states, "d1", DeviceStatus::Charging).await;

        let mut properties = Map::new();
        properties.insert("status".into(), json!("working"));
        properties.insert("onOff".into(), json!(true));
        rig.fabric.report("node-1", properties);
        eventually(&states, "node-1", DeviceStatus::Working).await;
    }

    #[test]
    fn test_reports_without_status_are_ignored() {
        let report = PropertyReport {
            device_id: "node-1".into(),
            properties: Map::from_iter([("level".to_string(), json!(40))]),
        };
        assert_eq!(status_from_matter(&report), None);
    }
}
