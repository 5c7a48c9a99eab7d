//! Per-device connection bookkeeping across transports
//!
//! The connection map is written only after a transport reports a successful
//! connect or disconnect. Transport errors are returned as they came.

use std::collections::HashMap;

use futures::{StreamExt, future, stream::BoxStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    backend::Backends,
    core::{
        error::TransportResult,
        types::{ConnectionType, Device},
    },
    transport::{ControlTransport, Transports},
    util::watch_stream,
};

pub struct ConnectionManager<B: Backends> {
    transports: Transports<B>,
    status: watch::Sender<HashMap<String, bool>>,
}

impl<B: Backends> ConnectionManager<B> {
    pub fn new(transports: Transports<B>) -> Self {
        let (status, _) = watch::channel(HashMap::new());
        Self { transports, status }
    }

    pub fn transports(&self) -> &Transports<B> {
        &self.transports
    }

    pub async fn connect(&self, device: &Device) -> TransportResult<bool> {
        debug!(device_id = %device.id, connection_type = ?device.connection_type(), "routing connect");
        let connected = match device.connection_type() {
            ConnectionType::Bluetooth => self.transports.bluetooth.connect(device).await?,
            ConnectionType::Wifi | ConnectionType::Mqtt => {
                self.transports.mqtt.connect(device).await?
            }
            ConnectionType::Matter => self.transports.matter.connect(device).await?,
            ConnectionType::Cloud => self.transports.cloud.connect(device).await?,
        };

        if connected {
            self.record(&device.id, true);
            info!(device_id = %device.id, "device connected");
        } else {
            warn!(device_id = %device.id, "transport declined connection");
        }
        Ok(connected)
    }

    pub async fn disconnect(&self, device: &Device) -> TransportResult<bool> {
        debug!(device_id = %device.id, connection_type = ?device.connection_type(), "routing disconnect");
        let disconnected = match device.connection_type() {
            ConnectionType::Bluetooth => self.transports.bluetooth.disconnect(device).await?,
            ConnectionType::Wifi | ConnectionType::Mqtt => {
                self.transports.mqtt.disconnect(device).await?
            }
            ConnectionType::Matter => self.transports.matter.disconnect(device).await?,
            ConnectionType::Cloud => self.transports.cloud.disconnect(device).await?,
        };

        if disconnected {
            self.record(&device.id, false);
            info!(device_id = %device.id, "device disconnected");
        }
        Ok(disconnected)
    }

    fn record(&self, device_id: &str, connected: bool) {
        self.status.send_modify(|status| {
            status.insert(device_id.to_string(), connected);
        });
    }

    /// False for devices never connected
    pub fn is_connected(&self, device: &Device) -> bool {
        self.status
            .borrow()
            .get(&device.id)
            .copied()
            .unwrap_or(false)
    }

    /// The device's current flag, then each change of it
    pub fn connection_status(&self, device: &Device) -> BoxStream<'static, bool> {
        let device_id = device.id.clone();
        let mut last = None;
        watch_stream(self.status.subscribe())
            .filter_map(move |status| {
                let connected = status.get(&device_id).copied().unwrap_or(false);
                let changed = last != Some(connected);
                last = Some(connected);
                future::ready(changed.then_some(connected))
            })
            .boxed()
    }

    /// Snapshot of every device's flag
    pub fn connection_statuses(&self) -> HashMap<String, bool> {
        self.status.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{Simulated, SimulatedBroker, SimulatedRadio, simulated::ConnectBehavior},
        core::{
            error::{BluetoothError, MqttError, TransportError},
            types::DeviceKind,
        },
        transport::testing::rig,
    };
    use pretty_assertions::assert_eq;

    struct Fixture {
        radio: SimulatedRadio,
        broker: SimulatedBroker,
        manager: ConnectionManager<Simulated>,
    }

    async fn fixture() -> Fixture {
        let rig = rig().await;
        Fixture {
            radio: rig.radio,
            broker: rig.broker,
            manager: ConnectionManager::new(rig.transports),
        }
    }

    fn device(id: &str, connection_type: ConnectionType) -> Device {
        Device::new(id, "Device", DeviceKind::SmartLight, connection_type)
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_connected() {
        let f = fixture().await;
        assert!(!f.manager.is_connected(&device("nobody", ConnectionType::Cloud)));
    }

    #[tokio::test]
    async fn test_matter_connect_and_disconnect() {
        let f = fixture().await;
        let node = device("matter-1", ConnectionType::Matter);

        assert_eq!(f.manager.connect(&node).await, Ok(true));
        assert!(f.manager.is_connected(&node));
        assert!(f.manager.transports().matter.is_paired("matter-1").await);

        assert_eq!(f.manager.disconnect(&node).await, Ok(true));
        assert!(!f.manager.is_connected(&node));
    }

    #[tokio::test]
    async fn test_mqtt_error_propagates_unchanged() {
        let f = fixture().await;
        let bot = device("d1", ConnectionType::Wifi);

        assert_eq!(
            f.manager.connect(&bot).await,
            Err(TransportError::Mqtt(MqttError::NotConnected))
        );
        assert!(!f.manager.is_connected(&bot));
        assert!(f.broker.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_bluetooth_failure_leaves_map_untouched() {
        let f = fixture().await;
        f.manager.transports().bluetooth.scan_for_devices().await.unwrap();
        f.radio.set_connect_behavior(ConnectBehavior::Fail).await;
        let light = device("ble-light-01", ConnectionType::Bluetooth);

        assert!(matches!(
            f.manager.connect(&light).await,
            Err(TransportError::Bluetooth(BluetoothError::ConnectionFailed(_)))
        ));
        assert!(f.manager.connection_statuses().is_empty());
    }

    #[tokio::test]
    async fn test_status_stream_reports_only_own_changes() {
        let f = fixture().await;
        let mower = device("c1", ConnectionType::Cloud);
        let other = device("c2", ConnectionType::Cloud);
        let mut status = f.manager.connection_status(&mower);
        assert_eq!(status.next().await, Some(false));

        f.manager.connect(&other).await.unwrap();
        f.manager.connect(&mower).await.unwrap();
        assert_eq!(status.next().await, Some(true));

        f.manager.disconnect(&mower).await.unwrap();
        assert_eq!(status.next().await, Some(false));
    }

    #[tokio::test]
    async fn test_cloud_and_mqtt_routing() {
        let f = fixture().await;
        f.manager
            .transports()
            .mqtt
            .connect_broker("localhost", 1883, "test")
            .await
            .unwrap();

        let bot = device("d1", ConnectionType::Mqtt);
        assert_eq!(f.manager.connect(&bot).await, Ok(true));
        assert!(f.broker.subscriptions().await.contains("devices/d1/status"));

        let statuses = f.manager.connection_statuses();
        assert_eq!(statuses.get("d1"), Some(&true));
    }
}
