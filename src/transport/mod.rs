//! Device transports
//!
//! One service per protocol. All of them implement [`ControlTransport`], the
//! uniform capability set the connection manager and dispatcher route to.

pub mod bluetooth;
pub mod cloud;
pub mod matter;
pub mod mqtt;

use std::{future::Future, sync::Arc, time::Duration};

use futures::stream::BoxStream;
use trait_variant::make;

pub use {
    bluetooth::{BluetoothTimeouts, BluetoothTransport},
    cloud::{CloudTimeouts, CloudTransport},
    matter::{MatterTimeouts, MatterTransport},
    mqtt::{MqttTimeouts, MqttTransport},
};

use crate::{
    backend::Backends,
    core::{
        command::{CommandResponse, ControlCommand},
        error::TransportError,
        types::{ConnectionType, Device},
    },
};

/// Capabilities shared by every device transport
#[make(Send)]
pub trait ControlTransport: Send + Sync + 'static {
    type Error: Into<TransportError> + Send;

    /// Whether the underlying radio or service is ready for use
    fn is_service_available(&self) -> bool;

    /// Time-boxed discovery of reachable devices
    async fn scan_for_devices(&self) -> Result<Vec<Device>, Self::Error>;

    async fn connect(&self, device: &Device) -> Result<bool, Self::Error>;

    async fn disconnect(&self, device: &Device) -> Result<bool, Self::Error>;

    async fn send_command(
        &self,
        command: &ControlCommand,
        device: &Device,
    ) -> Result<bool, Self::Error>;

    /// Responses devices send back over this transport, from now on
    fn command_responses(&self) -> BoxStream<'static, CommandResponse>;
}

/// Timeouts and simulated latency for every transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportSettings {
    pub bluetooth: BluetoothTimeouts,
    pub mqtt: MqttTimeouts,
    pub matter: MatterTimeouts,
    pub cloud: CloudTimeouts,
    pub cloud_latency: Duration,
}

/// The transport set of one backend choice
pub struct Transports<B: Backends> {
    pub bluetooth: Arc<BluetoothTransport<B::Radio>>,
    pub mqtt: Arc<MqttTransport<B::Broker>>,
    pub matter: Arc<MatterTransport<B::Fabric>>,
    pub cloud: Arc<CloudTransport>,
}

impl<B: Backends> Clone for Transports<B> {
    fn clone(&self) -> Self {
        Self {
            bluetooth: self.bluetooth.clone(),
            mqtt: self.mqtt.clone(),
            matter: self.matter.clone(),
            cloud: self.cloud.clone(),
        }
    }
}

impl<B: Backends> Transports<B> {
    pub fn new(
        radio: Arc<B::Radio>,
        broker: Arc<B::Broker>,
        fabric: Arc<B::Fabric>,
        settings: TransportSettings,
    ) -> Self {
        Self {
            bluetooth: BluetoothTransport::new(radio, settings.bluetooth),
            mqtt: Arc::new(MqttTransport::new(broker, settings.mqtt)),
            matter: Arc::new(MatterTransport::new(fabric, settings.matter)),
            cloud: CloudTransport::new(settings.cloud_latency, settings.cloud),
        }
    }

    /// Response stream of the transport that serves `connection_type`
    pub fn command_responses(
        &self,
        connection_type: ConnectionType,
    ) -> BoxStream<'static, CommandResponse> {
        match connection_type {
            ConnectionType::Bluetooth => self.bluetooth.command_responses(),
            ConnectionType::Wifi | ConnectionType::Mqtt => self.mqtt.command_responses(),
            ConnectionType::Matter => self.matter.command_responses(),
            ConnectionType::Cloud => self.cloud.command_responses(),
        }
    }

    pub fn is_service_available(&self, connection_type: ConnectionType) -> bool {
        match connection_type {
            ConnectionType::Bluetooth => self.bluetooth.is_service_available(),
            ConnectionType::Wifi | ConnectionType::Mqtt => self.mqtt.is_service_available(),
            ConnectionType::Matter => self.matter.is_service_available(),
            ConnectionType::Cloud => self.cloud.is_service_available(),
        }
    }

    /// Stop the Bluetooth scan and fail its pending link operations
    ///
    /// MQTT, Matter and cloud operations are each bounded by their own
    /// timeout and hold nothing that needs resolving.
    pub async fn cancel_all(&self) {
        self.bluetooth.cancel().await;
    }
}

/// Run `operation`, failing with `on_timeout` once `limit` elapses
pub(crate) async fn bounded<T, E>(
    limit: Duration,
    on_timeout: E,
    operation: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    tokio::time::timeout(limit, operation)
        .await
        .unwrap_or_else(|_| Err(on_timeout))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::backend::{Simulated, SimulatedBroker, SimulatedFabric, SimulatedRadio, SimulatedWifi};

    /// Simulated backends plus the transports built on them
    pub(crate) struct Rig {
        pub radio: SimulatedRadio,
        pub broker: SimulatedBroker,
        pub fabric: SimulatedFabric,
        pub wifi: SimulatedWifi,
        pub transports: Transports<Simulated>,
    }

    /// Demo peripherals and nodes, zero latency, short scan window
    pub(crate) async fn rig() -> Rig {
        let radio = SimulatedRadio::with_demo_peripherals();
        radio.set_latency(Duration::ZERO).await;
        let broker = SimulatedBroker::new();
        let fabric = SimulatedFabric::with_demo_nodes();
        fabric.set_latency(Duration::ZERO).await;
        let wifi = SimulatedWifi::new();

        let settings = TransportSettings {
            bluetooth: BluetoothTimeouts {
                scan_window: Duration::from_millis(50),
                connect: Duration::from_millis(500),
                disconnect: Duration::from_millis(500),
                command: Duration::from_millis(500),
            },
            ..TransportSettings::default()
        };
        let transports = Transports::new(
            Arc::new(radio.clone()),
            Arc::new(broker.clone()),
            Arc::new(fabric.clone()),
            settings,
        );

        Rig {
            radio,
            broker,
            fabric,
            wifi,
            transports,
        }
    }
}
