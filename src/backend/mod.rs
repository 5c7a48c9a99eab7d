//! External-service boundaries
//!
//! Radio, broker, fabric and WiFi interface are reached only through these
//! traits. [`Backends`] bundles one implementation of each so services take
//! a single type parameter.

pub mod bluetooth_radio;
pub mod matter_fabric;
pub mod mqtt_broker;
pub mod simulated;
pub mod wifi_backend;

pub use bluetooth_radio::{Advertisement, BluetoothRadio, RadioEvent, RadioState};
pub use matter_fabric::{MatterFabric, PropertyReport};
pub use mqtt_broker::{MqttBroker, MqttMessage};
pub use simulated::{Simulated, SimulatedBroker, SimulatedFabric, SimulatedRadio, SimulatedWifi};
pub use wifi_backend::WifiBackend;

/// One concrete choice of every external service
pub trait Backends: Send + Sync + 'static {
    type Radio: BluetoothRadio;
    type Broker: MqttBroker;
    type Fabric: MatterFabric;
    type Wifi: WifiBackend;
}
