//! Domain types for device provisioning and control

use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Serialize};

/// Device category as reported by the control side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    VacuumCleaner,
    LawnMower,
    PoolCleaner,
    HumanoidRobot,
    AirPurifier,
    SmartLight,
    SmartSocket,
    Camera,
    Other,
}

/// How a device is reached once provisioned
///
/// Fixed at creation: it decides which transport ever handles the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Bluetooth,
    Wifi,
    Mqtt,
    Matter,
    Cloud,
}

/// Last known operating status of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Idle,
    Working,
    Charging,
    Error,
    Offline,
    Updating,
}

impl std::str::FromStr for DeviceStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase()))
            .map_err(|_| ())
    }
}

/// A controllable device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub is_connected: bool,
    connection_type: ConnectionType,
    #[serde(default)]
    pub status: DeviceStatus,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: DeviceKind,
        connection_type: ConnectionType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            rssi: None,
            ip_address: None,
            is_connected: false,
            connection_type,
            status: DeviceStatus::Unknown,
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    /// Transport routing key; there is deliberately no setter
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }
}

/// Device category as seen during provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningDeviceKind {
    VacuumCleaner,
    AirPurifier,
    SmartLight,
    SmartSocket,
    Camera,
    Other,
}

impl From<DeviceKind> for ProvisioningDeviceKind {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::VacuumCleaner => Self::VacuumCleaner,
            DeviceKind::AirPurifier => Self::AirPurifier,
            DeviceKind::SmartLight => Self::SmartLight,
            DeviceKind::SmartSocket => Self::SmartSocket,
            DeviceKind::Camera => Self::Camera,
            DeviceKind::LawnMower
            | DeviceKind::PoolCleaner
            | DeviceKind::HumanoidRobot
            | DeviceKind::Other => Self::Other,
        }
    }
}

/// Onboarding method
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningMethod {
    Bluetooth,
    Wifi,
    QrCode,
}

/// A device that is being (or has been) onboarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningDevice {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProvisioningDeviceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub is_provisioned: bool,
    pub supported_methods: BTreeSet<ProvisioningMethod>,
}

impl ProvisioningDevice {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: ProvisioningDeviceKind,
        supported_methods: impl IntoIterator<Item = ProvisioningMethod>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            rssi: None,
            ip_address: None,
            is_provisioned: false,
            supported_methods: supported_methods.into_iter().collect(),
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Copy of this device marked as onboarded
    pub fn provisioned(&self, name: Option<&str>, ip_address: Option<String>) -> Self {
        Self {
            name: name.map(str::to_string).unwrap_or_else(|| self.name.clone()),
            ip_address: ip_address.or_else(|| self.ip_address.clone()),
            is_provisioned: true,
            ..self.clone()
        }
    }

    pub fn supports(&self, method: ProvisioningMethod) -> bool {
        self.supported_methods.contains(&method)
    }
}

/// WiFi security mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkSecurity {
    None,
    Wpa,
    Wpa2,
    Wpa3,
    Unknown,
}

/// A WiFi network found by a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ssid: String,
    pub security: NetworkSecurity,
    /// Signal bars, 1 (weak) to 5 (strong); 0 when not measured
    pub signal_strength: u8,
}

impl NetworkInfo {
    pub fn new(ssid: impl Into<String>, security: NetworkSecurity, signal_strength: u8) -> Self {
        Self {
            ssid: ssid.into(),
            security,
            signal_strength: signal_strength.min(5),
        }
    }

    /// Network known only by name, e.g. from a `networkSelected` event
    pub fn named(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            security: NetworkSecurity::Unknown,
            signal_strength: 0,
        }
    }
}

pub const DEFAULT_PROVISIONING_TIMEOUT: Duration = Duration::from_secs(60);
pub const WIFI_PROVISIONING_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-attempt provisioning parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    /// Accepted from clients, never echoed back
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_encrypted")]
    pub encrypted: bool,
}

fn default_timeout() -> Duration {
    DEFAULT_PROVISIONING_TIMEOUT
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_encrypted() -> bool {
    true
}

impl Default for ProvisioningConfiguration {
    fn default() -> Self {
        Self {
            ssid: None,
            password: None,
            device_name: None,
            timeout: DEFAULT_PROVISIONING_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            encrypted: true,
        }
    }
}

impl ProvisioningConfiguration {
    pub fn bluetooth(device_name: Option<String>) -> Self {
        Self {
            device_name,
            ..Self::default()
        }
    }

    pub fn wifi(ssid: String, password: String, device_name: Option<String>) -> Self {
        Self {
            ssid: Some(ssid),
            password: Some(password),
            device_name,
            timeout: WIFI_PROVISIONING_TIMEOUT,
            ..Self::default()
        }
    }

    pub fn qr_code(device_name: Option<String>) -> Self {
        Self {
            device_name,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Session identifier for socket clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
