//! Error types for device provisioning and control

use thiserror::Error;

use crate::core::types::ConnectionType;

/// Result type for Bluetooth transport operations
pub type BluetoothResult<T> = Result<T, BluetoothError>;

/// Result type for MQTT transport operations
pub type MqttResult<T> = Result<T, MqttError>;

/// Result type for Matter transport operations
pub type MatterResult<T> = Result<T, MatterError>;

/// Result type for cloud operations
pub type CloudResult<T> = Result<T, CloudError>;

/// Result type for WiFi backend operations
pub type WifiResult<T> = Result<T, WifiError>;

/// Result type for routed transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for command dispatch
pub type CommandResult<T> = Result<T, CommandError>;

/// Result type for provisioning orchestration
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// Result type for the device controller
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors raised by the Bluetooth transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BluetoothError {
    #[error("Bluetooth not available")]
    NotAvailable,

    #[error("Bluetooth is powered off")]
    PoweredOff,

    #[error("Bluetooth access not authorized")]
    Unauthorized,

    #[error("Bluetooth not supported on this host")]
    Unsupported,

    #[error("Bluetooth radio in unknown state")]
    UnknownState,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error("Disconnection timed out")]
    DisconnectionTimeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Command send failed: {0}")]
    CommandSendFailed(String),

    #[error("Command write timed out")]
    CommandTimeout,

    #[error("MTU request failed: {0}")]
    MtuRequestFailed(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Errors raised by the MQTT transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MqttError {
    #[error("MQTT not connected")]
    NotConnected,

    #[error("MQTT connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("MQTT operation timed out")]
    Timeout,
}

/// Errors raised by the Matter transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatterError {
    #[error("Matter not available")]
    NotAvailable,

    #[error("Device not paired")]
    DeviceNotPaired,

    #[error("Pairing failed: {0}")]
    PairingFailed(String),

    #[error("Unpairing failed: {0}")]
    UnpairingFailed(String),

    #[error("Command send failed: {0}")]
    CommandSendFailed(String),

    #[error("Matter operation timed out")]
    Timeout,
}

/// Errors raised by the cloud path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("Cloud request failed: {0}")]
    RequestFailed(String),

    #[error("Cloud request timed out")]
    Timeout,
}

/// Errors related to WiFi backend operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WifiError {
    #[error("WiFi scan failed: {0}")]
    ScanFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid SSID: {0}")]
    InvalidSsid(String),

    #[error("Credential delivery failed: {0}")]
    CredentialDeliveryFailed(String),

    #[error("WiFi operation timed out")]
    Timeout,
}

/// Errors raised while decoding QR code payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QrCodeError {
    #[error("Invalid QR code format")]
    InvalidFormat,

    #[error("QR code parsing failed: {0}")]
    ParsingFailed(String),
}

/// Any transport failure, with the originating kind preserved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error(transparent)]
    Bluetooth(#[from] BluetoothError),

    #[error(transparent)]
    Mqtt(#[from] MqttError),

    #[error(transparent)]
    Matter(#[from] MatterError),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl TransportError {
    /// Whether retrying the same operation later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Bluetooth(
                BluetoothError::ConnectionTimeout
                    | BluetoothError::DisconnectionTimeout
                    | BluetoothError::ConnectionFailed(_)
                    | BluetoothError::CommandSendFailed(_)
                    | BluetoothError::CommandTimeout
            ) | TransportError::Mqtt(
                MqttError::Timeout | MqttError::PublishFailed(_) | MqttError::ConnectionFailed(_)
            ) | TransportError::Matter(MatterError::Timeout | MatterError::CommandSendFailed(_))
                | TransportError::Cloud(_)
        )
    }
}

/// Errors raised by command dispatch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Device not connected")]
    DeviceNotConnected,

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device response timed out")]
    ResponseTimeout,

    #[error("Command batch timed out")]
    BatchTimeout,

    #[error("Command cancelled")]
    Cancelled,

    #[error("Device did not accept the command")]
    Rejected,

    #[error("Command encoding failed: {0}")]
    Encoding(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A sequential batch stopped at the first failing command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Command {failed_index} of batch failed: {source}")]
pub struct BatchError {
    /// Results of the commands that completed before the failure
    pub completed: Vec<bool>,
    pub failed_index: usize,
    pub source: CommandError,
}

/// Errors surfaced by the provisioning coordinator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("No provisioning method selected")]
    NoMethodSelected,

    #[error("No device selected")]
    NoDeviceSelected,

    #[error("Missing WiFi credentials")]
    MissingWifiCredentials,

    #[error("Device connection failed")]
    ConnectionFailed,

    #[error("Retry limit of {0} reached")]
    RetryLimitExceeded(u32),

    #[error("Provisioning timed out")]
    Timeout,

    #[error("Provisioning cancelled")]
    Cancelled,

    #[error("Provisioning failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Bluetooth(#[from] BluetoothError),

    #[error(transparent)]
    Wifi(#[from] WifiError),

    #[error(transparent)]
    QrCode(#[from] QrCodeError),
}

/// Errors raised by the device directory
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Device {device_id} is already registered with connection type {existing:?}")]
    ConnectionTypeChanged {
        device_id: String,
        existing: ConnectionType,
    },
}

/// Errors surfaced by the device controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("No device selected")]
    NoDeviceSelected,

    #[error("Device did not accept the command")]
    CommandRejected,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_transparent() {
        let err = TransportError::from(MqttError::NotConnected);
        assert_eq!(err.to_string(), "MQTT not connected");
        assert!(matches!(err, TransportError::Mqtt(MqttError::NotConnected)));
    }

    #[test]
    fn test_command_error_keeps_transport_kind() {
        let err = CommandError::from(TransportError::from(MatterError::DeviceNotPaired));
        assert!(matches!(
            err,
            CommandError::Transport(TransportError::Matter(MatterError::DeviceNotPaired))
        ));
        assert_eq!(err.to_string(), "Device not paired");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::from(BluetoothError::ConnectionTimeout).is_retryable());
        assert!(!TransportError::from(BluetoothError::PoweredOff).is_retryable());
        assert!(!TransportError::from(MqttError::NotConnected).is_retryable());
        assert!(!TransportError::from(MatterError::DeviceNotPaired).is_retryable());
    }

    #[test]
    fn test_batch_error_message() {
        let err = BatchError {
            completed: vec![true],
            failed_index: 1,
            source: CommandError::DeviceNotConnected,
        };
        assert_eq!(err.to_string(), "Command 1 of batch failed: Device not connected");
    }
}
