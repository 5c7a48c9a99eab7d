//! Bluetooth central radio boundary

use tokio::sync::broadcast;
use trait_variant::make;

use crate::core::{
    error::{BluetoothError, BluetoothResult},
    types::DeviceKind,
};

/// Minimum ATT MTU every link starts with
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Power/authorization state of the local radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Resetting,
    Unknown,
}

impl RadioState {
    /// Map anything but `PoweredOn` to the matching availability error
    pub fn ensure_ready(self) -> BluetoothResult<()> {
        match self {
            RadioState::PoweredOn => Ok(()),
            RadioState::PoweredOff => Err(BluetoothError::PoweredOff),
            RadioState::Unauthorized => Err(BluetoothError::Unauthorized),
            RadioState::Unsupported => Err(BluetoothError::Unsupported),
            RadioState::Resetting => Err(BluetoothError::NotAvailable),
            RadioState::Unknown => Err(BluetoothError::UnknownState),
        }
    }
}

/// A peripheral seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub rssi: i16,
}

/// Asynchronous radio callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    StateChanged(RadioState),
    Discovered(Advertisement),
    Connected(String),
    FailedToConnect { device_id: String, reason: String },
    Disconnected(String),
    Notification { device_id: String, payload: Vec<u8> },
}

/// Abstraction over the platform's Bluetooth central
///
/// Connect and disconnect only start the operation; completion arrives later
/// on the event channel.
#[make(Send)]
pub trait BluetoothRadio: Send + Sync + 'static {
    /// Current radio state
    fn state(&self) -> RadioState;

    /// Subscribe to radio callbacks
    fn events(&self) -> broadcast::Receiver<RadioEvent>;

    /// Begin reporting `Discovered` events
    async fn start_scan(&self) -> BluetoothResult<()>;

    async fn stop_scan(&self);

    /// Begin connecting; completes with `Connected` or `FailedToConnect`
    async fn connect(&self, device_id: &str) -> BluetoothResult<()>;

    /// Tear down a link or pending attempt; completes with `Disconnected`
    async fn cancel_connection(&self, device_id: &str) -> BluetoothResult<()>;

    /// Write to the peripheral's command characteristic
    async fn write(&self, device_id: &str, payload: &[u8]) -> BluetoothResult<()>;

    /// Negotiate the link MTU and return the agreed value
    async fn request_mtu(&self, device_id: &str, mtu: u16) -> BluetoothResult<u16>;
}
