//! Provisioning workflow state machine
//!
//! A pure transition engine: it owns no locks and performs no I/O. Callers
//! must serialize `handle_event` (the provisioning coordinator holds it
//! behind its state mutex).

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::{
    error::ProvisioningError,
    types::{NetworkInfo, ProvisioningDevice},
};

/// Nodes of the provisioning workflow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStateType {
    Idle,
    SelectingMethod,
    BluetoothScanning,
    BluetoothConnecting,
    BluetoothProvisioning,
    WifiScanning,
    WifiConnecting,
    WifiProvisioning,
    QrCodeScanning,
    QrCodeProcessing,
    Provisioning,
    Success,
    Failed,
    Completed,
}

impl ProvisioningStateType {
    pub const ALL: [ProvisioningStateType; 14] = [
        Self::Idle,
        Self::SelectingMethod,
        Self::BluetoothScanning,
        Self::BluetoothConnecting,
        Self::BluetoothProvisioning,
        Self::WifiScanning,
        Self::WifiConnecting,
        Self::WifiProvisioning,
        Self::QrCodeScanning,
        Self::QrCodeProcessing,
        Self::Provisioning,
        Self::Success,
        Self::Failed,
        Self::Completed,
    ];

    /// States between method selection and the success/failure verdict
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::BluetoothScanning
                | Self::BluetoothConnecting
                | Self::BluetoothProvisioning
                | Self::WifiScanning
                | Self::WifiConnecting
                | Self::WifiProvisioning
                | Self::QrCodeScanning
                | Self::QrCodeProcessing
                | Self::Provisioning
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Completed
    }

    fn default_description(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::SelectingMethod => "Select a provisioning method",
            Self::BluetoothScanning => "Scanning for Bluetooth devices",
            Self::BluetoothConnecting => "Connecting to Bluetooth device",
            Self::BluetoothProvisioning => "Provisioning over Bluetooth",
            Self::WifiScanning => "Scanning for WiFi networks",
            Self::WifiConnecting => "Connecting to WiFi network",
            Self::WifiProvisioning => "Provisioning over WiFi",
            Self::QrCodeScanning => "Scan the device QR code",
            Self::QrCodeProcessing => "Processing QR code data",
            Self::Provisioning => "Provisioning in progress",
            Self::Success => "Provisioning succeeded",
            Self::Failed => "Provisioning failed",
            Self::Completed => "Provisioning completed",
        }
    }
}

/// Inputs that drive the workflow
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisioningEvent {
    StartProvisioning,
    SelectBluetoothMethod,
    SelectWifiMethod,
    SelectQrCodeMethod,
    DeviceFound(ProvisioningDevice),
    DeviceConnected,
    NetworkSelected(String),
    QrCodeScanned(String),
    ProvisioningProgress(f32),
    ProvisioningSuccess,
    ProvisioningFailed(ProvisioningError),
    Retry,
    Cancel,
    Finish,
}

/// Payload-free discriminant of [`ProvisioningEvent`]; the transition key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StartProvisioning,
    SelectBluetoothMethod,
    SelectWifiMethod,
    SelectQrCodeMethod,
    DeviceFound,
    DeviceConnected,
    NetworkSelected,
    QrCodeScanned,
    ProvisioningProgress,
    ProvisioningSuccess,
    ProvisioningFailed,
    Retry,
    Cancel,
    Finish,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        Self::StartProvisioning,
        Self::SelectBluetoothMethod,
        Self::SelectWifiMethod,
        Self::SelectQrCodeMethod,
        Self::DeviceFound,
        Self::DeviceConnected,
        Self::NetworkSelected,
        Self::QrCodeScanned,
        Self::ProvisioningProgress,
        Self::ProvisioningSuccess,
        Self::ProvisioningFailed,
        Self::Retry,
        Self::Cancel,
        Self::Finish,
    ];
}

impl ProvisioningEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StartProvisioning => EventKind::StartProvisioning,
            Self::SelectBluetoothMethod => EventKind::SelectBluetoothMethod,
            Self::SelectWifiMethod => EventKind::SelectWifiMethod,
            Self::SelectQrCodeMethod => EventKind::SelectQrCodeMethod,
            Self::DeviceFound(_) => EventKind::DeviceFound,
            Self::DeviceConnected => EventKind::DeviceConnected,
            Self::NetworkSelected(_) => EventKind::NetworkSelected,
            Self::QrCodeScanned(_) => EventKind::QrCodeScanned,
            Self::ProvisioningProgress(_) => EventKind::ProvisioningProgress,
            Self::ProvisioningSuccess => EventKind::ProvisioningSuccess,
            Self::ProvisioningFailed(_) => EventKind::ProvisioningFailed,
            Self::Retry => EventKind::Retry,
            Self::Cancel => EventKind::Cancel,
            Self::Finish => EventKind::Finish,
        }
    }
}

/// The transition table
///
/// Returns `None` when `event` has no edge out of `from`.
pub fn transition(from: ProvisioningStateType, event: EventKind) -> Option<ProvisioningStateType> {
    use EventKind as E;
    use ProvisioningStateType as S;

    match (from, event) {
        (S::Idle, E::StartProvisioning) => Some(S::SelectingMethod),

        (S::SelectingMethod, E::SelectBluetoothMethod) => Some(S::BluetoothScanning),
        (S::SelectingMethod, E::SelectWifiMethod) => Some(S::WifiScanning),
        (S::SelectingMethod, E::SelectQrCodeMethod) => Some(S::QrCodeScanning),
        (S::SelectingMethod, E::Cancel) => Some(S::Idle),

        (S::BluetoothScanning, E::DeviceFound) => Some(S::BluetoothConnecting),
        (S::BluetoothConnecting, E::DeviceConnected) => Some(S::BluetoothProvisioning),
        (S::WifiScanning, E::NetworkSelected) => Some(S::WifiConnecting),
        (S::WifiConnecting, E::DeviceConnected) => Some(S::WifiProvisioning),
        (S::QrCodeScanning, E::QrCodeScanned) => Some(S::QrCodeProcessing),

        (
            S::BluetoothProvisioning | S::WifiProvisioning | S::QrCodeProcessing | S::Provisioning,
            E::ProvisioningProgress,
        ) => Some(S::Provisioning),
        (S::Provisioning, E::ProvisioningSuccess) => Some(S::Success),

        (
            S::BluetoothConnecting
            | S::BluetoothProvisioning
            | S::WifiConnecting
            | S::WifiProvisioning
            | S::QrCodeProcessing
            | S::Provisioning,
            E::ProvisioningFailed,
        ) => Some(S::Failed),

        (state, E::Cancel) if state.is_in_progress() => Some(S::SelectingMethod),

        (S::Success, E::Finish) => Some(S::Completed),
        (S::Failed, E::Retry | E::Cancel) => Some(S::SelectingMethod),

        _ => None,
    }
}

/// Snapshot of the workflow position plus the context gathered so far
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningState {
    #[serde(rename = "type")]
    pub state_type: ProvisioningStateType,
    pub description: String,
    /// 0.0 to 1.0
    pub progress: f32,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ProvisioningError>,
    pub device: Option<ProvisioningDevice>,
    pub network: Option<NetworkInfo>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<ProvisioningError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ProvisioningState {
    pub fn new(state_type: ProvisioningStateType) -> Self {
        Self {
            state_type,
            description: state_type.default_description().to_string(),
            progress: 0.0,
            error: None,
            device: None,
            network: None,
        }
    }

    pub fn idle() -> Self {
        Self::new(ProvisioningStateType::Idle)
    }
}

/// Structural equality over type, description, progress, device id and SSID
impl PartialEq for ProvisioningState {
    fn eq(&self, other: &Self) -> bool {
        self.state_type == other.state_type
            && self.description == other.description
            && self.progress == other.progress
            && self.device.as_ref().map(|d| &d.id) == other.device.as_ref().map(|d| &d.id)
            && self.network.as_ref().map(|n| &n.ssid) == other.network.as_ref().map(|n| &n.ssid)
    }
}

/// Final verdict of a provisioning attempt
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum ProvisioningOutcome {
    Success(ProvisioningDevice),
    #[serde(serialize_with = "serialize_failure")]
    Failure(ProvisioningError),
    Cancelled,
}

fn serialize_failure<S: serde::Serializer>(
    error: &ProvisioningError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&error.to_string())
}

impl PartialEq for ProvisioningOutcome {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Success(a), Self::Success(b)) => a.id == b.id,
            (Self::Failure(a), Self::Failure(b)) => a.to_string() == b.to_string(),
            (Self::Cancelled, Self::Cancelled) => true,
            _ => false,
        }
    }
}

/// Deterministic provisioning state machine
#[derive(Debug)]
pub struct ProvisioningStateMachine {
    current: ProvisioningState,
    device: Option<ProvisioningDevice>,
    network: Option<NetworkInfo>,
}

impl Default for ProvisioningStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningStateMachine {
    pub fn new() -> Self {
        Self {
            current: ProvisioningState::idle(),
            device: None,
            network: None,
        }
    }

    pub fn current_state(&self) -> &ProvisioningState {
        &self.current
    }

    /// Apply `event`; an event with no edge from the current state is ignored
    pub fn handle_event(&mut self, event: ProvisioningEvent) -> &ProvisioningState {
        let from = self.current.state_type;
        let Some(target) = transition(from, event.kind()) else {
            warn!(state = ?from, event = ?event.kind(), "ignoring event without transition");
            return &self.current;
        };

        self.current = self.build_state(event, target);
        info!(from = ?from, to = ?target, "provisioning state transition");
        &self.current
    }

    /// Back to `Idle`, forgetting the recorded device and network
    pub fn reset(&mut self) {
        self.current = ProvisioningState::idle();
        self.device = None;
        self.network = None;
        debug!("provisioning state machine reset");
    }

    fn build_state(
        &mut self,
        event: ProvisioningEvent,
        target: ProvisioningStateType,
    ) -> ProvisioningState {
        let mut state = ProvisioningState::new(target);

        match event {
            ProvisioningEvent::DeviceFound(device) => {
                state.description = format!("Found device: {}", device.name);
                self.device = Some(device);
            }
            ProvisioningEvent::NetworkSelected(ssid) => {
                state.description = format!("Selected network: {ssid}");
                self.network = Some(NetworkInfo::named(ssid));
            }
            ProvisioningEvent::QrCodeScanned(_) => {
                state.description = "QR code data scanned".to_string();
            }
            ProvisioningEvent::ProvisioningProgress(progress) => {
                state.progress = progress.clamp(0.0, 1.0);
            }
            ProvisioningEvent::ProvisioningFailed(error) => {
                state.description = format!("Provisioning failed: {error}");
                state.error = Some(error);
            }
            _ => {}
        }

        state.device = self.device.clone();
        state.network = self.network.clone();
        state
    }
}
