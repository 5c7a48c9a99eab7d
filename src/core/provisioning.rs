//! Provisioning orchestration
//!
//! Drives the state machine and the per-method provisioners for one onboarding
//! session at a time. Every outcome, including failures, lands in the published
//! [`ProvisioningView`]; errors are also returned to the caller.

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::{
    backend::Backends,
    core::{
        error::{ProvisioningError, ProvisioningResult},
        state_machine::{
            ProvisioningEvent, ProvisioningOutcome, ProvisioningState, ProvisioningStateMachine,
            ProvisioningStateType,
        },
        types::{NetworkInfo, ProvisioningConfiguration, ProvisioningDevice, ProvisioningMethod},
    },
    provisioner::{BluetoothProvisioner, Provisioner, QrCodeProvisioner, WifiProvisioner},
    util::watch_stream,
};

/// Everything a client observes about the provisioning session
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningView {
    pub state: ProvisioningState,
    pub selected_method: Option<ProvisioningMethod>,
    pub discovered_devices: Vec<ProvisioningDevice>,
    pub discovered_networks: Vec<NetworkInfo>,
    pub selected_network: Option<NetworkInfo>,
    pub configuration: ProvisioningConfiguration,
    pub current_device: Option<ProvisioningDevice>,
    pub outcome: Option<ProvisioningOutcome>,
    pub retry_count: u32,
    pub is_loading: bool,
    pub error_message: Option<String>,
}

impl ProvisioningView {
    pub(crate) fn new(configuration: ProvisioningConfiguration) -> Self {
        Self {
            state: ProvisioningState::idle(),
            selected_method: None,
            discovered_devices: Vec::new(),
            discovered_networks: Vec::new(),
            selected_network: None,
            configuration,
            current_device: None,
            outcome: None,
            retry_count: 0,
            is_loading: false,
            error_message: None,
        }
    }
}

pub struct ProvisioningCoordinator<B: Backends> {
    machine: Mutex<ProvisioningStateMachine>,
    view: watch::Sender<ProvisioningView>,
    bluetooth: Arc<BluetoothProvisioner<B::Radio>>,
    wifi: Arc<WifiProvisioner<B::Wifi>>,
    qr_code: Arc<QrCodeProvisioner>,
    default_configuration: ProvisioningConfiguration,
}

impl<B: Backends> ProvisioningCoordinator<B> {
    pub fn new(
        bluetooth: Arc<BluetoothProvisioner<B::Radio>>,
        wifi: Arc<WifiProvisioner<B::Wifi>>,
        qr_code: Arc<QrCodeProvisioner>,
        default_configuration: ProvisioningConfiguration,
    ) -> Self {
        let (view, _) = watch::channel(ProvisioningView::new(default_configuration.clone()));
        Self {
            machine: Mutex::new(ProvisioningStateMachine::new()),
            view,
            bluetooth,
            wifi,
            qr_code,
            default_configuration,
        }
    }

    pub fn snapshot(&self) -> ProvisioningView {
        self.view.borrow().clone()
    }

    /// The current view, then every change
    pub fn subscribe(&self) -> BoxStream<'static, ProvisioningView> {
        watch_stream(self.view.subscribe()).boxed()
    }

    pub fn current_state(&self) -> ProvisioningState {
        self.view.borrow().state.clone()
    }

    /// Feed one event through the state machine and publish the result
    async fn fire(&self, event: ProvisioningEvent) -> ProvisioningState {
        let mut machine = self.machine.lock().await;
        let state = machine.handle_event(event).clone();
        self.view.send_modify(|view| view.state = state.clone());
        state
    }

    fn begin(&self) {
        self.view.send_modify(|view| {
            view.is_loading = true;
            view.error_message = None;
        });
    }

    /// Clear the loading flag and surface a failure
    fn settle<T>(&self, result: ProvisioningResult<T>) -> ProvisioningResult<T> {
        self.view.send_modify(|view| {
            view.is_loading = false;
            if let Err(e) = &result {
                view.error_message = Some(e.to_string());
            }
        });
        if let Err(e) = &result {
            warn!(error = %e, "provisioning operation failed");
        }
        result
    }

    fn clear_error(&self) {
        self.view.send_modify(|view| view.error_message = None);
    }

    pub async fn start_provisioning(&self) -> ProvisioningState {
        info!("provisioning started");
        self.fire(ProvisioningEvent::StartProvisioning).await
    }

    pub async fn select_bluetooth_method(&self) -> ProvisioningResult<Vec<ProvisioningDevice>> {
        self.view
            .send_modify(|view| view.selected_method = Some(ProvisioningMethod::Bluetooth));
        self.fire(ProvisioningEvent::SelectBluetoothMethod).await;
        self.scan_for_bluetooth_devices().await
    }

    pub async fn select_wifi_method(&self) -> ProvisioningResult<Vec<NetworkInfo>> {
        self.view
            .send_modify(|view| view.selected_method = Some(ProvisioningMethod::Wifi));
        self.fire(ProvisioningEvent::SelectWifiMethod).await;
        self.scan_for_wifi_networks().await
    }

    pub async fn select_qr_code_method(&self) -> ProvisioningState {
        self.view
            .send_modify(|view| view.selected_method = Some(ProvisioningMethod::QrCode));
        self.fire(ProvisioningEvent::SelectQrCodeMethod).await
    }

    pub async fn scan_for_bluetooth_devices(&self) -> ProvisioningResult<Vec<ProvisioningDevice>> {
        self.begin();
        let result = self.bluetooth.scan_for_devices().await;
        if let Ok(devices) = &result {
            debug!(count = devices.len(), "bluetooth devices discovered");
            self.view
                .send_modify(|view| view.discovered_devices = devices.clone());
        }
        self.settle(result)
    }

    pub async fn scan_for_wifi_networks(&self) -> ProvisioningResult<Vec<NetworkInfo>> {
        self.begin();
        let result = self.wifi.scan_for_networks().await;
        if let Ok(networks) = &result {
            debug!(count = networks.len(), "wifi networks discovered");
            self.view
                .send_modify(|view| view.discovered_networks = networks.clone());
        }
        self.settle(result)
    }

    /// Record `device` as the onboarding target
    ///
    /// The device is kept even when the current state has no use for a
    /// `deviceFound` event.
    pub async fn select_device(&self, device: ProvisioningDevice) -> ProvisioningState {
        debug!(device_id = %device.id, "device selected");
        self.view
            .send_modify(|view| view.current_device = Some(device.clone()));
        self.fire(ProvisioningEvent::DeviceFound(device)).await
    }

    pub async fn select_network(&self, network: NetworkInfo) -> ProvisioningState {
        debug!(ssid = %network.ssid, "network selected");
        let ssid = network.ssid.clone();
        self.view
            .send_modify(|view| view.selected_network = Some(network));
        self.fire(ProvisioningEvent::NetworkSelected(ssid)).await
    }

    pub async fn process_qr_code_data(&self, data: &str) -> ProvisioningResult<ProvisioningState> {
        self.begin();
        let result = match self.qr_code.process_qr_code_data(data) {
            Ok(configuration) => {
                self.view
                    .send_modify(|view| view.configuration = configuration);
                Ok(self
                    .fire(ProvisioningEvent::QrCodeScanned(data.to_string()))
                    .await)
            }
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    pub async fn connect_to_device(&self) -> ProvisioningResult<ProvisioningState> {
        let view = self.snapshot();
        let Some(device) = view.current_device else {
            return self.settle(Err(ProvisioningError::NoDeviceSelected));
        };
        let Some(method) = view.selected_method else {
            return self.settle(Err(ProvisioningError::NoMethodSelected));
        };

        self.begin();
        let connected = match method {
            ProvisioningMethod::Bluetooth => self.bluetooth.connect(&device).await,
            ProvisioningMethod::Wifi => {
                let ssid = view
                    .configuration
                    .ssid
                    .clone()
                    .or_else(|| view.selected_network.as_ref().map(|n| n.ssid.clone()));
                match (ssid, view.configuration.password.as_deref()) {
                    (Some(ssid), Some(password)) => {
                        let network = view
                            .discovered_networks
                            .iter()
                            .find(|n| n.ssid == ssid)
                            .cloned()
                            .unwrap_or_else(|| NetworkInfo::named(ssid));
                        self.wifi.connect(&network, password).await
                    }
                    _ => Err(ProvisioningError::MissingWifiCredentials),
                }
            }
            // Credentials travel in the code itself
            ProvisioningMethod::QrCode => Ok(true),
        };

        let result = match connected {
            Ok(true) => {
                info!(device_id = %device.id, ?method, "device connected");
                Ok(self.fire(ProvisioningEvent::DeviceConnected).await)
            }
            Ok(false) => Err(ProvisioningError::ConnectionFailed),
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    pub async fn provision_device(&self) -> ProvisioningResult<ProvisioningDevice> {
        let view = self.snapshot();
        let Some(device) = view.current_device else {
            return self.settle(Err(ProvisioningError::NoDeviceSelected));
        };
        let Some(method) = view.selected_method else {
            return self.settle(Err(ProvisioningError::NoMethodSelected));
        };
        let configuration = view.configuration;

        self.begin();
        self.fire(ProvisioningEvent::ProvisioningProgress(0.0)).await;

        let result = match method {
            ProvisioningMethod::Bluetooth => {
                self.bluetooth
                    .start_provisioning(&device, &configuration)
                    .await
            }
            ProvisioningMethod::Wifi => self.wifi.start_provisioning(&device, &configuration).await,
            ProvisioningMethod::QrCode => {
                self.qr_code
                    .start_provisioning(&device, &configuration)
                    .await
            }
        };

        match &result {
            Ok(provisioned) => {
                info!(device_id = %provisioned.id, name = %provisioned.name, "device provisioned");
                self.view.send_modify(|view| {
                    view.current_device = Some(provisioned.clone());
                    view.outcome = Some(ProvisioningOutcome::Success(provisioned.clone()));
                });
                self.fire(ProvisioningEvent::ProvisioningProgress(1.0)).await;
                self.fire(ProvisioningEvent::ProvisioningSuccess).await;
            }
            Err(ProvisioningError::Cancelled) => {
                self.view
                    .send_modify(|view| view.outcome = Some(ProvisioningOutcome::Cancelled));
            }
            Err(e) => {
                self.view
                    .send_modify(|view| view.outcome = Some(ProvisioningOutcome::Failure(e.clone())));
                self.fire(ProvisioningEvent::ProvisioningFailed(e.clone()))
                    .await;
            }
        }
        self.settle(result)
    }

    /// Back to method selection after a failure, within the retry limit
    pub async fn retry_provisioning(&self) -> ProvisioningResult<ProvisioningState> {
        self.clear_error();
        let view = self.snapshot();
        let limit = view.configuration.max_retries;

        if view.state.state_type == ProvisioningStateType::Failed && view.retry_count >= limit {
            return self.settle(Err(ProvisioningError::RetryLimitExceeded(limit)));
        }

        let state = self.fire(ProvisioningEvent::Retry).await;
        if view.state.state_type == ProvisioningStateType::Failed
            && state.state_type == ProvisioningStateType::SelectingMethod
        {
            self.view.send_modify(|view| view.retry_count += 1);
            info!(attempt = view.retry_count + 1, limit, "provisioning retry");
        }
        Ok(state)
    }

    /// Abort the current step and stop every provisioner
    pub async fn cancel_provisioning(&self) -> ProvisioningState {
        self.clear_error();
        let before = self.current_state().state_type;
        let state = self.fire(ProvisioningEvent::Cancel).await;

        self.bluetooth.cancel_provisioning().await;
        self.wifi.cancel_provisioning().await;
        self.qr_code.cancel_provisioning().await;

        if before.is_in_progress() {
            self.view.send_modify(|view| {
                view.outcome = Some(ProvisioningOutcome::Cancelled);
                view.is_loading = false;
            });
        }
        info!(from = ?before, "provisioning cancelled");
        state
    }

    pub async fn finish_provisioning(&self) -> ProvisioningState {
        self.fire(ProvisioningEvent::Finish).await
    }

    pub fn update_configuration(&self, configuration: ProvisioningConfiguration) {
        debug!(timeout = ?configuration.timeout, max_retries = configuration.max_retries, "configuration updated");
        self.view
            .send_modify(|view| view.configuration = configuration);
    }

    /// Abandon the session and start from scratch
    pub async fn reset(&self) {
        let mut machine = self.machine.lock().await;
        machine.reset();
        self.view
            .send_replace(ProvisioningView::new(self.default_configuration.clone()));
        debug!("provisioning session reset");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        backend::{Advertisement, Simulated, simulated::ConnectBehavior},
        core::types::{DeviceKind, ProvisioningDeviceKind},
        provisioner::WifiTimeouts,
        transport::testing::{Rig, rig},
    };
    use pretty_assertions::assert_eq;

    async fn coordinator() -> (Rig, Arc<ProvisioningCoordinator<Simulated>>) {
        let rig = rig().await;
        rig.radio
            .set_advertisements(vec![Advertisement {
                id: "p1".into(),
                name: "Bot".into(),
                kind: DeviceKind::VacuumCleaner,
                rssi: -40,
            }])
            .await;

        let coordinator = ProvisioningCoordinator::new(
            Arc::new(BluetoothProvisioner::new(rig.transports.bluetooth.clone())),
            Arc::new(WifiProvisioner::new(
                Arc::new(rig.wifi.clone()),
                WifiTimeouts::default(),
            )),
            Arc::new(QrCodeProvisioner::new(Duration::ZERO)),
            ProvisioningConfiguration::default(),
        );
        (rig, Arc::new(coordinator))
    }

    fn p1() -> ProvisioningDevice {
        ProvisioningDevice::new(
            "p1",
            "Bot",
            ProvisioningDeviceKind::VacuumCleaner,
            [ProvisioningMethod::Bluetooth],
        )
    }

    #[tokio::test]
    async fn test_bluetooth_provisioning_end_to_end() {
        let (_rig, coordinator) = coordinator().await;

        coordinator.start_provisioning().await;
        let found = coordinator.select_bluetooth_method().await.unwrap();
        assert_eq!(coordinator.current_state().state_type, ProvisioningStateType::BluetoothScanning);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "p1");

        let state = coordinator.select_device(p1()).await;
        assert_eq!(state.state_type, ProvisioningStateType::BluetoothConnecting);
        assert_eq!(state.device.as_ref().map(|d| d.id.as_str()), Some("p1"));

        let state = coordinator.connect_to_device().await.unwrap();
        assert_eq!(state.state_type, ProvisioningStateType::BluetoothProvisioning);

        let provisioned = coordinator.provision_device().await.unwrap();
        assert!(provisioned.is_provisioned);
        assert_eq!(coordinator.current_state().state_type, ProvisioningStateType::Success);

        let state = coordinator.finish_provisioning().await;
        assert_eq!(state.state_type, ProvisioningStateType::Completed);

        let view = coordinator.snapshot();
        let mut expected = p1();
        expected.is_provisioned = true;
        assert_eq!(view.outcome, Some(ProvisioningOutcome::Success(expected)));
        assert_eq!(view.current_device.map(|d| d.is_provisioned), Some(true));
        assert!(!view.is_loading);
        assert_eq!(view.error_message, None);
    }

    #[tokio::test]
    async fn test_connect_requires_device_and_method() {
        let (_rig, coordinator) = coordinator().await;
        assert_eq!(
            coordinator.connect_to_device().await,
            Err(ProvisioningError::NoDeviceSelected)
        );
        assert_eq!(
            coordinator.snapshot().error_message.as_deref(),
            Some("No device selected")
        );

        coordinator.select_device(p1()).await;
        assert_eq!(
            coordinator.connect_to_device().await,
            Err(ProvisioningError::NoMethodSelected)
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_surfaced() {
        let (rig, coordinator) = coordinator().await;
        rig.radio.set_connect_behavior(ConnectBehavior::Fail).await;

        coordinator.start_provisioning().await;
        coordinator.select_bluetooth_method().await.unwrap();
        coordinator.select_device(p1()).await;

        assert!(matches!(
            coordinator.connect_to_device().await,
            Err(ProvisioningError::Bluetooth(_))
        ));
        let view = coordinator.snapshot();
        assert!(!view.is_loading);
        assert!(view.error_message.is_some());
        assert_eq!(view.state.state_type, ProvisioningStateType::BluetoothConnecting);
    }

    #[tokio::test]
    async fn test_wifi_flow_with_failure_and_retry_limit() {
        let (rig, coordinator) = coordinator().await;
        coordinator.update_configuration(ProvisioningConfiguration {
            max_retries: 1,
            ..ProvisioningConfiguration::wifi("HomeWiFi".into(), "secret".into(), None)
        });

        coordinator.start_provisioning().await;
        let networks = coordinator.select_wifi_method().await.unwrap();
        assert_eq!(networks.len(), 3);
        coordinator.select_network(networks[0].clone()).await;
        coordinator.select_device(p1()).await;
        let state = coordinator.connect_to_device().await.unwrap();
        assert_eq!(state.state_type, ProvisioningStateType::WifiProvisioning);

        rig.wifi.set_delivery_failure(true).await;
        assert!(coordinator.provision_device().await.is_err());
        let view = coordinator.snapshot();
        assert_eq!(view.state.state_type, ProvisioningStateType::Failed);
        assert!(matches!(view.outcome, Some(ProvisioningOutcome::Failure(_))));

        let state = coordinator.retry_provisioning().await.unwrap();
        assert_eq!(state.state_type, ProvisioningStateType::SelectingMethod);

        coordinator.select_wifi_method().await.unwrap();
        coordinator.select_network(networks[0].clone()).await;
        coordinator.connect_to_device().await.unwrap();
        assert!(coordinator.provision_device().await.is_err());

        assert_eq!(
            coordinator.retry_provisioning().await,
            Err(ProvisioningError::RetryLimitExceeded(1))
        );
        assert_eq!(coordinator.current_state().state_type, ProvisioningStateType::Failed);
    }

    #[tokio::test]
    async fn test_wifi_connect_needs_password() {
        let (_rig, coordinator) = coordinator().await;
        coordinator.start_provisioning().await;
        coordinator.select_wifi_method().await.unwrap();
        coordinator.select_network(NetworkInfo::named("HomeWiFi")).await;
        coordinator.select_device(p1()).await;

        assert_eq!(
            coordinator.connect_to_device().await,
            Err(ProvisioningError::MissingWifiCredentials)
        );
    }

    #[tokio::test]
    async fn test_qr_code_flow() {
        let (_rig, coordinator) = coordinator().await;
        coordinator.start_provisioning().await;
        coordinator.select_qr_code_method().await;

        assert!(coordinator.process_qr_code_data("broken").await.is_err());
        assert_eq!(coordinator.current_state().state_type, ProvisioningStateType::QrCodeScanning);

        let state = coordinator
            .process_qr_code_data("HomeWiFi,secret,Hall Bot")
            .await
            .unwrap();
        assert_eq!(state.state_type, ProvisioningStateType::QrCodeProcessing);
        assert_eq!(coordinator.snapshot().error_message, None);

        coordinator.select_device(p1()).await;
        let provisioned = coordinator.provision_device().await.unwrap();
        assert_eq!(provisioned.name, "Hall Bot");
        assert_eq!(coordinator.current_state().state_type, ProvisioningStateType::Success);
    }

    #[tokio::test]
    async fn test_cancel_during_provisioning() {
        let (rig, coordinator) = coordinator().await;
        coordinator.start_provisioning().await;
        coordinator.select_bluetooth_method().await.unwrap();
        coordinator.select_device(p1()).await;
        coordinator.connect_to_device().await.unwrap();
        rig.transports
            .bluetooth
            .disconnect_peripheral("p1")
            .await
            .unwrap();
        rig.radio.set_connect_behavior(ConnectBehavior::Ignore).await;

        let running = coordinator.clone();
        let task = tokio::spawn(async move { running.provision_device().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = coordinator.cancel_provisioning().await;
        assert_eq!(state.state_type, ProvisioningStateType::SelectingMethod);
        assert_eq!(task.await.unwrap(), Err(ProvisioningError::Cancelled));
        assert_eq!(coordinator.snapshot().outcome, Some(ProvisioningOutcome::Cancelled));
        assert_eq!(coordinator.current_state().state_type, ProvisioningStateType::SelectingMethod);
    }

    #[tokio::test]
    async fn test_reset_clears_session() {
        let (_rig, coordinator) = coordinator().await;
        coordinator.start_provisioning().await;
        coordinator.select_bluetooth_method().await.unwrap();
        coordinator.select_device(p1()).await;

        coordinator.reset().await;
        let view = coordinator.snapshot();
        assert_eq!(view.state, ProvisioningState::idle());
        assert_eq!(view.current_device, None);
        assert_eq!(view.selected_method, None);
        assert!(view.discovered_devices.is_empty());
    }
}
