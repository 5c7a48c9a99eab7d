//! Simulated Bluetooth radio

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::sync::{Mutex, broadcast, watch};

use super::simulated_response;
use crate::{
    backend::{Advertisement, BluetoothRadio, RadioEvent, RadioState, bluetooth_radio::DEFAULT_ATT_MTU},
    core::{
        command::CommandPayload,
        error::{BluetoothError, BluetoothResult},
        types::{DeviceKind, DeviceStatus},
    },
};

/// How the simulated peripheral reacts to a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    Fail,
    /// Never report completion
    Ignore,
}

/// How the simulated peripheral reacts to a disconnection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectBehavior {
    Complete,
    /// Never report the link as closed
    Ignore,
}

#[derive(Debug)]
struct RadioInner {
    advertisements: Vec<Advertisement>,
    scanning: bool,
    connected: HashSet<String>,
    connect_behavior: ConnectBehavior,
    disconnect_behavior: DisconnectBehavior,
    latency: Duration,
    should_fail_write: bool,
    auto_respond: bool,
    max_mtu: u16,
    reported_status: DeviceStatus,
    connect_calls: usize,
    writes: Vec<(String, Vec<u8>)>,
}

/// Simulated Bluetooth central
#[derive(Debug, Clone)]
pub struct SimulatedRadio {
    inner: Arc<Mutex<RadioInner>>,
    power: Arc<watch::Sender<RadioState>>,
    events: broadcast::Sender<RadioEvent>,
}

impl SimulatedRadio {
    /// Powered-on radio with no peripherals in range
    pub fn new() -> Self {
        Self::with_advertisements(vec![], Duration::ZERO)
    }

    /// Radio with a vacuum cleaner and a light advertising
    pub fn with_demo_peripherals() -> Self {
        Self::with_advertisements(
            vec![
                Advertisement {
                    id: "ble-vacuum-01".into(),
                    name: "Robot Vacuum".into(),
                    kind: DeviceKind::VacuumCleaner,
                    rssi: -55,
                },
                Advertisement {
                    id: "ble-light-01".into(),
                    name: "Smart Light".into(),
                    kind: DeviceKind::SmartLight,
                    rssi: -70,
                },
            ],
            Duration::from_millis(200),
        )
    }

    fn with_advertisements(advertisements: Vec<Advertisement>, latency: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        let (power, _) = watch::channel(RadioState::PoweredOn);
        Self {
            inner: Arc::new(Mutex::new(RadioInner {
                advertisements,
                scanning: false,
                connected: HashSet::new(),
                connect_behavior: ConnectBehavior::Succeed,
                disconnect_behavior: DisconnectBehavior::Complete,
                latency,
                should_fail_write: false,
                auto_respond: true,
                max_mtu: DEFAULT_ATT_MTU,
                reported_status: DeviceStatus::Idle,
                connect_calls: 0,
                writes: vec![],
            })),
            power: Arc::new(power),
            events,
        }
    }

    pub async fn set_advertisements(&self, advertisements: Vec<Advertisement>) {
        self.inner.lock().await.advertisements = advertisements;
    }

    /// Change the power state and report it on the event channel
    pub fn set_radio_state(&self, state: RadioState) {
        self.power.send_replace(state);
        let _ = self.events.send(RadioEvent::StateChanged(state));
    }

    pub async fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.inner.lock().await.connect_behavior = behavior;
    }

    pub async fn set_disconnect_behavior(&self, behavior: DisconnectBehavior) {
        self.inner.lock().await.disconnect_behavior = behavior;
    }

    /// Delay before every asynchronous callback
    pub async fn set_latency(&self, latency: Duration) {
        self.inner.lock().await.latency = latency;
    }

    pub async fn set_write_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_write = should_fail;
    }

    /// Answer every written command with a notification
    pub async fn set_auto_respond(&self, auto_respond: bool) {
        self.inner.lock().await.auto_respond = auto_respond;
    }

    pub async fn set_max_mtu(&self, mtu: u16) {
        self.inner.lock().await.max_mtu = mtu.max(DEFAULT_ATT_MTU);
    }

    /// Status reported in answers to `get_status`
    pub async fn set_reported_status(&self, status: DeviceStatus) {
        self.inner.lock().await.reported_status = status;
    }

    /// Simulate the peripheral dropping the link
    pub async fn drop_link(&self, device_id: &str) {
        self.inner.lock().await.connected.remove(device_id);
        let _ = self.events.send(RadioEvent::Disconnected(device_id.to_string()));
    }

    pub async fn connect_calls(&self) -> usize {
        self.inner.lock().await.connect_calls
    }

    pub async fn write_count(&self) -> usize {
        self.inner.lock().await.writes.len()
    }

    pub async fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.lock().await.writes.clone()
    }

    async fn latency(&self) -> Duration {
        self.inner.lock().await.latency
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl BluetoothRadio for SimulatedRadio {
    fn state(&self) -> RadioState {
        *self.power.borrow()
    }

    fn events(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }

    async fn start_scan(&self) -> BluetoothResult<()> {
        self.state().ensure_ready()?;

        let advertisements = {
            let mut inner = self.inner.lock().await;
            inner.scanning = true;
            inner.advertisements.clone()
        };

        let radio = self.clone();
        tokio::spawn(async move {
            let latency = radio.latency().await;
            for advertisement in advertisements {
                tokio::time::sleep(latency).await;
                if !radio.inner.lock().await.scanning {
                    break;
                }
                let _ = radio.events.send(RadioEvent::Discovered(advertisement));
            }
        });

        Ok(())
    }

    async fn stop_scan(&self) {
        self.inner.lock().await.scanning = false;
    }

    async fn connect(&self, device_id: &str) -> BluetoothResult<()> {
        self.state().ensure_ready()?;

        let (behavior, latency) = {
            let mut inner = self.inner.lock().await;
            inner.connect_calls += 1;
            (inner.connect_behavior, inner.latency)
        };

        let radio = self.clone();
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            match behavior {
                ConnectBehavior::Succeed => {
                    radio.inner.lock().await.connected.insert(device_id.clone());
                    let _ = radio.events.send(RadioEvent::Connected(device_id));
                }
                ConnectBehavior::Fail => {
                    let _ = radio.events.send(RadioEvent::FailedToConnect {
                        device_id,
                        reason: "peripheral refused connection".into(),
                    });
                }
                ConnectBehavior::Ignore => {}
            }
        });

        Ok(())
    }

    async fn cancel_connection(&self, device_id: &str) -> BluetoothResult<()> {
        let latency = {
            let mut inner = self.inner.lock().await;
            if inner.disconnect_behavior == DisconnectBehavior::Ignore {
                return Ok(());
            }
            inner.connected.remove(device_id);
            inner.latency
        };

        let events = self.events.clone();
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            let _ = events.send(RadioEvent::Disconnected(device_id));
        });

        Ok(())
    }

    async fn write(&self, device_id: &str, payload: &[u8]) -> BluetoothResult<()> {
        self.state().ensure_ready()?;

        let mut inner = self.inner.lock().await;
        if !inner.connected.contains(device_id) {
            return Err(BluetoothError::CommandSendFailed(format!(
                "{device_id} is not connected"
            )));
        }
        if inner.should_fail_write {
            return Err(BluetoothError::CommandSendFailed(
                "characteristic write rejected".into(),
            ));
        }
        inner.writes.push((device_id.to_string(), payload.to_vec()));

        if !inner.auto_respond {
            return Ok(());
        }
        if let Ok(command) = serde_json::from_slice::<CommandPayload>(payload) {
            let response = simulated_response(
                command.command_id,
                device_id,
                command.command_type,
                inner.reported_status,
            );
            if let Ok(payload) = serde_json::to_vec(&response) {
                let _ = self.events.send(RadioEvent::Notification {
                    device_id: device_id.to_string(),
                    payload,
                });
            }
        }

        Ok(())
    }

    async fn request_mtu(&self, device_id: &str, mtu: u16) -> BluetoothResult<u16> {
        self.state().ensure_ready()?;

        let inner = self.inner.lock().await;
        if !inner.connected.contains(device_id) {
            return Err(BluetoothError::MtuRequestFailed(format!(
                "{device_id} is not connected"
            )));
        }
        Ok(mtu.min(inner.max_mtu).max(DEFAULT_ATT_MTU))
    }
}
