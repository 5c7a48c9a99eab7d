//! Bluetooth LE transport
//!
//! Bridges the callback-style radio to awaitable operations. A background
//! pump consumes radio events and resolves the single-shot completion
//! registered by the operation waiting on it. Operations on one peripheral
//! run one at a time; different peripherals proceed independently.

use std::{
    collections::{HashMap, HashSet, hash_map::Entry},
    sync::{Arc, Weak},
    time::Duration,
};

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    backend::{Advertisement, BluetoothRadio, RadioEvent, RadioState},
    core::{
        command::{CommandResponse, ControlCommand},
        error::{BluetoothError, BluetoothResult},
        types::{
            ConnectionType, Device, ProvisioningDevice, ProvisioningMethod,
        },
    },
    transport::{ControlTransport, bounded},
    util::broadcast_stream,
};

/// Time limits for Bluetooth operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BluetoothTimeouts {
    /// How long a scan collects advertisements
    pub scan_window: Duration,
    pub connect: Duration,
    pub disconnect: Duration,
    /// Characteristic writes and MTU negotiation
    pub command: Duration,
}

impl Default for BluetoothTimeouts {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_secs(30),
            connect: Duration::from_secs(30),
            disconnect: Duration::from_secs(10),
            command: Duration::from_secs(10),
        }
    }
}

type Completion = oneshot::Sender<BluetoothResult<()>>;

#[derive(Default)]
struct LinkTable {
    peripherals: HashMap<String, Advertisement>,
    connected: HashSet<String>,
    pending_connects: HashMap<String, Completion>,
    pending_disconnects: HashMap<String, Completion>,
    scan_sink: Option<mpsc::UnboundedSender<Advertisement>>,
}

/// Bluetooth transport over a [`BluetoothRadio`]
pub struct BluetoothTransport<R: BluetoothRadio> {
    radio: Arc<R>,
    timeouts: BluetoothTimeouts,
    links: Mutex<LinkTable>,
    queues: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    responses: broadcast::Sender<CommandResponse>,
}

impl<R: BluetoothRadio> BluetoothTransport<R> {
    /// Create the transport and start consuming radio events
    pub fn new(radio: Arc<R>, timeouts: BluetoothTimeouts) -> Arc<Self> {
        let events = radio.events();
        let (responses, _) = broadcast::channel(64);
        let transport = Arc::new(Self {
            radio,
            timeouts,
            links: Mutex::new(LinkTable::default()),
            queues: Mutex::new(HashMap::new()),
            responses,
        });

        tokio::spawn(Self::pump(Arc::downgrade(&transport), events));
        transport
    }

    async fn pump(transport: Weak<Self>, mut events: broadcast::Receiver<RadioEvent>) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "radio event pump lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(transport) = transport.upgrade() else {
                break;
            };
            transport.handle_event(event).await;
        }
        debug!("radio event pump stopped");
    }

    async fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::Discovered(advertisement) => {
                let mut links = self.links.lock().await;
                if let Some(sink) = &links.scan_sink {
                    let _ = sink.send(advertisement.clone());
                }
                links
                    .peripherals
                    .insert(advertisement.id.clone(), advertisement);
            }
            RadioEvent::Connected(device_id) => {
                info!(%device_id, "peripheral connected");
                let mut links = self.links.lock().await;
                links.connected.insert(device_id.clone());
                if let Some(done) = links.pending_connects.remove(&device_id) {
                    let _ = done.send(Ok(()));
                }
            }
            RadioEvent::FailedToConnect { device_id, reason } => {
                warn!(%device_id, %reason, "peripheral connection failed");
                if let Some(done) = self.links.lock().await.pending_connects.remove(&device_id) {
                    let _ = done.send(Err(BluetoothError::ConnectionFailed(reason)));
                }
            }
            RadioEvent::Disconnected(device_id) => {
                info!(%device_id, "peripheral disconnected");
                {
                    let mut links = self.links.lock().await;
                    links.connected.remove(&device_id);
                    if let Some(done) = links.pending_disconnects.remove(&device_id) {
                        let _ = done.send(Ok(()));
                    }
                    if let Some(done) = links.pending_connects.remove(&device_id) {
                        let _ = done.send(Err(BluetoothError::ConnectionFailed(
                            "link dropped while connecting".into(),
                        )));
                    }
                }
                self.release_queue(&device_id).await;
            }
            RadioEvent::Notification { device_id, payload } => {
                match CommandResponse::from_payload(&payload) {
                    Some(response) => {
                        let _ = self.responses.send(response);
                    }
                    None => debug!(%device_id, len = payload.len(), "ignoring notification"),
                }
            }
            RadioEvent::StateChanged(state) => {
                info!(?state, "radio state changed");
                if let Err(e) = state.ensure_ready() {
                    let mut links = self.links.lock().await;
                    links.connected.clear();
                    for (_, done) in links.pending_connects.drain() {
                        let _ = done.send(Err(e.clone()));
                    }
                }
            }
        }
    }

    /// Serialized operation queue of one peripheral
    async fn operation_queue(&self, device_id: &str) -> Arc<Mutex<()>> {
        self.queues
            .lock()
            .await
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget an idle queue; one still held or awaited stays in place
    async fn release_queue(&self, device_id: &str) {
        let mut queues = self.queues.lock().await;
        if queues
            .get(device_id)
            .is_some_and(|queue| Arc::strong_count(queue) == 1)
        {
            queues.remove(device_id);
        }
    }

    async fn collect_advertisements(&self) -> BluetoothResult<Vec<Advertisement>> {
        self.radio.state().ensure_ready()?;

        let (sink, mut found) = mpsc::unbounded_channel();
        if self.links.lock().await.scan_sink.replace(sink).is_some() {
            warn!("superseding running scan");
        }
        if let Err(e) = self.radio.start_scan().await {
            self.links.lock().await.scan_sink = None;
            return Err(e);
        }
        debug!(window = ?self.timeouts.scan_window, "bluetooth scan started");

        let mut seen = HashSet::new();
        let mut advertisements = Vec::new();
        let window = tokio::time::sleep(self.timeouts.scan_window);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => break,
                next = found.recv() => match next {
                    Some(advertisement) => {
                        if seen.insert(advertisement.id.clone()) {
                            advertisements.push(advertisement);
                        }
                    }
                    None => {
                        debug!("bluetooth scan cut short");
                        break;
                    }
                },
            }
        }

        self.radio.stop_scan().await;
        self.links.lock().await.scan_sink = None;
        info!(count = advertisements.len(), "bluetooth scan finished");
        Ok(advertisements)
    }

    /// Scan for onboarding candidates
    pub async fn scan_for_provisioning_devices(&self) -> BluetoothResult<Vec<ProvisioningDevice>> {
        Ok(self
            .collect_advertisements()
            .await?
            .into_iter()
            .map(|ad| {
                ProvisioningDevice::new(ad.id, ad.name, ad.kind.into(), [ProvisioningMethod::Bluetooth])
                    .with_rssi(ad.rssi)
            })
            .collect())
    }

    /// Connect to a previously discovered peripheral
    pub async fn connect_peripheral(&self, device_id: &str) -> BluetoothResult<bool> {
        self.radio.state().ensure_ready()?;

        let queue = self.operation_queue(device_id).await;
        let _turn = queue.lock().await;

        let done = {
            let mut links = self.links.lock().await;
            if !links.peripherals.contains_key(device_id) {
                return Err(BluetoothError::DeviceNotFound(device_id.to_string()));
            }
            if links.connected.contains(device_id) {
                return Ok(true);
            }
            let (tx, rx) = oneshot::channel();
            match links.pending_connects.entry(device_id.to_string()) {
                Entry::Occupied(_) => {
                    return Err(BluetoothError::ConnectionFailed(
                        "connection attempt already pending".into(),
                    ));
                }
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                }
            }
            rx
        };

        debug!(%device_id, "connecting peripheral");
        if let Err(e) = self.radio.connect(device_id).await {
            self.links.lock().await.pending_connects.remove(device_id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeouts.connect, done).await {
            Ok(Ok(result)) => result.map(|()| true),
            Ok(Err(_)) => Err(BluetoothError::Cancelled),
            Err(_) => {
                warn!(%device_id, "peripheral connection timed out");
                self.abandon_connect(device_id).await;
                Err(BluetoothError::ConnectionTimeout)
            }
        }
    }

    /// Cancel a timed-out attempt and wait for the radio to settle the link,
    /// so its late disconnect event cannot fail the next operation in the queue
    async fn abandon_connect(&self, device_id: &str) {
        let (tx, settled) = oneshot::channel();
        {
            let mut links = self.links.lock().await;
            links.pending_connects.remove(device_id);
            links.pending_disconnects.insert(device_id.to_string(), tx);
        }
        if self.radio.cancel_connection(device_id).await.is_ok()
            && tokio::time::timeout(self.timeouts.disconnect, settled)
                .await
                .is_err()
        {
            debug!(%device_id, "link did not settle after connection timeout");
        }
        self.links.lock().await.pending_disconnects.remove(device_id);
    }

    /// Disconnect a known peripheral
    pub async fn disconnect_peripheral(&self, device_id: &str) -> BluetoothResult<bool> {
        let queue = self.operation_queue(device_id).await;
        let _turn = queue.lock().await;

        let done = {
            let mut links = self.links.lock().await;
            if !links.peripherals.contains_key(device_id) {
                return Err(BluetoothError::DeviceNotFound(device_id.to_string()));
            }
            let (tx, rx) = oneshot::channel();
            match links.pending_disconnects.entry(device_id.to_string()) {
                Entry::Occupied(_) => {
                    return Err(BluetoothError::ConnectionFailed(
                        "disconnection already pending".into(),
                    ));
                }
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                }
            }
            rx
        };

        debug!(%device_id, "disconnecting peripheral");
        if let Err(e) = self.radio.cancel_connection(device_id).await {
            self.links.lock().await.pending_disconnects.remove(device_id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeouts.disconnect, done).await {
            Ok(Ok(result)) => result.map(|()| true),
            Ok(Err(_)) => Err(BluetoothError::Cancelled),
            Err(_) => {
                warn!(%device_id, "peripheral disconnection timed out");
                self.links.lock().await.pending_disconnects.remove(device_id);
                Err(BluetoothError::DisconnectionTimeout)
            }
        }
    }

    /// Write raw bytes to the peripheral's command characteristic
    pub async fn write(&self, device_id: &str, payload: &[u8]) -> BluetoothResult<()> {
        self.radio.state().ensure_ready()?;

        let queue = self.operation_queue(device_id).await;
        let _turn = queue.lock().await;

        bounded(
            self.timeouts.command,
            BluetoothError::CommandTimeout,
            self.radio.write(device_id, payload),
        )
        .await
    }

    /// Negotiate the link MTU with a known peripheral
    pub async fn request_mtu(&self, device_id: &str, mtu: u16) -> BluetoothResult<u16> {
        if !self.links.lock().await.peripherals.contains_key(device_id) {
            return Err(BluetoothError::DeviceNotFound(device_id.to_string()));
        }

        let queue = self.operation_queue(device_id).await;
        let _turn = queue.lock().await;

        let negotiated = bounded(
            self.timeouts.command,
            BluetoothError::MtuRequestFailed("timed out".into()),
            self.radio.request_mtu(device_id, mtu),
        )
        .await?;
        debug!(%device_id, requested = mtu, negotiated, "mtu negotiated");
        Ok(negotiated)
    }

    pub async fn is_connected(&self, device_id: &str) -> bool {
        self.links.lock().await.connected.contains(device_id)
    }

    pub fn radio_state(&self) -> RadioState {
        self.radio.state()
    }

    /// Stop scanning and fail every pending connection attempt with `Cancelled`
    pub async fn cancel(&self) {
        self.radio.stop_scan().await;

        let (connects, disconnects) = {
            let mut links = self.links.lock().await;
            links.scan_sink = None;
            let connects: Vec<_> = links.pending_connects.drain().collect();
            let disconnects: Vec<_> = links.pending_disconnects.drain().collect();
            (connects, disconnects)
        };

        for (device_id, done) in connects {
            debug!(%device_id, "cancelling pending connection");
            let _ = self.radio.cancel_connection(&device_id).await;
            let _ = done.send(Err(BluetoothError::Cancelled));
        }
        for (_, done) in disconnects {
            let _ = done.send(Err(BluetoothError::Cancelled));
        }
    }
}

impl<R: BluetoothRadio> ControlTransport for BluetoothTransport<R> {
    type Error = BluetoothError;

    fn is_service_available(&self) -> bool {
        self.radio.state() == RadioState::PoweredOn
    }

    async fn scan_for_devices(&self) -> BluetoothResult<Vec<Device>> {
        Ok(self
            .collect_advertisements()
            .await?
            .into_iter()
            .map(|ad| Device::new(ad.id, ad.name, ad.kind, ConnectionType::Bluetooth).with_rssi(ad.rssi))
            .collect())
    }

    async fn connect(&self, device: &Device) -> BluetoothResult<bool> {
        self.connect_peripheral(&device.id).await
    }

    async fn disconnect(&self, device: &Device) -> BluetoothResult<bool> {
        self.disconnect_peripheral(&device.id).await
    }

    async fn send_command(&self, command: &ControlCommand, device: &Device) -> BluetoothResult<bool> {
        let payload = command
            .to_payload()
            .map_err(|e| BluetoothError::CommandSendFailed(e.to_string()))?;
        debug!(device_id = %device.id, command = ?command.command_type(), "writing command");
        self.write(&device.id, payload.as_bytes()).await?;
        Ok(true)
    }

    fn command_responses(&self) -> BoxStream<'static, CommandResponse> {
        broadcast_stream(self.responses.subscribe()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{
            SimulatedRadio,
            simulated::{ConnectBehavior, DisconnectBehavior},
        },
        core::{command::CommandType, types::DeviceKind},
    };
    use pretty_assertions::assert_eq;

    fn fast() -> BluetoothTimeouts {
        BluetoothTimeouts {
            scan_window: Duration::from_millis(100),
            connect: Duration::from_millis(100),
            disconnect: Duration::from_millis(100),
            command: Duration::from_millis(100),
        }
    }

    fn ad(id: &str) -> Advertisement {
        Advertisement {
            id: id.into(),
            name: format!("Device {id}"),
            kind: DeviceKind::VacuumCleaner,
            rssi: -60,
        }
    }

    async fn discovered(ids: &[&str]) -> (SimulatedRadio, Arc<BluetoothTransport<SimulatedRadio>>) {
        let radio = SimulatedRadio::new();
        radio
            .set_advertisements(ids.iter().map(|id| ad(id)).collect())
            .await;
        let transport = BluetoothTransport::new(Arc::new(radio.clone()), fast());
        transport.scan_for_devices().await.unwrap();
        (radio, transport)
    }

    #[tokio::test]
    async fn test_scan_suppresses_duplicates() {
        let radio = SimulatedRadio::new();
        radio
            .set_advertisements(vec![ad("a"), ad("b"), ad("a")])
            .await;
        let transport = BluetoothTransport::new(Arc::new(radio), fast());

        let devices = transport.scan_for_devices().await.unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(devices[0].connection_type(), ConnectionType::Bluetooth);
    }

    #[tokio::test]
    async fn test_scan_rejected_when_powered_off() {
        let radio = SimulatedRadio::new();
        radio.set_radio_state(RadioState::PoweredOff);
        let transport = BluetoothTransport::new(Arc::new(radio), fast());

        assert_eq!(
            transport.scan_for_devices().await,
            Err(BluetoothError::PoweredOff)
        );
        assert!(!transport.is_service_available());
    }

    #[tokio::test]
    async fn test_connect_unknown_peripheral() {
        let transport = BluetoothTransport::new(Arc::new(SimulatedRadio::new()), fast());
        assert_eq!(
            transport.connect_peripheral("ghost").await,
            Err(BluetoothError::DeviceNotFound("ghost".into()))
        );
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let (_radio, transport) = discovered(&["a"]).await;

        assert_eq!(transport.connect_peripheral("a").await, Ok(true));
        assert!(transport.is_connected("a").await);

        assert_eq!(transport.disconnect_peripheral("a").await, Ok(true));
        assert!(!transport.is_connected("a").await);
    }

    #[tokio::test]
    async fn test_connect_times_out() {
        let (radio, transport) = discovered(&["a"]).await;
        radio.set_connect_behavior(ConnectBehavior::Ignore).await;

        assert_eq!(
            transport.connect_peripheral("a").await,
            Err(BluetoothError::ConnectionTimeout)
        );
        assert!(!transport.is_connected("a").await);
    }

    #[tokio::test]
    async fn test_disconnect_times_out() {
        let (radio, transport) = discovered(&["a"]).await;
        transport.connect_peripheral("a").await.unwrap();
        radio.set_disconnect_behavior(DisconnectBehavior::Ignore).await;

        assert_eq!(
            transport.disconnect_peripheral("a").await,
            Err(BluetoothError::DisconnectionTimeout)
        );

        // The next disconnect is not blocked by the abandoned one
        radio.set_disconnect_behavior(DisconnectBehavior::Complete).await;
        assert_eq!(transport.disconnect_peripheral("a").await, Ok(true));
    }

    #[tokio::test]
    async fn test_queue_survives_disconnect_event() {
        let (radio, transport) = discovered(&["a"]).await;
        radio.set_latency(Duration::from_millis(30)).await;
        radio.set_connect_behavior(ConnectBehavior::Ignore).await;

        let disconnect = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.disconnect_peripheral("a").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let queued = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.connect_peripheral("a").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let later = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.connect_peripheral("a").await })
        };

        assert_eq!(disconnect.await.unwrap(), Ok(true));
        assert_eq!(queued.await.unwrap(), Err(BluetoothError::ConnectionTimeout));
        assert_eq!(later.await.unwrap(), Err(BluetoothError::ConnectionTimeout));
        assert_eq!(radio.connect_calls().await, 2);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let (radio, transport) = discovered(&["a"]).await;
        radio.set_connect_behavior(ConnectBehavior::Fail).await;

        assert!(matches!(
            transport.connect_peripheral("a").await,
            Err(BluetoothError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_same_device_operations_are_serialized() {
        let (radio, transport) = discovered(&["a"]).await;
        radio.set_latency(Duration::from_millis(20)).await;

        let (first, second) = tokio::join!(
            transport.connect_peripheral("a"),
            transport.connect_peripheral("a")
        );
        assert_eq!(first, Ok(true));
        assert_eq!(second, Ok(true));
        assert_eq!(radio.connect_calls().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_resolves_pending_connection() {
        let (radio, transport) = discovered(&["a"]).await;
        radio.set_connect_behavior(ConnectBehavior::Ignore).await;

        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.connect_peripheral("a").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.cancel().await;

        assert_eq!(pending.await.unwrap(), Err(BluetoothError::Cancelled));
    }

    #[tokio::test]
    async fn test_send_command_yields_response() {
        let (radio, transport) = discovered(&["a"]).await;
        transport.connect_peripheral("a").await.unwrap();
        let mut responses = transport.command_responses();

        let device = Device::new("a", "A", DeviceKind::VacuumCleaner, ConnectionType::Bluetooth);
        let command = ControlCommand::new("a", CommandType::GetStatus);
        assert_eq!(transport.send_command(&command, &device).await, Ok(true));
        assert_eq!(radio.write_count().await, 1);

        let response = responses.next().await.unwrap();
        assert_eq!(response.command_id, command.id());
    }

    #[tokio::test]
    async fn test_request_mtu() {
        let (radio, transport) = discovered(&["a"]).await;
        assert_eq!(
            transport.request_mtu("ghost", 185).await,
            Err(BluetoothError::DeviceNotFound("ghost".into()))
        );

        transport.connect_peripheral("a").await.unwrap();
        radio.set_max_mtu(185).await;
        assert_eq!(transport.request_mtu("a", 247).await, Ok(185));
    }

    #[tokio::test]
    async fn test_power_loss_fails_pending_connection() {
        let (radio, transport) = discovered(&["a"]).await;
        radio.set_connect_behavior(ConnectBehavior::Ignore).await;

        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.connect_peripheral("a").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        radio.set_radio_state(RadioState::PoweredOff);

        assert_eq!(pending.await.unwrap(), Err(BluetoothError::PoweredOff));
    }

    #[tokio::test]
    async fn test_provisioning_scan_maps_kind() {
        let radio = SimulatedRadio::new();
        radio.set_advertisements(vec![ad("p1")]).await;
        let transport = BluetoothTransport::new(Arc::new(radio), fast());

        let devices = transport.scan_for_provisioning_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].supports(ProvisioningMethod::Bluetooth));
        assert_eq!(devices[0].rssi, Some(-60));
    }
}
