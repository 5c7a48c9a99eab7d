//! Device control orchestration
//!
//! Tracks one selected device, forwards its status and connection flag into
//! the published [`ControlView`] and routes commands through the dispatcher.

use std::sync::{Arc, Mutex};

use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    backend::Backends,
    core::{
        command::{CommandType, ControlCommand},
        connection::ConnectionManager,
        device_state::DeviceStateManager,
        dispatch::CommandDispatcher,
        error::{ControlError, ControlResult},
        registry::DeviceRegistry,
        types::{Device, DeviceStatus},
    },
    transport::ControlTransport,
    util::watch_stream,
};

/// Everything a client observes about device control
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlView {
    pub current_device: Option<Device>,
    pub device_status: DeviceStatus,
    pub is_connected: bool,
    pub is_executing_command: bool,
    pub is_loading: bool,
    pub devices: Vec<Device>,
    pub error_message: Option<String>,
}

enum Tracked {
    Status(DeviceStatus),
    Connected(bool),
}

pub struct DeviceController<B: Backends> {
    registry: Arc<DeviceRegistry>,
    connections: Arc<ConnectionManager<B>>,
    dispatcher: Arc<CommandDispatcher<B>>,
    states: Arc<DeviceStateManager>,
    view: Arc<watch::Sender<ControlView>>,
    tracking: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Backends> DeviceController<B> {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        connections: Arc<ConnectionManager<B>>,
        dispatcher: Arc<CommandDispatcher<B>>,
        states: Arc<DeviceStateManager>,
    ) -> Self {
        Self {
            registry,
            connections,
            dispatcher,
            states,
            view: Arc::new(watch::channel(ControlView::default()).0),
            tracking: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> ControlView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> BoxStream<'static, ControlView> {
        watch_stream(self.view.subscribe()).boxed()
    }

    fn current_device(&self) -> ControlResult<Device> {
        self.view
            .borrow()
            .current_device
            .clone()
            .ok_or(ControlError::NoDeviceSelected)
    }

    /// Clear the busy flags and surface a failure
    fn settle<T>(&self, result: ControlResult<T>) -> ControlResult<T> {
        self.view.send_modify(|view| {
            view.is_loading = false;
            view.is_executing_command = false;
            if let Err(e) = &result {
                view.error_message = Some(e.to_string());
            }
        });
        if let Err(e) = &result {
            warn!(error = %e, "device control operation failed");
        }
        result
    }

    /// Select `device`, register it and follow its status and connection
    pub async fn set_current_device(&self, device: Device) -> ControlResult<()> {
        debug!(device_id = %device.id, name = %device.name, "setting current device");
        self.settle(
            self.registry
                .register(device.clone())
                .await
                .map_err(ControlError::from),
        )?;

        let status = self
            .states
            .get_device_status(&device.id)
            .await
            .unwrap_or(device.status);
        let connected = self.connections.is_connected(&device);
        self.view.send_modify(|view| {
            view.current_device = Some(device.clone());
            view.device_status = status;
            view.is_connected = connected;
            view.error_message = None;
        });

        let statuses = self
            .states
            .subscribe_to_device_status_changes(&device.id)
            .await
            .map(Tracked::Status);
        let links = self
            .connections
            .connection_status(&device)
            .map(Tracked::Connected);
        let handle = tokio::spawn(track(
            stream::select(statuses, links).boxed(),
            device.id,
            self.view.clone(),
        ));

        if let Ok(mut tracking) = self.tracking.lock() {
            if let Some(previous) = tracking.replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }

    pub async fn connect_to_device(&self) -> ControlResult<bool> {
        let device = self.settle(self.current_device())?;
        self.view.send_modify(|view| {
            view.is_loading = true;
            view.error_message = None;
        });

        let result = match self.connections.connect(&device).await {
            Ok(connected) => {
                self.view.send_modify(|view| view.is_connected = connected);
                Ok(connected)
            }
            Err(e) => Err(e.into()),
        };
        self.settle(result)
    }

    pub async fn disconnect_device(&self) -> ControlResult<bool> {
        let device = self.settle(self.current_device())?;
        self.view.send_modify(|view| {
            view.is_loading = true;
            view.error_message = None;
        });

        let result = match self.connections.disconnect(&device).await {
            Ok(disconnected) => {
                if disconnected {
                    self.view.send_modify(|view| view.is_connected = false);
                }
                Ok(disconnected)
            }
            Err(e) => Err(e.into()),
        };
        self.settle(result)
    }

    /// Send `command_type` to the current device
    ///
    /// A device that answers with a refusal yields
    /// [`ControlError::CommandRejected`].
    pub async fn send_command(
        &self,
        command_type: CommandType,
        parameters: Map<String, Value>,
    ) -> ControlResult<()> {
        let device = self.settle(self.current_device())?;
        self.view.send_modify(|view| {
            view.is_executing_command = true;
            view.error_message = None;
        });

        let command = ControlCommand::new(&device.id, command_type).with_parameters(parameters);
        debug!(device_id = %device.id, command_id = %command.id(), ?command_type, "sending command");
        let result = match self.dispatcher.send_command(&command).await {
            Ok(true) => {
                info!(device_id = %device.id, ?command_type, "command accepted");
                Ok(())
            }
            Ok(false) => Err(ControlError::CommandRejected),
            Err(e) => Err(e.into()),
        };
        self.settle(result)
    }

    /// Discover devices over every available transport and register them
    pub async fn scan_for_devices(&self) -> ControlResult<Vec<Device>> {
        self.view.send_modify(|view| {
            view.is_loading = true;
            view.error_message = None;
        });
        let result = self.discover().await;
        if let Ok(devices) = &result {
            info!(count = devices.len(), "device scan finished");
            self.view.send_modify(|view| view.devices = devices.clone());
        }
        self.settle(result)
    }

    async fn discover(&self) -> ControlResult<Vec<Device>> {
        let transports = self.connections.transports();
        let mut found = Vec::new();

        if transports.bluetooth.is_service_available() {
            found.extend(
                transports
                    .bluetooth
                    .scan_for_devices()
                    .await
                    .map_err(|e| ControlError::Transport(e.into()))?,
            );
        } else {
            debug!("bluetooth unavailable, skipping scan");
        }
        if transports.matter.is_service_available() {
            found.extend(
                transports
                    .matter
                    .scan_for_devices()
                    .await
                    .map_err(|e| ControlError::Transport(e.into()))?,
            );
        } else {
            debug!("matter unavailable, skipping discovery");
        }

        for device in &found {
            if let Err(e) = self.registry.register(device.clone()).await {
                warn!(device_id = %device.id, error = %e, "skipping discovered device");
            }
        }
        Ok(self.registry.all().await)
    }

    /// Ask the current device for its status and record the answer
    pub async fn refresh_device_status(&self) -> ControlResult<DeviceStatus> {
        let device = self.settle(self.current_device())?;
        self.view.send_modify(|view| {
            view.is_loading = true;
            view.error_message = None;
        });

        let command = ControlCommand::new(&device.id, CommandType::GetStatus);
        let result = match self
            .dispatcher
            .send_command_and_wait_for_response(&command)
            .await
        {
            Ok(data) => {
                let reported = data
                    .get("status")
                    .cloned()
                    .and_then(|value| serde_json::from_value::<DeviceStatus>(value).ok());
                match reported {
                    Some(status) => {
                        self.states.update_device_status(&device.id, status).await;
                        self.view.send_modify(|view| view.device_status = status);
                        Ok(status)
                    }
                    None => {
                        warn!(device_id = %device.id, "status response carried no status");
                        Ok(self.view.borrow().device_status)
                    }
                }
            }
            Err(e) => Err(e.into()),
        };
        self.settle(result)
    }
}

impl<B: Backends> Drop for DeviceController<B> {
    fn drop(&mut self) {
        if let Ok(mut tracking) = self.tracking.lock() {
            if let Some(handle) = tracking.take() {
                handle.abort();
            }
        }
    }
}

/// Mirror status and connection updates of `device_id` into the view
async fn track(
    mut updates: BoxStream<'static, Tracked>,
    device_id: String,
    view: Arc<watch::Sender<ControlView>>,
) {
    while let Some(update) = updates.next().await {
        view.send_if_modified(|view| {
            let Some(device) = view.current_device.as_mut() else {
                return false;
            };
            if device.id != device_id {
                return false;
            }
            match update {
                Tracked::Status(status) => {
                    device.status = status;
                    view.device_status = status;
                }
                Tracked::Connected(connected) => {
                    device.is_connected = connected;
                    view.is_connected = connected;
                }
            }
            true
        });
    }
    debug!(%device_id, "stopped tracking device");
}
