//! Command dispatch
//!
//! Turns a [`ControlCommand`] into traffic on the one transport that serves
//! its target device.

use std::{future::Future, sync::Arc, time::Duration};

use futures::{StreamExt, future};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::Backends,
    core::{
        command::ControlCommand,
        connection::ConnectionManager,
        error::{BatchError, CommandError, CommandResult, TransportError},
        registry::DeviceRegistry,
        types::{ConnectionType, Device},
    },
    transport::ControlTransport,
};

/// Time limits for dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimeouts {
    /// Waiting for a correlated response
    pub response: Duration,
    /// A whole sequential batch
    pub batch: Duration,
}

impl Default for DispatchTimeouts {
    fn default() -> Self {
        Self {
            response: Duration::from_secs(30),
            batch: Duration::from_secs(60),
        }
    }
}

struct InFlight {
    command_id: Uuid,
    cancel: oneshot::Sender<()>,
}

pub struct CommandDispatcher<B: Backends> {
    registry: Arc<DeviceRegistry>,
    connections: Arc<ConnectionManager<B>>,
    timeouts: DispatchTimeouts,
    in_flight: Mutex<Option<InFlight>>,
}

impl<B: Backends> CommandDispatcher<B> {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        connections: Arc<ConnectionManager<B>>,
        timeouts: DispatchTimeouts,
    ) -> Self {
        Self {
            registry,
            connections,
            timeouts,
            in_flight: Mutex::new(None),
        }
    }

    /// Resolve the target and check it is connected, without any I/O
    async fn preflight(&self, command: &ControlCommand) -> CommandResult<Device> {
        let device = self
            .registry
            .get(command.device_id())
            .await
            .ok_or_else(|| CommandError::UnknownDevice(command.device_id().to_string()))?;

        if !self.connections.is_connected(&device) {
            debug!(device_id = %device.id, "rejecting command for disconnected device");
            return Err(CommandError::DeviceNotConnected);
        }
        Ok(device)
    }

    async fn route(&self, command: &ControlCommand, device: &Device) -> CommandResult<bool> {
        let transports = self.connections.transports();
        debug!(
            device_id = %device.id,
            command_id = %command.id(),
            connection_type = ?device.connection_type(),
            "dispatching command"
        );

        let accepted = match device.connection_type() {
            ConnectionType::Bluetooth => transports
                .bluetooth
                .send_command(command, device)
                .await
                .map_err(TransportError::from)?,
            ConnectionType::Wifi | ConnectionType::Mqtt => transports
                .mqtt
                .send_command(command, device)
                .await
                .map_err(TransportError::from)?,
            ConnectionType::Matter => transports
                .matter
                .send_command(command, device)
                .await
                .map_err(TransportError::from)?,
            ConnectionType::Cloud => transports
                .cloud
                .send_command(command, device)
                .await
                .map_err(TransportError::from)?,
        };
        Ok(accepted)
    }

    /// Run `operation` as the in-flight command, abandoning it on cancel
    async fn cancellable<T>(
        &self,
        command_id: Uuid,
        operation: impl Future<Output = CommandResult<T>>,
    ) -> CommandResult<T> {
        let (cancel, cancelled) = oneshot::channel();
        *self.in_flight.lock().await = Some(InFlight { command_id, cancel });

        let result = tokio::select! {
            biased;
            Ok(()) = cancelled => {
                info!(%command_id, "command cancelled");
                Err(CommandError::Cancelled)
            }
            result = operation => result,
        };

        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .as_ref()
            .is_some_and(|current| current.command_id == command_id)
        {
            *in_flight = None;
        }
        result
    }

    pub async fn send_command(&self, command: &ControlCommand) -> CommandResult<bool> {
        let device = self.preflight(command).await?;
        self.cancellable(command.id(), self.route(command, &device))
            .await
    }

    /// Send and wait for the device's response to this command
    pub async fn send_command_and_wait_for_response(
        &self,
        command: &ControlCommand,
    ) -> CommandResult<Map<String, Value>> {
        let device = self.preflight(command).await?;
        let command_id = command.id();
        let responses = self
            .connections
            .transports()
            .command_responses(device.connection_type());
        let limit = self.timeouts.response;

        self.cancellable(command_id, async {
            if !self.route(command, &device).await? {
                return Err(CommandError::Rejected);
            }

            let mut matching = responses
                .filter(|response| future::ready(response.command_id == command_id));
            match tokio::time::timeout(limit, matching.next()).await {
                Ok(Some(response)) => Ok(response.into_map()),
                Ok(None) | Err(_) => {
                    warn!(%command_id, "no response from device");
                    Err(CommandError::ResponseTimeout)
                }
            }
        })
        .await
    }

    /// Send `commands` one after another, in order
    ///
    /// Stops at the first command that fails; the error carries the results
    /// gathered up to that point.
    pub async fn send_commands(&self, commands: &[ControlCommand]) -> Result<Vec<bool>, BatchError> {
        let mut results = Vec::with_capacity(commands.len());

        let outcome = tokio::time::timeout(self.timeouts.batch, async {
            for (index, command) in commands.iter().enumerate() {
                match self.send_command(command).await {
                    Ok(accepted) => results.push(accepted),
                    Err(source) => return Err((index, source)),
                }
            }
            Ok(())
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                info!(count = results.len(), "command batch completed");
                Ok(results)
            }
            Ok(Err((failed_index, source))) => {
                warn!(failed_index, error = %source, "command batch aborted");
                Err(BatchError {
                    completed: results,
                    failed_index,
                    source,
                })
            }
            Err(_) => {
                warn!(completed = results.len(), "command batch timed out");
                Err(BatchError {
                    failed_index: results.len(),
                    completed: results,
                    source: CommandError::BatchTimeout,
                })
            }
        }
    }

    /// Abandon the command currently in flight, if any
    ///
    /// Returns whether there was one. Bytes already handed to the transport
    /// are not recalled.
    pub async fn cancel_current_command(&self) -> bool {
        match self.in_flight.lock().await.take() {
            Some(in_flight) => in_flight.cancel.send(()).is_ok(),
            None => false,
        }
    }
}
