//! Matter transport
//!
//! A node must be paired onto the local fabric before it accepts commands or
//! property subscriptions.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{StreamExt, future, stream::BoxStream};
use serde_json::{Map, Value};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use crate::{
    backend::{MatterFabric, PropertyReport},
    core::{
        command::{CommandResponse, ControlCommand},
        error::{MatterError, MatterResult},
        types::Device,
    },
    transport::{ControlTransport, bounded},
    util::broadcast_stream,
};

/// Time limits for Matter operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatterTimeouts {
    pub discover: Duration,
    pub pair: Duration,
    pub unpair: Duration,
    pub command: Duration,
}

impl Default for MatterTimeouts {
    fn default() -> Self {
        Self {
            discover: Duration::from_secs(30),
            pair: Duration::from_secs(20),
            unpair: Duration::from_secs(10),
            command: Duration::from_secs(10),
        }
    }
}

/// Matter transport over a [`MatterFabric`]
pub struct MatterTransport<F: MatterFabric> {
    fabric: Arc<F>,
    timeouts: MatterTimeouts,
    paired: RwLock<HashMap<String, Device>>,
    responses: broadcast::Sender<CommandResponse>,
}

impl<F: MatterFabric> MatterTransport<F> {
    pub fn new(fabric: Arc<F>, timeouts: MatterTimeouts) -> Self {
        let (responses, _) = broadcast::channel(64);
        Self {
            fabric,
            timeouts,
            paired: RwLock::new(HashMap::new()),
            responses,
        }
    }

    fn ensure_available(&self) -> MatterResult<()> {
        if self.fabric.is_available() {
            Ok(())
        } else {
            Err(MatterError::NotAvailable)
        }
    }

    async fn ensure_paired(&self, device_id: &str) -> MatterResult<()> {
        if self.paired.read().await.contains_key(device_id) {
            Ok(())
        } else {
            Err(MatterError::DeviceNotPaired)
        }
    }

    pub async fn discover_devices(&self) -> MatterResult<Vec<Device>> {
        self.ensure_available()?;
        let devices = bounded(
            self.timeouts.discover,
            MatterError::Timeout,
            self.fabric.discover(),
        )
        .await?;
        info!(count = devices.len(), "matter discovery finished");
        Ok(devices)
    }

    pub async fn pair_device(&self, device: &Device) -> MatterResult<bool> {
        self.ensure_available()?;
        bounded(
            self.timeouts.pair,
            MatterError::Timeout,
            self.fabric.commission(&device.id),
        )
        .await?;

        self.paired
            .write()
            .await
            .insert(device.id.clone(), device.clone());
        info!(device_id = %device.id, "matter device paired");
        Ok(true)
    }

    pub async fn unpair_device(&self, device: &Device) -> MatterResult<bool> {
        self.ensure_available()?;
        bounded(
            self.timeouts.unpair,
            MatterError::Timeout,
            self.fabric.decommission(&device.id),
        )
        .await?;

        self.paired.write().await.remove(&device.id);
        info!(device_id = %device.id, "matter device unpaired");
        Ok(true)
    }

    pub async fn is_paired(&self, device_id: &str) -> bool {
        self.paired.read().await.contains_key(device_id)
    }

    /// Property maps reported by one paired device
    pub async fn subscribe_to_device_properties(
        &self,
        device: &Device,
    ) -> MatterResult<BoxStream<'static, Map<String, Value>>> {
        self.ensure_available()?;
        self.ensure_paired(&device.id).await?;

        let device_id = device.id.clone();
        debug!(%device_id, "matter property subscription");
        Ok(broadcast_stream(self.fabric.property_reports()).filter_map(move |report| {
            future::ready((report.device_id == device_id).then_some(report.properties))
        })
        .boxed())
    }

    /// Reports from every node on the fabric
    pub fn property_reports(&self) -> BoxStream<'static, PropertyReport> {
        broadcast_stream(self.fabric.property_reports()).boxed()
    }
}

impl<F: MatterFabric> ControlTransport for MatterTransport<F> {
    type Error = MatterError;

    fn is_service_available(&self) -> bool {
        self.fabric.is_available()
    }

    async fn scan_for_devices(&self) -> MatterResult<Vec<Device>> {
        self.discover_devices().await
    }

    async fn connect(&self, device: &Device) -> MatterResult<bool> {
        self.pair_device(device).await
    }

    async fn disconnect(&self, device: &Device) -> MatterResult<bool> {
        self.unpair_device(device).await
    }

    async fn send_command(&self, command: &ControlCommand, device: &Device) -> MatterResult<bool> {
        self.ensure_available()?;
        self.ensure_paired(&device.id).await?;

        debug!(device_id = %device.id, command = ?command.command_type(), "invoking matter command");
        let data = bounded(
            self.timeouts.command,
            MatterError::Timeout,
            self.fabric.invoke(&device.id, command),
        )
        .await?;

        let _ = self.responses.send(CommandResponse {
            command_id: command.id(),
            device_id: device.id.clone(),
            status: "success".to_string(),
            data,
        });
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
        backend::SimulatedFabric,
        core::{
            command::CommandType,
            types::{ConnectionType, DeviceKind},
        },
    };
    use serde_json::json;

    fn light() -> Device {
        Device::new("m1", "Light", DeviceKind::SmartLight, ConnectionType::Matter)
    }

    fn transport() -> (SimulatedFabric, MatterTransport<SimulatedFabric>) {
        let fabric = SimulatedFabric::new();
        let transport = MatterTransport::new(Arc::new(fabric.clone()), MatterTimeouts::default());
        (fabric, transport)
    }

    #[tokio::test]
    async fn test_unpaired_device_is_rejected() {
        let (fabric, transport) = transport();
        let command = ControlCommand::new("m1", CommandType::PowerOn);

        assert_eq!(
            transport.send_command(&command, &light()).await,
            Err(MatterError::DeviceNotPaired)
        );
        assert!(matches!(
            transport.subscribe_to_device_properties(&light()).await,
            Err(MatterError::DeviceNotPaired)
        ));
        assert_eq!(fabric.invoke_calls().await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_before_pairing_check() {
        let (fabric, transport) = transport();
        fabric.set_available(false);
        let command = ControlCommand::new("m1", CommandType::PowerOn);

        assert!(!transport.is_service_available());
        assert_eq!(
            transport.send_command(&command, &light()).await,
            Err(MatterError::NotAvailable)
        );
    }

    #[tokio::test]
    async fn test_pair_send_unpair() {
        let (fabric, transport) = transport();
        let mut responses = transport.command_responses();

        assert_eq!(transport.pair_device(&light()).await, Ok(true));
        assert!(transport.is_paired("m1").await);

        let command = ControlCommand::new("m1", CommandType::GetStatus);
        assert_eq!(transport.send_command(&command, &light()).await, Ok(true));
        assert_eq!(fabric.invoke_calls().await, 1);
        assert_eq!(responses.next().await.unwrap().command_id, command.id());

        assert_eq!(transport.unpair_device(&light()).await, Ok(true));
        assert!(!transport.is_paired("m1").await);
        assert!(!fabric.is_commissioned("m1").await);
    }

    #[tokio::test]
    async fn test_property_stream_is_per_device() {
        let (fabric, transport) = transport();
        transport.pair_device(&light()).await.unwrap();
        let mut properties = transport
            .subscribe_to_device_properties(&light())
            .await
            .unwrap();

        let mut other = Map::new();
        other.insert("on".into(), json!(false));
        fabric.report("m2", other);

        let mut mine = Map::new();
        mine.insert("on".into(), json!(true));
        fabric.report("m1", mine.clone());

        assert_eq!(properties.next().await, Some(mine));
    }

    #[tokio::test]
    async fn test_pairing_failure_propagates() {
        let (fabric, transport) = transport();
        fabric.set_commission_failure(true).await;

        assert!(matches!(
            transport.pair_device(&light()).await,
            Err(MatterError::PairingFailed(_))
        ));
        assert!(!transport.is_paired("m1").await);
    }
}
