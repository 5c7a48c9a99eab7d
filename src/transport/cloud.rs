//! Cloud transport
//!
//! Devices managed through a vendor cloud. The endpoint is simulated: every
//! operation succeeds after a configurable latency unless told to fail.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{StreamExt, stream::BoxStream};
use serde_json::Map;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    core::{
        command::{CommandResponse, ControlCommand},
        error::{CloudError, CloudResult},
        types::Device,
    },
    transport::{ControlTransport, bounded},
    util::broadcast_stream,
};

/// Time limits for cloud requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudTimeouts {
    pub connect: Duration,
    pub disconnect: Duration,
    pub send: Duration,
}

impl Default for CloudTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            disconnect: Duration::from_secs(10),
            send: Duration::from_secs(15),
        }
    }
}

pub struct CloudTransport {
    latency: Duration,
    timeouts: CloudTimeouts,
    should_fail: AtomicBool,
    sends: AtomicUsize,
    responses: broadcast::Sender<CommandResponse>,
}

impl CloudTransport {
    pub fn new(latency: Duration, timeouts: CloudTimeouts) -> Arc<Self> {
        let (responses, _) = broadcast::channel(64);
        Arc::new(Self {
            latency,
            timeouts,
            should_fail: AtomicBool::new(false),
            sends: AtomicUsize::new(0),
            responses,
        })
    }

    pub fn set_failure(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    async fn request(&self, limit: Duration, what: &str) -> CloudResult<()> {
        let latency = self.latency;
        let failing = self.should_fail.load(Ordering::SeqCst);
        bounded(limit, CloudError::Timeout, async move {
            tokio::time::sleep(latency).await;
            if failing {
                Err(CloudError::RequestFailed(format!("{what} rejected")))
            } else {
                Ok(())
            }
        })
        .await
    }
}

impl ControlTransport for CloudTransport {
    type Error = CloudError;

    fn is_service_available(&self) -> bool {
        true
    }

    async fn scan_for_devices(&self) -> CloudResult<Vec<Device>> {
        Ok(Vec::new())
    }

    async fn connect(&self, device: &Device) -> CloudResult<bool> {
        self.request(self.timeouts.connect, "connect").await?;
        info!(device_id = %device.id, "cloud device connected");
        Ok(true)
    }

    async fn disconnect(&self, device: &Device) -> CloudResult<bool> {
        self.request(self.timeouts.disconnect, "disconnect").await?;
        info!(device_id = %device.id, "cloud device disconnected");
        Ok(true)
    }

    async fn send_command(&self, command: &ControlCommand, device: &Device) -> CloudResult<bool> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        debug!(device_id = %device.id, command = ?command.command_type(), "cloud command");
        self.request(self.timeouts.send, "command").await?;

        let _ = self
            .responses
            .send(CommandResponse::success(command, Map::new()));
        Ok(true)
    }

    fn command_responses(&self) -> BoxStream<'static, CommandResponse> {
        broadcast_stream(self.responses.subscribe()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        command::CommandType,
        types::{ConnectionType, DeviceKind},
    };

    fn device() -> Device {
        Device::new("c1", "Mower", DeviceKind::LawnMower, ConnectionType::Cloud)
    }

    #[tokio::test]
    async fn test_send_answers_with_success() {
        let cloud = CloudTransport::new(Duration::ZERO, CloudTimeouts::default());
        let mut responses = cloud.command_responses();
        let command = ControlCommand::new("c1", CommandType::ReturnToDock);

        assert_eq!(cloud.send_command(&command, &device()).await, Ok(true));
        assert_eq!(cloud.send_count(), 1);

        let response = responses.next().await.unwrap();
        assert_eq!(response.command_id, command.id());
        assert_eq!(response.status, "success");
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let cloud = CloudTransport::new(Duration::ZERO, CloudTimeouts::default());
        cloud.set_failure(true);

        assert!(matches!(
            cloud.connect(&device()).await,
            Err(CloudError::RequestFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let timeouts = CloudTimeouts {
            send: Duration::from_millis(20),
            ..CloudTimeouts::default()
        };
        let cloud = CloudTransport::new(Duration::from_millis(500), timeouts);
        let command = ControlCommand::new("c1", CommandType::PowerOn);

        assert_eq!(
            cloud.send_command(&command, &device()).await,
            Err(CloudError::Timeout)
        );
    }
}
