//! Matter controller boundary

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use trait_variant::make;

use crate::core::{command::ControlCommand, error::MatterResult, types::Device};

/// Attribute report pushed by a commissioned node
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyReport {
    pub device_id: String,
    pub properties: Map<String, Value>,
}

/// Abstraction over the platform Matter stack
#[make(Send)]
pub trait MatterFabric: Send + Sync + 'static {
    /// Whether the Matter stack is present on this host
    fn is_available(&self) -> bool;

    /// Find commissionable nodes nearby
    async fn discover(&self) -> MatterResult<Vec<Device>>;

    /// Add the node to the local fabric
    async fn commission(&self, device_id: &str) -> MatterResult<()>;

    /// Remove the node from the local fabric
    async fn decommission(&self, device_id: &str) -> MatterResult<()>;

    /// Invoke a command and return the node's response fields
    async fn invoke(
        &self,
        device_id: &str,
        command: &ControlCommand,
    ) -> MatterResult<Map<String, Value>>;

    /// Subscribe to attribute reports from all commissioned nodes
    fn property_reports(&self) -> broadcast::Receiver<PropertyReport>;
}
