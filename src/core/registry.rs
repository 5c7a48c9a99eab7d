//! Directory of known devices
//!
//! Command dispatch resolves a command's target here. A device keeps the
//! connection type it was first registered with.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::core::{error::RegistryError, types::Device};

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `device` or refresh the stored copy
    ///
    /// Refreshing with a different connection type is rejected.
    pub async fn register(&self, device: Device) -> Result<(), RegistryError> {
        let mut devices = self.devices.write().await;
        if let Some(existing) = devices.get(&device.id) {
            if existing.connection_type() != device.connection_type() {
                return Err(RegistryError::ConnectionTypeChanged {
                    device_id: device.id,
                    existing: existing.connection_type(),
                });
            }
        }

        debug!(device_id = %device.id, connection_type = ?device.connection_type(), "device registered");
        devices.insert(device.id.clone(), device);
        Ok(())
    }

    pub async fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.read().await.get(device_id).cloned()
    }

    pub async fn remove(&self, device_id: &str) -> Option<Device> {
        self.devices.write().await.remove(device_id)
    }

    /// All devices, ordered by id
    pub async fn all(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }
}
