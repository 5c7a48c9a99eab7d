//! Notification message types (server-to-client events)

use std::collections::HashMap;

use serde::Serialize;

use crate::core::{control::ControlView, provisioning::ProvisioningView, types::DeviceStatus};

/// Server-to-client notifications
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum Notification {
    /// The provisioning session changed
    #[serde(rename = "provisioning.changed")]
    ProvisioningChanged(ProvisioningView),

    /// The device control view changed
    #[serde(rename = "control.changed")]
    ControlChanged(ControlView),

    /// Last known status of every device
    #[serde(rename = "devices.status_changed")]
    DeviceStatusChanged(DeviceStatusChangedParams),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeviceStatusChangedParams {
    pub statuses: HashMap<String, DeviceStatus>,
}
