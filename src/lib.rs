//! Device Onboarding Service
//!
//! Onboards new devices onto a network and controls provisioned devices over
//! several transports:
//! - Provisioning by Bluetooth, WiFi or QR code, driven by a state machine
//! - Device control over Bluetooth LE, MQTT, Matter and a cloud path
//! - Unix Domain Sockets (JSON-RPC 2.0) as the client interface

pub mod backend;
pub mod config;
pub mod core;
pub mod protocol;
pub mod provisioner;
pub mod server;
pub mod transport;
pub mod util;

pub use core::{
    error::{CommandError, ControlError, ProvisioningError, TransportError},
    state_machine::{ProvisioningState, ProvisioningStateType},
    types::{ConnectionType, Device, DeviceStatus, ProvisioningDevice, ProvisioningMethod},
};
