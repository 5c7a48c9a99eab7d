//! Runtime settings

use std::time::Duration;

use tracing::warn;

use crate::{
    config::CliArgs,
    core::{dispatch::DispatchTimeouts, types::ProvisioningConfiguration},
    transport::{BluetoothTimeouts, TransportSettings},
};

const DEFAULT_SOCKET_MODE: u32 = 0o660;

/// Runtime configuration settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub socket_path: String,
    pub socket_mode: u32,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub bluetooth: BluetoothTimeouts,
    pub response_timeout: Duration,
    pub batch_timeout: Duration,
    pub cloud_latency: Duration,
    pub provisioning_timeout: Duration,
    pub max_retries: u32,
    pub qr_apply_delay: Duration,
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        // Parse octal socket mode
        let socket_mode = u32::from_str_radix(&args.socket_mode, 8).unwrap_or_else(|_| {
            warn!(
                mode = %args.socket_mode,
                "invalid socket mode, using {:o}", DEFAULT_SOCKET_MODE
            );
            DEFAULT_SOCKET_MODE
        });

        Settings {
            socket_path: args.socket_path,
            socket_mode,
            mqtt_host: args.mqtt_host,
            mqtt_port: args.mqtt_port,
            mqtt_client_id: args.mqtt_client_id,
            bluetooth: BluetoothTimeouts {
                scan_window: Duration::from_secs(args.bluetooth_scan_secs),
                connect: Duration::from_secs(args.bluetooth_connect_secs),
                disconnect: Duration::from_secs(args.bluetooth_disconnect_secs),
                command: Duration::from_secs(args.bluetooth_command_secs),
            },
            response_timeout: Duration::from_secs(args.response_timeout_secs),
            batch_timeout: Duration::from_secs(args.batch_timeout_secs),
            cloud_latency: Duration::from_millis(args.cloud_latency_ms),
            provisioning_timeout: Duration::from_secs(args.provisioning_timeout_secs),
            max_retries: args.max_retries,
            qr_apply_delay: Duration::from_millis(args.qr_apply_delay_ms),
        }
    }
}

impl Settings {
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            bluetooth: self.bluetooth,
            cloud_latency: self.cloud_latency,
            ..TransportSettings::default()
        }
    }

    pub fn dispatch_timeouts(&self) -> DispatchTimeouts {
        DispatchTimeouts {
            response: self.response_timeout,
            batch: self.batch_timeout,
        }
    }

    /// Configuration a provisioning session starts with
    pub fn default_configuration(&self) -> ProvisioningConfiguration {
        ProvisioningConfiguration {
            timeout: self.provisioning_timeout,
            max_retries: self.max_retries,
            ..ProvisioningConfiguration::default()
        }
    }
}
