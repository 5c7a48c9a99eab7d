//! Command-line argument parsing

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[clap(name = "device-onboarding-service", version, author)]
#[clap(about = "Device provisioning and multi-transport device control over a Unix socket")]
pub struct CliArgs {
    /// Path for Unix socket
    #[clap(long, default_value = "/run/device-onboarding.sock")]
    pub socket_path: String,

    /// Socket file permissions (octal, e.g., 660)
    #[clap(long, default_value = "660")]
    pub socket_mode: String,

    /// MQTT broker host
    #[clap(long, default_value = "localhost")]
    pub mqtt_host: String,

    /// MQTT broker port
    #[clap(long, default_value = "1883")]
    pub mqtt_port: u16,

    /// MQTT client identifier
    #[clap(long, default_value = "device-onboarding-service")]
    pub mqtt_client_id: String,

    /// Bluetooth scan window in seconds
    #[clap(long, default_value = "30")]
    pub bluetooth_scan_secs: u64,

    /// Bluetooth connect timeout in seconds
    #[clap(long, default_value = "30")]
    pub bluetooth_connect_secs: u64,

    /// Bluetooth disconnect timeout in seconds
    #[clap(long, default_value = "10")]
    pub bluetooth_disconnect_secs: u64,

    /// Bluetooth write and MTU timeout in seconds
    #[clap(long, default_value = "10")]
    pub bluetooth_command_secs: u64,

    /// How long to wait for a device to answer a command, in seconds
    #[clap(long, default_value = "30")]
    pub response_timeout_secs: u64,

    /// Upper bound for a command batch, in seconds
    #[clap(long, default_value = "60")]
    pub batch_timeout_secs: u64,

    /// Simulated cloud round trip in milliseconds
    #[clap(long, default_value = "500")]
    pub cloud_latency_ms: u64,

    /// Default provisioning timeout in seconds
    #[clap(long, default_value = "60")]
    pub provisioning_timeout_secs: u64,

    /// Retries allowed after a failed provisioning attempt
    #[clap(long, default_value = "3")]
    pub max_retries: u32,

    /// Delay before scanned QR credentials count as applied, in milliseconds
    #[clap(long, default_value = "2500")]
    pub qr_apply_delay_ms: u64,
}
