//! WiFi backend trait definition

use trait_variant::make;

use crate::core::error::WifiResult;
use crate::core::types::NetworkInfo;

/// Abstraction over the host WiFi interface used for SoftAP provisioning
///
/// The device under provisioning opens its own access point; the service
/// joins it, hands over the target credentials and leaves again.
#[make(Send)]
pub trait WifiBackend: Send + Sync + 'static {
    /// Scan for available WiFi networks
    ///
    /// The scan operation may take several seconds.
    async fn scan(&self) -> WifiResult<Vec<NetworkInfo>>;

    /// Join a network with its passphrase
    async fn connect(&self, ssid: &str, password: &str) -> WifiResult<()>;

    /// Leave the current network
    async fn disconnect(&self) -> WifiResult<()>;

    /// Hand the target network credentials to the joined device
    ///
    /// Returns the IP address the device obtained on the target network.
    async fn deliver_credentials(
        &self,
        ssid: &str,
        password: &str,
        device_name: Option<&str>,
    ) -> WifiResult<String>;
}
