//! Provisioning over WiFi
//!
//! The service joins the network named in the configuration, hands the
//! credentials to the device and reports the address the device obtained.

use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use super::{CancelSignal, Provisioner};
use crate::{
    backend::WifiBackend,
    core::{
        error::{ProvisioningError, ProvisioningResult},
        types::{NetworkInfo, ProvisioningConfiguration, ProvisioningDevice, ProvisioningMethod},
    },
};

/// Time limits for WiFi operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifiTimeouts {
    pub scan: Duration,
    pub connect: Duration,
}

impl Default for WifiTimeouts {
    fn default() -> Self {
        Self {
            scan: Duration::from_secs(30),
            connect: Duration::from_secs(30),
        }
    }
}

pub struct WifiProvisioner<W: WifiBackend> {
    backend: Arc<W>,
    timeouts: WifiTimeouts,
    cancel: CancelSignal,
}

impl<W: WifiBackend> WifiProvisioner<W> {
    pub fn new(backend: Arc<W>, timeouts: WifiTimeouts) -> Self {
        Self {
            backend,
            timeouts,
            cancel: CancelSignal::new(),
        }
    }

    pub async fn scan_for_networks(&self) -> ProvisioningResult<Vec<NetworkInfo>> {
        let networks = self
            .cancel
            .run(self.timeouts.scan, async { Ok(self.backend.scan().await?) })
            .await?;
        info!(count = networks.len(), "wifi scan finished");
        Ok(networks)
    }

    pub async fn connect(&self, network: &NetworkInfo, password: &str) -> ProvisioningResult<bool> {
        debug!(ssid = %network.ssid, "joining network");
        self.cancel
            .run(self.timeouts.connect, async {
                self.backend.connect(&network.ssid, password).await?;
                Ok(true)
            })
            .await
    }
}

impl<W: WifiBackend> Provisioner for WifiProvisioner<W> {
    fn method(&self) -> ProvisioningMethod {
        ProvisioningMethod::Wifi
    }

    fn is_service_available(&self) -> bool {
        true
    }

    async fn start_provisioning(
        &self,
        device: &ProvisioningDevice,
        config: &ProvisioningConfiguration,
    ) -> ProvisioningResult<ProvisioningDevice> {
        let (Some(ssid), Some(password)) = (config.ssid.as_deref(), config.password.as_deref())
        else {
            return Err(ProvisioningError::MissingWifiCredentials);
        };

        self.cancel
            .run(config.timeout, async {
                let ip_address = self
                    .backend
                    .deliver_credentials(ssid, password, config.device_name.as_deref())
                    .await?;
                info!(device_id = %device.id, %ip_address, "wifi provisioning finished");
                Ok(device.provisioned(config.device_name.as_deref(), Some(ip_address)))
            })
            .await
    }

    async fn cancel_provisioning(&self) {
        debug!("cancelling wifi provisioning");
        self.cancel.cancel();
        if let Err(e) = self.backend.disconnect().await {
            warn!(error = %e, "leaving network after cancel failed");
        }
    }
}
