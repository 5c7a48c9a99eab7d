//! Provisioning over a Bluetooth link

use std::sync::Arc;

use tracing::{debug, info};

use super::{CancelSignal, CredentialsPayload, Provisioner};
use crate::{
    backend::{BluetoothRadio, RadioState},
    core::{
        error::{ProvisioningError, ProvisioningResult},
        types::{ProvisioningConfiguration, ProvisioningDevice, ProvisioningMethod},
    },
    transport::BluetoothTransport,
};

/// MTU asked for before writing credentials
const PREFERRED_MTU: u16 = 512;

pub struct BluetoothProvisioner<R: BluetoothRadio> {
    transport: Arc<BluetoothTransport<R>>,
    cancel: CancelSignal,
}

impl<R: BluetoothRadio> BluetoothProvisioner<R> {
    pub fn new(transport: Arc<BluetoothTransport<R>>) -> Self {
        Self {
            transport,
            cancel: CancelSignal::new(),
        }
    }

    /// Devices advertising during one scan window
    pub async fn scan_for_devices(&self) -> ProvisioningResult<Vec<ProvisioningDevice>> {
        Ok(self.transport.scan_for_provisioning_devices().await?)
    }

    pub async fn connect(&self, device: &ProvisioningDevice) -> ProvisioningResult<bool> {
        Ok(self.transport.connect_peripheral(&device.id).await?)
    }

    pub async fn disconnect(&self, device: &ProvisioningDevice) -> ProvisioningResult<bool> {
        Ok(self.transport.disconnect_peripheral(&device.id).await?)
    }
}

impl<R: BluetoothRadio> Provisioner for BluetoothProvisioner<R> {
    fn method(&self) -> ProvisioningMethod {
        ProvisioningMethod::Bluetooth
    }

    fn is_service_available(&self) -> bool {
        self.transport.radio_state() == RadioState::PoweredOn
    }

    async fn start_provisioning(
        &self,
        device: &ProvisioningDevice,
        config: &ProvisioningConfiguration,
    ) -> ProvisioningResult<ProvisioningDevice> {
        let payload = serde_json::to_vec(&CredentialsPayload::from(config))
            .map_err(|e| ProvisioningError::Failed(e.to_string()))?;

        self.cancel
            .run(config.timeout, async {
                if !self.transport.is_connected(&device.id).await {
                    self.transport.connect_peripheral(&device.id).await?;
                }

                let mtu = self
                    .transport
                    .request_mtu(&device.id, PREFERRED_MTU)
                    .await?;
                debug!(device_id = %device.id, mtu, len = payload.len(), "writing credentials");
                self.transport.write(&device.id, &payload).await?;

                info!(device_id = %device.id, "bluetooth provisioning finished");
                Ok(device.provisioned(config.device_name.as_deref(), None))
            })
            .await
    }

    async fn cancel_provisioning(&self) {
        debug!("cancelling bluetooth provisioning");
        self.cancel.cancel();
        self.transport.cancel().await;
    }
}
