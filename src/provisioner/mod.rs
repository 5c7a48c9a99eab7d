//! Per-method provisioning services
//!
//! Each onboarding method hands network credentials to a new device in its
//! own way. The coordinator drives them through [`Provisioner`].

mod bluetooth;
mod qr_code;
mod wifi;

pub use bluetooth::BluetoothProvisioner;
pub use qr_code::{QrCodeProvisioner, parse_qr_code_data};
pub use wifi::{WifiProvisioner, WifiTimeouts};

use std::{future::Future, time::Duration};

use serde::Serialize;
use tokio::sync::watch;
use trait_variant::make;

use crate::core::{
    error::{ProvisioningError, ProvisioningResult},
    types::{ProvisioningConfiguration, ProvisioningDevice, ProvisioningMethod},
};

/// Capabilities shared by every provisioning method
#[make(Send)]
pub trait Provisioner: Send + Sync + 'static {
    fn method(&self) -> ProvisioningMethod;

    fn is_service_available(&self) -> bool;

    /// Hand the configured credentials to `device`
    ///
    /// Bounded by `config.timeout`. Returns the device marked provisioned.
    async fn start_provisioning(
        &self,
        device: &ProvisioningDevice,
        config: &ProvisioningConfiguration,
    ) -> ProvisioningResult<ProvisioningDevice>;

    /// Abort whatever this provisioner is doing; pending calls fail with
    /// [`ProvisioningError::Cancelled`]
    async fn cancel_provisioning(&self);
}

/// Credentials message written to a device
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ssid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_name: Option<&'a str>,
    encrypted: bool,
}

impl<'a> From<&'a ProvisioningConfiguration> for CredentialsPayload<'a> {
    fn from(config: &'a ProvisioningConfiguration) -> Self {
        Self {
            ssid: config.ssid.as_deref(),
            password: config.password.as_deref(),
            device_name: config.device_name.as_deref(),
            encrypted: config.encrypted,
        }
    }
}

/// Cancellation shared by all calls of one provisioner
#[derive(Debug)]
struct CancelSignal(watch::Sender<u64>);

impl CancelSignal {
    fn new() -> Self {
        Self(watch::channel(0).0)
    }

    fn cancel(&self) {
        self.0.send_modify(|generation| *generation += 1);
    }

    /// Run `operation` until it finishes, `limit` passes or a cancel arrives
    async fn run<T>(
        &self,
        limit: Duration,
        operation: impl Future<Output = ProvisioningResult<T>>,
    ) -> ProvisioningResult<T> {
        let mut cancelled = self.0.subscribe();
        tokio::select! {
            biased;
            _ = cancelled.changed() => Err(ProvisioningError::Cancelled),
            result = tokio::time::timeout(limit, operation) => {
                result.unwrap_or(Err(ProvisioningError::Timeout))
            }
        }
    }
}
