//! Provisioning from a scanned QR code
//!
//! The code carries `ssid,password[,deviceName]`.

use std::time::Duration;

use tracing::{debug, info};

use super::{CancelSignal, Provisioner};
use crate::core::{
    error::{ProvisioningResult, QrCodeError},
    types::{ProvisioningConfiguration, ProvisioningDevice, ProvisioningMethod},
};

/// Parse QR code text into a provisioning configuration
pub fn parse_qr_code_data(data: &str) -> Result<ProvisioningConfiguration, QrCodeError> {
    let mut fields = data.split(',');
    let (Some(ssid), Some(password)) = (fields.next(), fields.next()) else {
        return Err(QrCodeError::InvalidFormat);
    };
    let device_name = fields.next().map(str::to_string);

    Ok(ProvisioningConfiguration {
        ssid: Some(ssid.to_string()),
        password: Some(password.to_string()),
        ..ProvisioningConfiguration::qr_code(device_name)
    })
}

pub struct QrCodeProvisioner {
    /// Time the device takes to apply the credentials
    apply_delay: Duration,
    cancel: CancelSignal,
}

impl QrCodeProvisioner {
    pub fn new(apply_delay: Duration) -> Self {
        Self {
            apply_delay,
            cancel: CancelSignal::new(),
        }
    }

    pub fn process_qr_code_data(&self, data: &str) -> ProvisioningResult<ProvisioningConfiguration> {
        let config = parse_qr_code_data(data)?;
        debug!(ssid = ?config.ssid, "qr code parsed");
        Ok(config)
    }
}

impl Provisioner for QrCodeProvisioner {
    fn method(&self) -> ProvisioningMethod {
        ProvisioningMethod::QrCode
    }

    fn is_service_available(&self) -> bool {
        true
    }

    async fn start_provisioning(
        &self,
        device: &ProvisioningDevice,
        config: &ProvisioningConfiguration,
    ) -> ProvisioningResult<ProvisioningDevice> {
        let delay = self.apply_delay;
        self.cancel
            .run(config.timeout, async move {
                tokio::time::sleep(delay).await;
                info!(device_id = %device.id, "qr code provisioning finished");
                Ok(device.provisioned(config.device_name.as_deref(), None))
            })
            .await
    }

    async fn cancel_provisioning(&self) {
        debug!("cancelling qr code provisioning");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{error::ProvisioningError, types::ProvisioningDeviceKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_with_and_without_name() {
        let config = parse_qr_code_data("HomeWiFi,secret,Hall Light").unwrap();
        assert_eq!(config.ssid.as_deref(), Some("HomeWiFi"));
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.device_name.as_deref(), Some("Hall Light"));
        assert!(config.encrypted);

        let config = parse_qr_code_data("HomeWiFi,secret").unwrap();
        assert_eq!(config.device_name, None);
    }

    #[test]
    fn test_parse_rejects_single_field() {
        assert_eq!(parse_qr_code_data("HomeWiFi"), Err(QrCodeError::InvalidFormat));
        assert_eq!(parse_qr_code_data(""), Err(QrCodeError::InvalidFormat));
    }

    #[tokio::test]
    async fn test_provisioning_applies_name() {
        let provisioner = QrCodeProvisioner::new(Duration::ZERO);
        let device = ProvisioningDevice::new(
            "q1",
            "Light",
            ProvisioningDeviceKind::SmartLight,
            [ProvisioningMethod::QrCode],
        );
        let config = provisioner
            .process_qr_code_data("HomeWiFi,secret,Hall Light")
            .unwrap();

        let done = provisioner.start_provisioning(&device, &config).await.unwrap();
        assert!(done.is_provisioned);
        assert_eq!(done.name, "Hall Light");
    }

    #[tokio::test]
    async fn test_invalid_code_surfaces_qr_error() {
        let provisioner = QrCodeProvisioner::new(Duration::ZERO);
        assert_eq!(
            provisioner.process_qr_code_data("garbage"),
            Err(ProvisioningError::QrCode(QrCodeError::InvalidFormat))
        );
    }
}
