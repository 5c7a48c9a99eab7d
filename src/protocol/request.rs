//! Request message types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{
    command::CommandType,
    types::{Device, NetworkInfo, ProvisioningConfiguration, ProvisioningDevice, ProvisioningMethod},
};

/// Request messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    #[serde(rename = "provisioning.start")]
    StartProvisioning,

    /// Select a method; Bluetooth and WiFi also start a scan
    #[serde(rename = "provisioning.select_method")]
    SelectMethod(SelectMethodParams),

    #[serde(rename = "provisioning.scan_devices")]
    ScanDevices,

    #[serde(rename = "provisioning.scan_networks")]
    ScanNetworks,

    #[serde(rename = "provisioning.select_device")]
    SelectDevice(SelectDeviceParams),

    #[serde(rename = "provisioning.select_network")]
    SelectNetwork(SelectNetworkParams),

    #[serde(rename = "provisioning.process_qr_code")]
    ProcessQrCode(QrCodeParams),

    #[serde(rename = "provisioning.connect")]
    ConnectToDevice,

    #[serde(rename = "provisioning.provision")]
    Provision,

    #[serde(rename = "provisioning.retry")]
    Retry,

    #[serde(rename = "provisioning.cancel")]
    Cancel,

    #[serde(rename = "provisioning.finish")]
    Finish,

    #[serde(rename = "provisioning.update_configuration")]
    UpdateConfiguration(ProvisioningConfiguration),

    #[serde(rename = "provisioning.reset")]
    Reset,

    #[serde(rename = "provisioning.state")]
    ProvisioningState,

    #[serde(rename = "control.set_current_device")]
    SetCurrentDevice(SetCurrentDeviceParams),

    #[serde(rename = "control.connect")]
    ConnectDevice,

    #[serde(rename = "control.disconnect")]
    DisconnectDevice,

    #[serde(rename = "control.send_command")]
    SendCommand(SendCommandParams),

    #[serde(rename = "control.scan")]
    ScanControllable,

    #[serde(rename = "control.refresh_status")]
    RefreshStatus,

    #[serde(rename = "control.state")]
    ControlState,
}

impl Request {
    /// Every method name the server understands
    pub const METHODS: &[&str] = &[
        "provisioning.start",
        "provisioning.select_method",
        "provisioning.scan_devices",
        "provisioning.scan_networks",
        "provisioning.select_device",
        "provisioning.select_network",
        "provisioning.process_qr_code",
        "provisioning.connect",
        "provisioning.provision",
        "provisioning.retry",
        "provisioning.cancel",
        "provisioning.finish",
        "provisioning.update_configuration",
        "provisioning.reset",
        "provisioning.state",
        "control.set_current_device",
        "control.connect",
        "control.disconnect",
        "control.send_command",
        "control.scan",
        "control.refresh_status",
        "control.state",
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectMethodParams {
    pub method: ProvisioningMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectDeviceParams {
    pub device: ProvisioningDevice,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectNetworkParams {
    pub network: NetworkInfo,
}

/// Raw text of a scanned code, `ssid,password[,deviceName]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QrCodeParams {
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetCurrentDeviceParams {
    pub device: Device,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendCommandParams {
    pub command: CommandType,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ConnectionType, DeviceKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unit_request_serialization() {
        let json = serde_json::to_string(&Request::StartProvisioning).unwrap();
        assert_eq!(json, r#"{"method":"provisioning.start"}"#);

        let request: Request = serde_json::from_str(r#"{"method":"control.refresh_status"}"#).unwrap();
        assert_eq!(request, Request::RefreshStatus);
    }

    #[test]
    fn test_select_method() {
        let request: Request = serde_json::from_str(
            r#"{"method":"provisioning.select_method","params":{"method":"qr_code"}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            Request::SelectMethod(SelectMethodParams {
                method: ProvisioningMethod::QrCode
            })
        );
    }

    #[test]
    fn test_set_current_device_fills_defaults() {
        let request: Request = serde_json::from_str(
            r#"{"method":"control.set_current_device","params":{"device":
                {"id":"d1","name":"Bot","type":"vacuum_cleaner","connection_type":"mqtt"}}}"#,
        )
        .unwrap();

        let Request::SetCurrentDevice(params) = request else {
            panic!("wrong variant");
        };
        assert_eq!(
            params.device,
            Device::new("d1", "Bot", DeviceKind::VacuumCleaner, ConnectionType::Mqtt)
        );
    }

    #[test]
    fn test_send_command_parameters_are_optional() {
        let request: Request = serde_json::from_str(
            r#"{"method":"control.send_command","params":{"command":"start_cleaning"}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            Request::SendCommand(SendCommandParams {
                command: CommandType::StartCleaning,
                parameters: Map::new(),
            })
        );
    }

    #[test]
    fn test_update_configuration_accepts_password() {
        let request: Request = serde_json::from_str(
            r#"{"method":"provisioning.update_configuration",
                "params":{"ssid":"Home","password":"pw","timeout":90}}"#,
        )
        .unwrap();

        let Request::UpdateConfiguration(config) = request else {
            panic!("wrong variant");
        };
        assert_eq!(config.password.as_deref(), Some("pw"));
        assert_eq!(config.timeout.as_secs(), 90);
    }

    #[test]
    fn test_method_list_matches_variants() {
        let unit = [
            Request::StartProvisioning,
            Request::ScanDevices,
            Request::ScanNetworks,
            Request::ConnectToDevice,
            Request::Provision,
            Request::Retry,
            Request::Cancel,
            Request::Finish,
            Request::Reset,
            Request::ProvisioningState,
            Request::ConnectDevice,
            Request::DisconnectDevice,
            Request::ScanControllable,
            Request::RefreshStatus,
            Request::ControlState,
        ];
        for request in unit {
            let json = serde_json::to_value(&request).unwrap();
            let method = json["method"].as_str().unwrap();
            assert!(Request::METHODS.contains(&method), "{method} missing");
        }
        assert_eq!(Request::METHODS.len(), 22);
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"method":"provisioning.launch"}"#).is_err());
    }
}
