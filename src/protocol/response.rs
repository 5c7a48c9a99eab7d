//! Response message types

use serde::Serialize;

use crate::core::{control::ControlView, provisioning::ProvisioningView, types::ProvisioningDevice};

/// Response messages from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Provisioning(ProvisioningResponse),
    Control(ControlResponse),
}

/// Answer to any `provisioning.*` request: the session after the call
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningResponse {
    pub status: String,
    /// The device as returned by a successful `provisioning.provision`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioned: Option<ProvisioningDevice>,
    pub session: ProvisioningView,
}

/// Answer to any `control.*` request
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    pub status: String,
    /// Transport verdict of `control.connect` / `control.disconnect`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    pub control: ControlView,
}

impl ProvisioningResponse {
    pub fn ok(session: ProvisioningView) -> Self {
        Self {
            status: "ok".to_string(),
            provisioned: None,
            session,
        }
    }

    pub fn provisioned(device: ProvisioningDevice, session: ProvisioningView) -> Self {
        Self {
            provisioned: Some(device),
            ..Self::ok(session)
        }
    }
}

impl ControlResponse {
    pub fn ok(control: ControlView) -> Self {
        Self {
            status: "ok".to_string(),
            accepted: None,
            control,
        }
    }

    pub fn with_accepted(mut self, accepted: bool) -> Self {
        self.accepted = Some(accepted);
        self
    }
}

impl From<ProvisioningResponse> for Response {
    fn from(response: ProvisioningResponse) -> Self {
        Response::Provisioning(response)
    }
}

impl From<ControlResponse> for Response {
    fn from(response: ControlResponse) -> Self {
        Response::Control(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProvisioningConfiguration;
    use serde_json::{Value, json};

    #[test]
    fn test_control_response_shape() {
        let response = Response::from(ControlResponse::ok(ControlView::default()).with_accepted(true));
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "ok");
        assert_eq!(json["accepted"], true);
        assert_eq!(json["control"]["device_status"], "unknown");
        assert_eq!(json["control"]["current_device"], Value::Null);
    }

    #[test]
    fn test_provisioning_response_hides_password() {
        let mut session = ProvisioningView::new(ProvisioningConfiguration::default());
        session.configuration.password = Some("secret".into());
        let json = serde_json::to_value(Response::from(ProvisioningResponse::ok(session))).unwrap();

        assert_eq!(json["session"]["state"]["type"], "idle");
        assert!(json["session"]["configuration"].get("password").is_none());
        assert!(json.get("provisioned").is_none());
        assert_eq!(json["session"]["configuration"]["timeout"], json!(60.0));
    }
}
