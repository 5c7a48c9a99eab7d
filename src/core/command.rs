//! Control commands and device responses

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Command kinds understood by controllable devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    PowerOn,
    PowerOff,
    Reset,
    MoveTo,
    StartCleaning,
    PauseCleaning,
    ReturnToDock,
    GetStatus,
    GetBatteryLevel,
    GetSchedule,
    SetSchedule,
    SetCleaningMode,
    SetVolume,
    #[serde(rename = "start_ota")]
    StartOta,
    #[serde(rename = "cancel_ota")]
    CancelOta,
    MatterIdentify,
    MatterReadAttribute,
    MatterWriteAttribute,
    MatterInvokeCommand,
}

impl CommandType {
    /// Matter-only command variants
    pub fn is_matter_specific(self) -> bool {
        matches!(
            self,
            CommandType::MatterIdentify
                | CommandType::MatterReadAttribute
                | CommandType::MatterWriteAttribute
                | CommandType::MatterInvokeCommand
        )
    }
}

/// A single command addressed to one device
///
/// Immutable after construction. Every construction draws a fresh id, so a
/// retry is a new command rather than a resend of the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    id: Uuid,
    device_id: String,
    #[serde(rename = "type")]
    command_type: CommandType,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    parameters: Map<String, Value>,
    /// Milliseconds since the Unix epoch
    timestamp: u64,
    requires_acknowledgment: bool,
}

impl ControlCommand {
    pub fn new(device_id: impl Into<String>, command_type: CommandType) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            command_type,
            parameters: Map::new(),
            timestamp: now_millis(),
            requires_acknowledgment: true,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn without_acknowledgment(mut self) -> Self {
        self.requires_acknowledgment = false;
        self
    }

    /// Same target, type and parameters under a new id
    pub fn retry(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now_millis(),
            ..self.clone()
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn requires_acknowledgment(&self) -> bool {
        self.requires_acknowledgment
    }

    /// JSON wire form published to devices
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&CommandPayload::from(self))
    }
}

/// Wire shape of a command as seen by devices
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub command_id: Uuid,
    pub device_id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    pub timestamp: u64,
}

impl From<&ControlCommand> for CommandPayload {
    fn from(command: &ControlCommand) -> Self {
        Self {
            command_id: command.id,
            device_id: command.device_id.clone(),
            command_type: command.command_type,
            parameters: command.parameters.clone(),
            timestamp: command.timestamp,
        }
    }
}

/// A device's answer to a command, correlated by `command_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub command_id: Uuid,
    pub device_id: String,
    pub status: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl CommandResponse {
    pub fn success(command: &ControlCommand, data: Map<String, Value>) -> Self {
        Self {
            command_id: command.id(),
            device_id: command.device_id().to_string(),
            status: "success".to_string(),
            data,
        }
    }

    /// Flattened key/value view handed to callers waiting on a response
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("commandId".into(), Value::String(self.command_id.to_string()));
        map.insert("deviceId".into(), Value::String(self.device_id));
        map.insert("status".into(), Value::String(self.status));
        map.insert("data".into(), Value::Object(self.data));
        map
    }

    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_commands_get_fresh_ids() {
        let a = ControlCommand::new("d1", CommandType::PowerOn);
        let b = ControlCommand::new("d1", CommandType::PowerOn);
        assert_ne!(a.id(), b.id());

        let retried = a.retry();
        assert_ne!(retried.id(), a.id());
        assert_eq!(retried.device_id(), "d1");
        assert_eq!(retried.command_type(), CommandType::PowerOn);
    }

    #[test]
    fn test_payload_shape() {
        let command = ControlCommand::new("d1", CommandType::MoveTo)
            .with_parameter("x", 3)
            .with_parameter("y", 4.5);
        let payload: Value = serde_json::from_str(&command.to_payload().unwrap()).unwrap();

        assert_eq!(payload["commandId"], json!(command.id().to_string()));
        assert_eq!(payload["deviceId"], json!("d1"));
        assert_eq!(payload["type"], json!("move_to"));
        assert_eq!(payload["parameters"]["y"], json!(4.5));
    }

    #[test]
    fn test_ota_command_names() {
        assert_eq!(
            serde_json::to_string(&CommandType::StartOta).unwrap(),
            r#""start_ota""#
        );
        assert!(CommandType::MatterIdentify.is_matter_specific());
        assert!(!CommandType::GetStatus.is_matter_specific());
    }

    #[test]
    fn test_response_parsing() {
        let command = ControlCommand::new("d1", CommandType::GetStatus);
        let raw = json!({
            "commandId": command.id(),
            "deviceId": "d1",
            "status": "success",
            "data": {"status": "working"}
        });
        let response = CommandResponse::from_payload(raw.to_string().as_bytes()).unwrap();
        assert_eq!(response.command_id, command.id());

        let map = response.into_map();
        assert_eq!(map["data"]["status"], json!("working"));
        assert!(CommandResponse::from_payload(b"not json").is_none());
    }
}
