//! JSON-RPC 2.0 message envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    core::error::{
        BluetoothError, CloudError, CommandError, ControlError, MatterError, MqttError,
        ProvisioningError, RegistryError, TransportError,
    },
    protocol::{notification::Notification, request::Request, response::Response},
};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub request: Request,
    pub id: RequestId,
}

/// JSON-RPC 2.0 response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: RequestId,
}

/// JSON-RPC 2.0 notification wrapper
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    #[serde(flatten)]
    pub notification: Notification,
}

/// Request ID (number or string); null when the request could not be read
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC error codes
impl JsonRpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Custom error codes
    pub const INVALID_STATE: i32 = -32002;
    pub const TRANSPORT_ERROR: i32 = -32003;
    pub const TIMEOUT: i32 = -32004;
    pub const DEVICE_NOT_CONNECTED: i32 = -32005;
    pub const COMMAND_REJECTED: i32 = -32006;
    pub const CANCELLED: i32 = -32007;
    pub const UNKNOWN_DEVICE: i32 = -32008;

    fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::with_code(Self::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_code(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found() -> Self {
        Self::with_code(Self::METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_code(Self::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_code(Self::INTERNAL_ERROR, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::with_code(Self::INVALID_STATE, message)
    }

    pub fn transport_error(message: impl Into<String>) -> Self {
        Self::with_code(Self::TRANSPORT_ERROR, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_code(Self::TIMEOUT, message)
    }
}

fn transport_code(error: &TransportError) -> i32 {
    match error {
        TransportError::Bluetooth(
            BluetoothError::ConnectionTimeout
            | BluetoothError::DisconnectionTimeout
            | BluetoothError::CommandTimeout,
        )
        | TransportError::Mqtt(MqttError::Timeout)
        | TransportError::Matter(MatterError::Timeout)
        | TransportError::Cloud(CloudError::Timeout) => JsonRpcError::TIMEOUT,
        TransportError::Bluetooth(BluetoothError::Cancelled) => JsonRpcError::CANCELLED,
        _ => JsonRpcError::TRANSPORT_ERROR,
    }
}

impl From<&ProvisioningError> for JsonRpcError {
    fn from(error: &ProvisioningError) -> Self {
        let code = match error {
            ProvisioningError::NoMethodSelected
            | ProvisioningError::NoDeviceSelected
            | ProvisioningError::MissingWifiCredentials
            | ProvisioningError::RetryLimitExceeded(_) => Self::INVALID_STATE,
            ProvisioningError::QrCode(_) => Self::INVALID_PARAMS,
            ProvisioningError::Timeout => Self::TIMEOUT,
            ProvisioningError::Cancelled => Self::CANCELLED,
            ProvisioningError::Bluetooth(e) => transport_code(&TransportError::Bluetooth(e.clone())),
            ProvisioningError::ConnectionFailed
            | ProvisioningError::Failed(_)
            | ProvisioningError::Wifi(_) => Self::TRANSPORT_ERROR,
        };
        Self::with_code(code, error.to_string())
    }
}

impl From<&CommandError> for JsonRpcError {
    fn from(error: &CommandError) -> Self {
        let code = match error {
            CommandError::DeviceNotConnected => Self::DEVICE_NOT_CONNECTED,
            CommandError::UnknownDevice(_) => Self::UNKNOWN_DEVICE,
            CommandError::ResponseTimeout | CommandError::BatchTimeout => Self::TIMEOUT,
            CommandError::Cancelled => Self::CANCELLED,
            CommandError::Rejected => Self::COMMAND_REJECTED,
            CommandError::Encoding(_) => Self::INTERNAL_ERROR,
            CommandError::Transport(e) => transport_code(e),
        };
        Self::with_code(code, error.to_string())
    }
}

impl From<&ControlError> for JsonRpcError {
    fn from(error: &ControlError) -> Self {
        match error {
            ControlError::NoDeviceSelected => Self::invalid_state(error.to_string()),
            ControlError::CommandRejected => Self::with_code(Self::COMMAND_REJECTED, error.to_string()),
            ControlError::Command(e) => e.into(),
            ControlError::Transport(e) => Self::with_code(transport_code(e), e.to_string()),
            ControlError::Registry(RegistryError::ConnectionTypeChanged { .. }) => {
                Self::invalid_params(error.to_string())
            }
        }
    }
}

impl JsonRpcRequest {
    pub fn new(request: Request, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            request,
            id,
        }
    }
}

impl JsonRpcResponse {
    pub fn success(result: impl Into<Response>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result.into()),
            error: None,
            id,
        }
    }

    pub fn error(error: JsonRpcError, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

impl JsonRpcNotification {
    pub fn new(notification: Notification) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            notification,
        }
    }
}

/// Decode one request line, or produce the error response to send instead
pub fn parse_request(line: &str) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let value: Value = serde_json::from_str(line)
        .map_err(|_| JsonRpcResponse::error(JsonRpcError::parse_error(), RequestId::Null))?;

    let id = value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value(id).ok())
        .unwrap_or(RequestId::Null);
    let reject = |error: JsonRpcError| JsonRpcResponse::error(error, id.clone());

    if value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(reject(JsonRpcError::invalid_request(
            "jsonrpc version must be \"2.0\"",
        )));
    }
    if value.get("id").is_none() {
        return Err(reject(JsonRpcError::invalid_request("missing request id")));
    }
    let Some(method) = value.get("method").and_then(Value::as_str) else {
        return Err(reject(JsonRpcError::invalid_request("missing method")));
    };
    if !Request::METHODS.contains(&method) {
        return Err(reject(JsonRpcError::method_not_found()));
    }

    serde_json::from_value(value).map_err(|e| reject(JsonRpcError::invalid_params(e.to_string())))
}
