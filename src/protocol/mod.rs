//! Protocol message definitions

pub mod jsonrpc;
pub mod notification;
pub mod request;
pub mod response;

pub use {
    jsonrpc::{
        JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
        parse_request,
    },
    notification::{DeviceStatusChangedParams, Notification},
    request::{
        QrCodeParams, Request, SelectDeviceParams, SelectMethodParams, SelectNetworkParams,
        SendCommandParams, SetCurrentDeviceParams,
    },
    response::{ControlResponse, ProvisioningResponse, Response},
};
