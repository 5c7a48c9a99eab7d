//! JSON-RPC request handler

use std::sync::Arc;

use crate::{
    backend::Backends,
    core::{
        control::DeviceController, error::ProvisioningError, provisioning::ProvisioningCoordinator,
        types::ProvisioningMethod,
    },
    protocol::{
        ControlResponse, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ProvisioningResponse,
        Request, RequestId,
    },
};

/// Routes `provisioning.*` requests to the coordinator and `control.*`
/// requests to the device controller
pub struct RequestHandler<B: Backends> {
    provisioning: Arc<ProvisioningCoordinator<B>>,
    control: Arc<DeviceController<B>>,
}

impl<B: Backends> RequestHandler<B> {
    pub fn new(
        provisioning: Arc<ProvisioningCoordinator<B>>,
        control: Arc<DeviceController<B>>,
    ) -> Self {
        Self {
            provisioning,
            control,
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        match request.request {
            Request::StartProvisioning => {
                self.provisioning.start_provisioning().await;
                self.session(id)
            }
            Request::SelectMethod(params) => {
                let result = match params.method {
                    ProvisioningMethod::Bluetooth => self
                        .provisioning
                        .select_bluetooth_method()
                        .await
                        .map(drop),
                    ProvisioningMethod::Wifi => {
                        self.provisioning.select_wifi_method().await.map(drop)
                    }
                    ProvisioningMethod::QrCode => {
                        self.provisioning.select_qr_code_method().await;
                        Ok(())
                    }
                };
                self.provisioning_result(result, id)
            }
            Request::ScanDevices => {
                let result = self.provisioning.scan_for_bluetooth_devices().await;
                self.provisioning_result(result.map(drop), id)
            }
            Request::ScanNetworks => {
                let result = self.provisioning.scan_for_wifi_networks().await;
                self.provisioning_result(result.map(drop), id)
            }
            Request::SelectDevice(params) => {
                self.provisioning.select_device(params.device).await;
                self.session(id)
            }
            Request::SelectNetwork(params) => {
                self.provisioning.select_network(params.network).await;
                self.session(id)
            }
            Request::ProcessQrCode(params) => {
                let result = self.provisioning.process_qr_code_data(&params.data).await;
                self.provisioning_result(result.map(drop), id)
            }
            Request::ConnectToDevice => {
                let result = self.provisioning.connect_to_device().await;
                self.provisioning_result(result.map(drop), id)
            }
            Request::Provision => match self.provisioning.provision_device().await {
                Ok(device) => JsonRpcResponse::success(
                    ProvisioningResponse::provisioned(device, self.provisioning.snapshot()),
                    id,
                ),
                Err(e) => JsonRpcResponse::error(JsonRpcError::from(&e), id),
            },
            Request::Retry => {
                let result = self.provisioning.retry_provisioning().await;
                self.provisioning_result(result.map(drop), id)
            }
            Request::Cancel => {
                self.provisioning.cancel_provisioning().await;
                self.session(id)
            }
            Request::Finish => {
                self.provisioning.finish_provisioning().await;
                self.session(id)
            }
            Request::UpdateConfiguration(configuration) => {
                self.provisioning.update_configuration(configuration);
                self.session(id)
            }
            Request::Reset => {
                self.provisioning.reset().await;
                self.session(id)
            }
            Request::ProvisioningState => self.session(id),

            Request::SetCurrentDevice(params) => {
                match self.control.set_current_device(params.device).await {
                    Ok(()) => self.control_view(id),
                    Err(e) => JsonRpcResponse::error(JsonRpcError::from(&e), id),
                }
            }
            Request::ConnectDevice => match self.control.connect_to_device().await {
                Ok(connected) => JsonRpcResponse::success(
                    ControlResponse::ok(self.control.snapshot()).with_accepted(connected),
                    id,
                ),
                Err(e) => JsonRpcResponse::error(JsonRpcError::from(&e), id),
            },
            Request::DisconnectDevice => match self.control.disconnect_device().await {
                Ok(disconnected) => JsonRpcResponse::success(
                    ControlResponse::ok(self.control.snapshot()).with_accepted(disconnected),
                    id,
                ),
                Err(e) => JsonRpcResponse::error(JsonRpcError::from(&e), id),
            },
            Request::SendCommand(params) => {
                match self
                    .control
                    .send_command(params.command, params.parameters)
                    .await
                {
                    Ok(()) => self.control_view(id),
                    Err(e) => JsonRpcResponse::error(JsonRpcError::from(&e), id),
                }
            }
            Request::ScanControllable => match self.control.scan_for_devices().await {
                Ok(_) => self.control_view(id),
                Err(e) => JsonRpcResponse::error(JsonRpcError::from(&e), id),
            },
            Request::RefreshStatus => match self.control.refresh_device_status().await {
                Ok(_) => self.control_view(id),
                Err(e) => JsonRpcResponse::error(JsonRpcError::from(&e), id),
            },
            Request::ControlState => self.control_view(id),
        }
    }

    fn session(&self, id: RequestId) -> JsonRpcResponse {
        JsonRpcResponse::success(ProvisioningResponse::ok(self.provisioning.snapshot()), id)
    }

    fn provisioning_result(
        &self,
        result: Result<(), ProvisioningError>,
        id: RequestId,
    ) -> JsonRpcResponse {
        match result {
            Ok(()) => self.session(id),
            Err(e) => JsonRpcResponse::error(JsonRpcError::from(&e), id),
        }
    }

    fn control_view(&self, id: RequestId) -> JsonRpcResponse {
        JsonRpcResponse::success(ControlResponse::ok(self.control.snapshot()), id)
    }
}
