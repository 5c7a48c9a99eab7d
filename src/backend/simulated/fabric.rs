//! Simulated Matter fabric

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, broadcast};

use super::simulated_response;
use crate::{
    backend::{MatterFabric, PropertyReport},
    core::{
        command::{CommandType, ControlCommand},
        error::{MatterError, MatterResult},
        types::{ConnectionType, Device, DeviceKind, DeviceStatus},
    },
};

#[derive(Debug)]
struct FabricInner {
    nodes: Vec<Device>,
    commissioned: HashSet<String>,
    should_fail_commission: bool,
    should_fail_invoke: bool,
    reported_status: DeviceStatus,
    latency: Duration,
    invoke_calls: usize,
}

/// Simulated Matter controller
#[derive(Debug, Clone)]
pub struct SimulatedFabric {
    inner: Arc<Mutex<FabricInner>>,
    available: Arc<AtomicBool>,
    reports: broadcast::Sender<PropertyReport>,
}

impl SimulatedFabric {
    pub fn new() -> Self {
        Self::with_nodes(vec![])
    }

    /// Fabric with a commissionable vacuum cleaner and light
    pub fn with_demo_nodes() -> Self {
        Self::with_nodes(vec![
            Device::new(
                "matter-1",
                "Matter Vacuum",
                DeviceKind::VacuumCleaner,
                ConnectionType::Matter,
            )
            .with_status(DeviceStatus::Idle),
            Device::new(
                "matter-2",
                "Matter Light",
                DeviceKind::SmartLight,
                ConnectionType::Matter,
            )
            .with_status(DeviceStatus::Idle),
        ])
    }

    fn with_nodes(nodes: Vec<Device>) -> Self {
        let (reports, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(FabricInner {
                nodes,
                commissioned: HashSet::new(),
                should_fail_commission: false,
                should_fail_invoke: false,
                reported_status: DeviceStatus::Idle,
                latency: Duration::ZERO,
                invoke_calls: 0,
            })),
            available: Arc::new(AtomicBool::new(true)),
            reports,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn set_nodes(&self, nodes: Vec<Device>) {
        self.inner.lock().await.nodes = nodes;
    }

    pub async fn set_commission_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_commission = should_fail;
    }

    pub async fn set_invoke_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_invoke = should_fail;
    }

    pub async fn set_reported_status(&self, status: DeviceStatus) {
        self.inner.lock().await.reported_status = status;
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.inner.lock().await.latency = latency;
    }

    /// Push an attribute report as if the node had sent it
    pub fn report(&self, device_id: &str, properties: Map<String, Value>) {
        let _ = self.reports.send(PropertyReport {
            device_id: device_id.to_string(),
            properties,
        });
    }

    pub async fn invoke_calls(&self) -> usize {
        self.inner.lock().await.invoke_calls
    }

    pub async fn is_commissioned(&self, device_id: &str) -> bool {
        self.inner.lock().await.commissioned.contains(device_id)
    }

    fn ensure_available(&self) -> MatterResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(MatterError::NotAvailable)
        }
    }

    async fn delay(&self) {
        let latency = self.inner.lock().await.latency;
        tokio::time::sleep(latency).await;
    }
}

impl Default for SimulatedFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl MatterFabric for SimulatedFabric {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn discover(&self) -> MatterResult<Vec<Device>> {
        self.ensure_available()?;
        self.delay().await;
        Ok(self.inner.lock().await.nodes.clone())
    }

    async fn commission(&self, device_id: &str) -> MatterResult<()> {
        self.ensure_available()?;
        self.delay().await;

        let mut inner = self.inner.lock().await;
        if inner.should_fail_commission {
            return Err(MatterError::PairingFailed(format!(
                "{device_id} rejected the commissioning window"
            )));
        }
        inner.commissioned.insert(device_id.to_string());
        Ok(())
    }

    async fn decommission(&self, device_id: &str) -> MatterResult<()> {
        self.ensure_available()?;
        self.delay().await;
        self.inner.lock().await.commissioned.remove(device_id);
        Ok(())
    }

    async fn invoke(
        &self,
        device_id: &str,
        command: &ControlCommand,
    ) -> MatterResult<Map<String, Value>> {
        self.ensure_available()?;
        self.delay().await;

        let mut inner = self.inner.lock().await;
        if !inner.commissioned.contains(device_id) {
            return Err(MatterError::DeviceNotPaired);
        }
        inner.invoke_calls += 1;
        if inner.should_fail_invoke {
            return Err(MatterError::CommandSendFailed(format!(
                "{device_id} returned a failure status"
            )));
        }

        let status = inner.reported_status;
        let response =
            simulated_response(command.id(), device_id, command.command_type(), status);
        if command.command_type() == CommandType::GetStatus {
            if let Value::Object(properties) = json!({ "status": status }) {
                self.report(device_id, properties);
            }
        }
        Ok(response.data)
    }

    fn property_reports(&self) -> broadcast::Receiver<PropertyReport> {
        self.reports.subscribe()
    }
}
