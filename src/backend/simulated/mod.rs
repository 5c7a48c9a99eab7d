//! In-process simulated backends
//!
//! Used by the service binary when no hardware is attached and by tests.
//! Each simulation can be told to fail, hang or answer commands, and counts
//! the calls it receives.

mod broker;
mod fabric;
mod radio;
mod wifi;

pub use broker::SimulatedBroker;
pub use fabric::SimulatedFabric;
pub use radio::{ConnectBehavior, DisconnectBehavior, SimulatedRadio};
pub use wifi::{SIMULATED_DEVICE_IP, SimulatedWifi};

use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::{
    backend::Backends,
    core::{
        command::{CommandResponse, CommandType},
        types::DeviceStatus,
    },
};

/// Backend bundle of the simulated implementations
#[derive(Debug)]
pub struct Simulated;

impl Backends for Simulated {
    type Radio = SimulatedRadio;
    type Broker = SimulatedBroker;
    type Fabric = SimulatedFabric;
    type Wifi = SimulatedWifi;
}

/// Data a simulated device answers a command with
fn response_data(command_type: CommandType, status: DeviceStatus) -> Map<String, Value> {
    let data = match command_type {
        CommandType::GetStatus => json!({ "status": status }),
        CommandType::GetBatteryLevel => json!({ "battery": 87 }),
        CommandType::GetSchedule => json!({ "schedule": [] }),
        _ => json!({}),
    };
    match data {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn simulated_response(
    command_id: Uuid,
    device_id: &str,
    command_type: CommandType,
    status: DeviceStatus,
) -> CommandResponse {
    CommandResponse {
        command_id,
        device_id: device_id.to_string(),
        status: "success".to_string(),
        data: response_data(command_type, status),
    }
}
