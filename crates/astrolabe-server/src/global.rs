//! The cross-camera aggregator process.
//!
//! Serves host telemetry and the static camera map so a client can find
//! every camera endpoint from one well-known port.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sysinfo::{Components, Disks, System};

use crate::error::RpcError;
use crate::server::Handler;

/// Where one camera process can be reached.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraEndpoint {
    pub serial_id: String,
    pub port: u16,
    pub device_index: usize,
}

pub struct GlobalUnit {
    cameras: Vec<CameraEndpoint>,
    system: System,
}

impl GlobalUnit {
    pub fn new(cameras: Vec<CameraEndpoint>) -> Self {
        Self {
            cameras,
            system: System::new_all(),
        }
    }

    fn cmd_hardware_info(&mut self) -> Value {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpus: Vec<Value> = self
            .system
            .cpus()
            .iter()
            .map(|cpu| {
                json!({
                    "name": cpu.name(),
                    "usage_percent": cpu.cpu_usage(),
                    "frequency_mhz": cpu.frequency(),
                })
            })
            .collect();

        let disks: Vec<Value> = Disks::new_with_refreshed_list()
            .iter()
            .map(|disk| {
                json!({
                    "mount": disk.mount_point().to_string_lossy(),
                    "total_bytes": disk.total_space(),
                    "available_bytes": disk.available_space(),
                })
            })
            .collect();

        let thermal: Vec<Value> = Components::new_with_refreshed_list()
            .iter()
            .map(|component| {
                json!({
                    "label": component.label(),
                    "temperature_celsius": component.temperature(),
                })
            })
            .collect();

        json!({
            "cpus": cpus,
            "memory": {
                "total_bytes": self.system.total_memory(),
                "available_bytes": self.system.available_memory(),
            },
            "disks": disks,
            "thermal": thermal,
        })
    }

    fn cmd_camera_info(&self) -> Value {
        let map: Map<String, Value> = self
            .cameras
            .iter()
            .map(|cam| {
                (
                    cam.serial_id.clone(),
                    json!({ "port": cam.port, "device_index": cam.device_index }),
                )
            })
            .collect();
        Value::Object(map)
    }

    fn cmd_function_info(&self) -> Value {
        json!({
            "hardware_info": {},
            "camera_info": {},
            "function_info": {},
        })
    }
}

impl Handler for GlobalUnit {
    fn handle(&mut self, function: &str, _args: &Map<String, Value>) -> Result<Value, RpcError> {
        match function {
            "hardware_info" => Ok(self.cmd_hardware_info()),
            "camera_info" => Ok(self.cmd_camera_info()),
            "function_info" => Ok(self.cmd_function_info()),
            other => Err(RpcError::UnknownCommand(other.to_string())),
        }
    }
}
