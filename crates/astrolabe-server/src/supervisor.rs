//! Camera discovery and child-process supervision.
//!
//! The supervisor resolves camera identities, spawns one camera process per
//! identity plus the global aggregator, assigns each child a CPU core
//! round-robin, and restarts crashed children with exponential backoff up
//! to a per-child cap. The children pin themselves to the assigned core at
//! startup.

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::global::CameraEndpoint;
use crate::identity::{self, CameraIdentity};

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub data_dir: PathBuf,
    pub base_port: u16,
    pub global_port: u16,
    /// Restarts allowed per child before it is given up on.
    pub max_restarts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("astrolabe-data"),
            base_port: 50000,
            global_port: 50100,
            max_restarts: 5,
        }
    }
}

struct ChildSlot {
    name: String,
    child: Child,
    command: Command,
    restarts: u32,
    restart_at: Option<Instant>,
}

/// Discover cameras (retrying until at least one appears) and supervise the
/// per-camera and global processes until terminated.
pub fn run(config: &SupervisorConfig) -> io::Result<()> {
    let identities = wait_for_cameras();
    let exe = env::current_exe()?;
    let cores: Vec<usize> = core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.id)
        .collect();
    let mut next_core = 0usize;
    let mut pick_core = move || -> Option<usize> {
        if cores.is_empty() {
            return None;
        }
        let core = cores[next_core % cores.len()];
        next_core += 1;
        Some(core)
    };

    let mut slots = Vec::new();
    let mut endpoints = Vec::new();

    for (index, identity) in identities.iter().enumerate() {
        let port = config.base_port + index as u16;
        endpoints.push(CameraEndpoint {
            serial_id: identity.serial_id.clone(),
            port,
            device_index: index,
        });

        let mut command = camera_command(&exe, identity, port, pick_core(), &config.data_dir);
        let child = command.spawn()?;
        info!(
            "camera {} ({}) on port {port}, pid {}",
            identity.serial_id,
            identity.device_path.display(),
            child.id()
        );
        slots.push(ChildSlot {
            name: identity.serial_id.clone(),
            child,
            command,
            restarts: 0,
            restart_at: None,
        });
    }

    let mut command = global_command(&exe, config.global_port, pick_core(), &endpoints)?;
    let child = command.spawn()?;
    info!("global aggregator on port {}, pid {}", config.global_port, child.id());
    slots.push(ChildSlot {
        name: "global".into(),
        child,
        command,
        restarts: 0,
        restart_at: None,
    });

    supervise(slots, config.max_restarts)
}

/// Identity resolution with exponential backoff; an empty list means "no
/// cameras yet", not an error.
fn wait_for_cameras() -> Vec<CameraIdentity> {
    let mut delay = Duration::from_secs(1);
    loop {
        let identities = identity::resolve();
        if !identities.is_empty() {
            info!("found {} camera(s)", identities.len());
            return identities;
        }
        warn!("no cameras found, retrying in {delay:?}");
        std::thread::sleep(delay);
        delay = (delay * 2).min(Duration::from_secs(30));
    }
}

fn supervise(mut slots: Vec<ChildSlot>, max_restarts: u32) -> io::Result<()> {
    loop {
        for slot in &mut slots {
            if let Some(at) = slot.restart_at {
                if Instant::now() >= at {
                    slot.restart_at = None;
                    match slot.command.spawn() {
                        Ok(child) => {
                            info!("restarted {} as pid {}", slot.name, child.id());
                            slot.child = child;
                        }
                        Err(err) => {
                            error!("cannot restart {}: {err}", slot.name);
                            slot.restart_at = Some(Instant::now() + Duration::from_secs(5));
                        }
                    }
                }
                continue;
            }

            match slot.child.try_wait() {
                Ok(None) => {}
                Ok(Some(status)) => {
                    warn!("{} exited with {status}", slot.name);
                    if slot.restarts >= max_restarts {
                        error!("{} exceeded {max_restarts} restarts, giving up", slot.name);
                        continue;
                    }
                    let backoff = Duration::from_secs(1 << slot.restarts.min(6));
                    info!("restarting {} in {backoff:?}", slot.name);
                    slot.restarts += 1;
                    slot.restart_at = Some(Instant::now() + backoff);
                }
                Err(err) => warn!("cannot poll {}: {err}", slot.name),
            }
        }
        std::thread::sleep(Duration::from_millis(500));
    }
}

fn camera_command(
    exe: &PathBuf,
    identity: &CameraIdentity,
    port: u16,
    core: Option<usize>,
    data_dir: &PathBuf,
) -> Command {
    let mut command = Command::new(exe);
    command
        .arg("camera")
        .arg("--device")
        .arg(&identity.device_path)
        .arg("--serial")
        .arg(&identity.serial_id)
        .arg("--port")
        .arg(port.to_string())
        .arg("--data-dir")
        .arg(data_dir);
    if let Some(core) = core {
        command.arg("--core").arg(core.to_string());
    }
    command
}

fn global_command(
    exe: &PathBuf,
    port: u16,
    core: Option<usize>,
    endpoints: &[CameraEndpoint],
) -> io::Result<Command> {
    let cameras = serde_json::to_string(endpoints).map_err(io::Error::other)?;
    let mut command = Command::new(exe);
    command
        .arg("global")
        .arg("--port")
        .arg(port.to_string())
        .arg("--cameras")
        .arg(cameras);
    if let Some(core) = core {
        command.arg("--core").arg(core.to_string());
    }
    Ok(command)
}

/// Pin the calling process to `core`; children call this at startup.
pub fn pin_to_core(core: usize) {
    if core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
        info!("pinned to core {core}");
    } else {
        warn!("could not pin to core {core}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_command_carries_identity_and_port() {
        let identity = CameraIdentity {
            device_path: PathBuf::from("/dev/video0"),
            serial_id: "abc".into(),
        };
        let command = camera_command(
            &PathBuf::from("/usr/bin/astrolabe"),
            &identity,
            50003,
            Some(2),
            &PathBuf::from("/tmp/data"),
        );
        let args: Vec<String> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"--serial".to_string()));
        assert!(args.contains(&"abc".to_string()));
        assert!(args.contains(&"50003".to_string()));
        assert!(args.contains(&"2".to_string()));
    }

    #[test]
    fn global_command_serializes_the_endpoint_map() {
        let endpoints = vec![CameraEndpoint {
            serial_id: "abc".into(),
            port: 50000,
            device_index: 0,
        }];
        let command = global_command(
            &PathBuf::from("/usr/bin/astrolabe"),
            50100,
            None,
            &endpoints,
        )
        .unwrap();
        let args: Vec<String> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.iter().any(|a| a.contains("\"serial_id\":\"abc\"")));
    }
}
