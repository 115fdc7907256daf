//! Stable camera identities from the kernel's video device database.
//!
//! Enumerates `/sys/class/video4linux`, walks each node up to its USB
//! ancestor and derives a serial identifier from the vendor/model/serial
//! attributes. The identifier survives device renumbering across reboots;
//! the `/dev/videoN` path does not and is only valid for this boot.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

pub const SYSFS_VIDEO_DIR: &str = "/sys/class/video4linux";

/// One enumerated camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraIdentity {
    /// Capture node, e.g. `/dev/video0`.
    pub device_path: PathBuf,
    /// Stable identifier, unique across currently-enumerated cameras.
    pub serial_id: String,
}

/// Enumerate cameras with stable serial identifiers, sorted by serial.
///
/// An unlistable sysfs directory yields an empty list; the supervisor
/// treats that as "no cameras yet" and retries with backoff.
pub fn resolve() -> Vec<CameraIdentity> {
    resolve_in(Path::new(SYSFS_VIDEO_DIR))
}

pub fn resolve_in(sysfs_dir: &Path) -> Vec<CameraIdentity> {
    let entries = match fs::read_dir(sysfs_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("cannot list {}: {err}", sysfs_dir.display());
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let mut raw = Vec::new();
    for name in names {
        let node = sysfs_dir.join(&name);
        // Each camera exposes a capture node (index 0) and a metadata node;
        // only the capture node is usable.
        if read_attr(&node, "index").as_deref().unwrap_or("0") != "0" {
            continue;
        }
        match identify(&node, &name) {
            Some(id) => raw.push(id),
            None => debug!("{name}: no usable USB identity, skipping"),
        }
    }

    disambiguate(&mut raw);
    let mut out: Vec<CameraIdentity> = raw.into_iter().map(CameraIdentity::from).collect();
    out.sort_by(|a, b| a.serial_id.cmp(&b.serial_id));
    out
}

struct RawIdentity {
    device_path: PathBuf,
    serial: String,
    composite: String,
    bus_path: String,
}

/// Walk from the video node to its USB device ancestor and read identity
/// attributes. Devices without a serial are excluded.
fn identify(node: &Path, name: &str) -> Option<RawIdentity> {
    let usb = usb_ancestor(node)?;
    let serial = read_attr(&usb, "serial")?;
    let vendor = read_attr(&usb, "idVendor").unwrap_or_default();
    let model = read_attr(&usb, "idProduct").unwrap_or_default();
    let bus_path = usb
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Some(RawIdentity {
        device_path: PathBuf::from("/dev").join(name),
        composite: format!("{serial}_{vendor}_{model}"),
        serial,
        bus_path,
    })
}

/// Nearest ancestor of `node/device` that carries USB identity attributes.
fn usb_ancestor(node: &Path) -> Option<PathBuf> {
    let mut dir = fs::canonicalize(node.join("device")).ok()?;
    for _ in 0..8 {
        if dir.join("idVendor").is_file() {
            return Some(dir);
        }
        dir = dir.parent()?.to_path_buf();
    }
    None
}

/// Uniqueness repair: identical serials first widen to the composite
/// serial+vendor+model key, and a surviving collision appends the physical
/// bus path.
fn disambiguate(raw: &mut [RawIdentity]) {
    let serials: Vec<String> = raw.iter().map(|r| r.serial.clone()).collect();
    let composites: Vec<String> = raw.iter().map(|r| r.composite.clone()).collect();

    for (i, r) in raw.iter_mut().enumerate() {
        if serials.iter().filter(|s| **s == serials[i]).count() > 1 {
            if composites.iter().filter(|c| **c == composites[i]).count() > 1 {
                r.serial = format!("{}_{}", r.composite, r.bus_path);
            } else {
                r.serial = r.composite.clone();
            }
        }
    }
}

impl From<RawIdentity> for CameraIdentity {
    fn from(raw: RawIdentity) -> Self {
        Self {
            device_path: raw.device_path,
            serial_id: raw.serial,
        }
    }
}

fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    let text = fs::read_to_string(dir.join(attr)).ok()?;
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
