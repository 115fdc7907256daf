//! On-disk persistence for camera profiles and the color-target list.
//!
//! Profiles live in one shared JSON object keyed by serial id; colors are a
//! JSON array. Loads never fail: a missing file, missing key or parse error
//! falls back to defaults which are persisted immediately so the next load
//! sees the same values. Saves rewrite the whole file through a rename so a
//! crash mid-write cannot leave a half-written file behind.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use astrolabe_core::{CameraProfile, ColorList, ColorTarget, Defaults};
use log::{info, warn};
use serde_json::Value;

pub struct ProfileStore {
    profiles_path: PathBuf,
    colors_path: PathBuf,
    defaults: Defaults,
}

impl ProfileStore {
    pub fn new(data_dir: &Path, defaults: Defaults) -> Self {
        Self {
            profiles_path: data_dir.join("profiles.json"),
            colors_path: data_dir.join("colors.json"),
            defaults,
        }
    }

    #[inline]
    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// Load the profile for `serial_id`, clamped to its invariant floors.
    ///
    /// Absent or unparseable entries are replaced by defaults and written
    /// back before returning.
    pub fn load_profile(&self, serial_id: &str) -> CameraProfile {
        let mut table = self.read_profiles();
        if let Some(entry) = table.get(serial_id) {
            match serde_json::from_value::<CameraProfile>(entry.clone()) {
                Ok(profile) => return profile.clamped(),
                Err(err) => {
                    warn!("profile for {serial_id} is unreadable ({err}), resetting to defaults");
                }
            }
        } else {
            info!("no profile for {serial_id}, creating defaults");
        }

        let profile = CameraProfile::from_defaults(&self.defaults);
        if let Ok(value) = serde_json::to_value(&profile) {
            table.insert(serial_id.to_string(), value);
            if let Err(err) = self.write_json(&self.profiles_path, &Value::from_iter(table)) {
                warn!("cannot persist default profile for {serial_id}: {err}");
            }
        }
        profile
    }

    /// Read-modify-write the shared profile file.
    pub fn save_profile(&self, serial_id: &str, profile: &CameraProfile) -> io::Result<()> {
        let mut table = self.read_profiles();
        let value = serde_json::to_value(profile).map_err(io::Error::other)?;
        table.insert(serial_id.to_string(), value);
        self.write_json(&self.profiles_path, &Value::from_iter(table))
    }

    /// Load the color list; corruption falls back to the single default
    /// target, persisted immediately.
    pub fn load_colors(&self) -> ColorList {
        match fs::read_to_string(&self.colors_path) {
            Ok(text) => match serde_json::from_str::<Vec<ColorTarget>>(&text) {
                Ok(targets) if !targets.is_empty() => return ColorList::from_targets(targets),
                Ok(_) => warn!("color list file is empty, resetting to defaults"),
                Err(err) => warn!("color list file is unreadable ({err}), resetting to defaults"),
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("no color list file, creating defaults");
            }
            Err(err) => warn!("cannot read color list: {err}"),
        }

        let list = ColorList::default();
        if let Err(err) = self.save_colors(&list) {
            warn!("cannot persist default color list: {err}");
        }
        list
    }

    pub fn save_colors(&self, list: &ColorList) -> io::Result<()> {
        let value = serde_json::to_value(list.targets()).map_err(io::Error::other)?;
        self.write_json(&self.colors_path, &value)
    }

    fn read_profiles(&self) -> BTreeMap<String, Value> {
        let text = match fs::read_to_string(&self.profiles_path) {
            Ok(text) => text,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("cannot read profile file: {err}");
                }
                return BTreeMap::new();
            }
        };
        match serde_json::from_str(&text) {
            Ok(table) => table,
            Err(err) => {
                warn!("profile file is unreadable ({err}), starting over");
                BTreeMap::new()
            }
        }
    }

    /// Serialize to a sibling temp file, then rename over the target.
    fn write_json(&self, path: &Path, value: &Value) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(value).map_err(io::Error::other)?)?;
        fs::rename(&tmp, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> ProfileStore {
        ProfileStore::new(dir, Defaults::default())
    }

    #[test]
    fn profile_round_trip_is_field_exact() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        let mut profile = CameraProfile::from_defaults(&Defaults::default());
        profile.camera_height = 42.5;
        profile.capture.insert("exposure".into(), 77.0);
        store.save_profile("cam-a", &profile).unwrap();

        assert_eq!(store.load_profile("cam-a"), profile);
    }

    #[test]
    fn profiles_for_different_serials_coexist() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        let mut a = CameraProfile::from_defaults(&Defaults::default());
        a.camera_height = 10.0;
        let mut b = CameraProfile::from_defaults(&Defaults::default());
        b.camera_height = 20.0;

        store.save_profile("cam-a", &a).unwrap();
        store.save_profile("cam-b", &b).unwrap();

        assert_eq!(store.load_profile("cam-a").camera_height, 10.0);
        assert_eq!(store.load_profile("cam-b").camera_height, 20.0);
    }

    #[test]
    fn missing_profile_creates_and_persists_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        let first = store.load_profile("new-cam");
        assert_eq!(first, CameraProfile::from_defaults(&Defaults::default()));

        let text = fs::read_to_string(tmp.path().join("profiles.json")).unwrap();
        assert!(text.contains("new-cam"));
    }

    #[test]
    fn corrupt_profile_file_resets_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        fs::write(tmp.path().join("profiles.json"), "{ not json").unwrap();

        let profile = store.load_profile("cam-a");
        assert_eq!(profile, CameraProfile::from_defaults(&Defaults::default()));
        // The repaired file parses again.
        assert_eq!(store.load_profile("cam-a"), profile);
    }

    #[test]
    fn load_clamps_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        let mut profile = CameraProfile::from_defaults(&Defaults::default());
        profile.horizontal_resolution_pixels = 0;
        profile.vertical_field_of_view_radians = 0.0;
        store.save_profile("cam-a", &profile).unwrap();

        let once = store.load_profile("cam-a");
        assert!(once.horizontal_resolution_pixels >= 1);
        assert_eq!(store.load_profile("cam-a"), once);
    }

    #[test]
    fn corrupt_color_file_resets_to_single_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        fs::write(tmp.path().join("colors.json"), "??").unwrap();

        let list = store.load_colors();
        assert_eq!(list.len(), 1);
        assert_eq!(list.active_index(), 0);
        // Persisted repair parses on the next load.
        assert_eq!(store.load_colors(), list);
    }

    #[test]
    fn color_list_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        let mut list = ColorList::default();
        list.add(ColorTarget {
            red: 10,
            green: 20,
            blue: 30,
            difference: 40,
            blur: 3,
        })
        .unwrap();
        store.save_colors(&list).unwrap();

        let loaded = store.load_colors();
        assert_eq!(loaded.targets(), list.targets());
        // The active index is process-local and resets on load.
        assert_eq!(loaded.active_index(), 0);
    }
}
