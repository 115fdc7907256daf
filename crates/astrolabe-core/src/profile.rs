use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Floor applied to both fields of view on load and on mutation.
///
/// A zero FOV would put `tan(fov/2) == 0` into every pixel-to-angle
/// conversion; clamping here keeps a hand-edited profile file from turning
/// into a division by zero several layers down.
pub const MIN_FIELD_OF_VIEW_RADIANS: f64 = 0.01;

/// Immutable process-wide defaults, constructed once at startup.
#[derive(Clone, Copy, Debug)]
pub struct Defaults {
    pub horizontal_resolution_pixels: u32,
    pub vertical_resolution_pixels: u32,
    pub tilt_angle_radians: f64,
    pub horizontal_field_of_view_radians: f64,
    pub vertical_field_of_view_radians: f64,
    pub camera_height: f64,
    pub downscale_factor: u32,
    /// Physical tag side length, in the same unit as reported distances.
    pub tag_side: f64,
    pub record: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            horizontal_resolution_pixels: 640,
            vertical_resolution_pixels: 480,
            // 0 is straight down, pi/2 is straight ahead.
            tilt_angle_radians: 2.0 * std::f64::consts::PI / 6.0 - 0.1,
            horizontal_field_of_view_radians: 68.0_f64.to_radians(),
            vertical_field_of_view_radians: 51.0_f64.to_radians(),
            camera_height: 30.0,
            downscale_factor: 4,
            tag_side: 0.155,
            record: false,
        }
    }
}

impl Defaults {
    /// Derive a focal length (in pixels) from a resolution and field of view.
    pub fn focal_length(resolution_pixels: u32, fov_radians: f64) -> f64 {
        let fov = fov_radians.max(MIN_FIELD_OF_VIEW_RADIANS);
        (resolution_pixels.max(1) as f64 / 2.0) / (fov / 2.0).tan()
    }
}

/// Per-camera intrinsics/extrinsics, keyed by serial id in the profile store.
///
/// The open set of hardware capture properties (exposure, gain, ...) rides
/// along in `capture`; the server maps the names it knows to V4L2 controls
/// and preserves the rest verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraProfile {
    pub horizontal_focal_length: f64,
    pub vertical_focal_length: f64,
    pub camera_height: f64,
    pub horizontal_resolution_pixels: u32,
    pub vertical_resolution_pixels: u32,
    pub tilt_angle_radians: f64,
    pub horizontal_field_of_view_radians: f64,
    pub vertical_field_of_view_radians: f64,
    pub downscale_factor: u32,
    #[serde(default)]
    pub record: bool,
    #[serde(flatten)]
    pub capture: BTreeMap<String, f64>,
}

impl CameraProfile {
    pub fn from_defaults(defaults: &Defaults) -> Self {
        Self {
            horizontal_focal_length: Defaults::focal_length(
                defaults.horizontal_resolution_pixels,
                defaults.horizontal_field_of_view_radians,
            ),
            vertical_focal_length: Defaults::focal_length(
                defaults.vertical_resolution_pixels,
                defaults.vertical_field_of_view_radians,
            ),
            camera_height: defaults.camera_height,
            horizontal_resolution_pixels: defaults.horizontal_resolution_pixels,
            vertical_resolution_pixels: defaults.vertical_resolution_pixels,
            tilt_angle_radians: defaults.tilt_angle_radians,
            horizontal_field_of_view_radians: defaults.horizontal_field_of_view_radians,
            vertical_field_of_view_radians: defaults.vertical_field_of_view_radians,
            downscale_factor: defaults.downscale_factor,
            record: defaults.record,
            capture: BTreeMap::new(),
        }
    }

    /// Clamp every numeric field to its invariant floor.
    ///
    /// Idempotent: clamping an already-clamped profile changes nothing, so a
    /// load/save round trip through the store is stable.
    pub fn clamp(&mut self) {
        self.horizontal_focal_length = self.horizontal_focal_length.max(0.0);
        self.vertical_focal_length = self.vertical_focal_length.max(0.0);
        self.camera_height = self.camera_height.max(0.0);
        self.horizontal_resolution_pixels = self.horizontal_resolution_pixels.max(1);
        self.vertical_resolution_pixels = self.vertical_resolution_pixels.max(1);
        self.horizontal_field_of_view_radians = self
            .horizontal_field_of_view_radians
            .max(MIN_FIELD_OF_VIEW_RADIANS);
        self.vertical_field_of_view_radians = self
            .vertical_field_of_view_radians
            .max(MIN_FIELD_OF_VIEW_RADIANS);
        self.downscale_factor = self.downscale_factor.max(1);
    }

    pub fn clamped(mut self) -> Self {
        self.clamp();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_enforces_floors() {
        let mut profile = CameraProfile::from_defaults(&Defaults::default());
        profile.horizontal_resolution_pixels = 0;
        profile.vertical_resolution_pixels = 0;
        profile.downscale_factor = 0;
        profile.horizontal_field_of_view_radians = 0.0;
        profile.horizontal_focal_length = -3.0;
        profile.clamp();

        assert_eq!(profile.horizontal_resolution_pixels, 1);
        assert_eq!(profile.vertical_resolution_pixels, 1);
        assert_eq!(profile.downscale_factor, 1);
        assert!(profile.horizontal_field_of_view_radians >= MIN_FIELD_OF_VIEW_RADIANS);
        assert_eq!(profile.horizontal_focal_length, 0.0);
    }

    #[test]
    fn clamp_is_idempotent() {
        let mut profile = CameraProfile::from_defaults(&Defaults::default());
        profile.vertical_field_of_view_radians = -1.0;
        let once = profile.clone().clamped();
        let twice = once.clone().clamped();
        assert_eq!(once, twice);
    }

    #[test]
    fn capture_properties_survive_serde_round_trip() {
        let mut profile = CameraProfile::from_defaults(&Defaults::default());
        profile.capture.insert("exposure".into(), 120.0);
        profile.capture.insert("gain".into(), 4.0);

        let json = serde_json::to_string(&profile).unwrap();
        let back: CameraProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }
}
