//! Pinhole-projection geometry shared by the color and tag pipelines.
//!
//! Convention (applied consistently everywhere): the pixel *column* drives
//! the horizontal bearing and the pixel *row* drives the vertical bearing.
//! A tilt angle of 0 means the camera looks straight down; `pi/2` means
//! straight ahead.

use crate::profile::{CameraProfile, MIN_FIELD_OF_VIEW_RADIANS};

/// Distance and bearing to a point assumed to sit on the ground plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bearing {
    pub distance: f64,
    pub horizontal_angle: f64,
    pub vertical_angle: f64,
}

/// Precomputed per-camera projection constants.
#[derive(Clone, Copy, Debug)]
pub struct Geometry {
    hres: f64,
    vres: f64,
    tilt: f64,
    height: f64,
    hfov: f64,
    vfov: f64,
    /// Angle subtended per pixel column: `tan(hfov/2) / (hres/2)`.
    res_corresp_h: f64,
    /// Angle subtended per pixel row: `tan(vfov/2) / (vres/2)`.
    res_corresp_v: f64,
}

impl Geometry {
    pub fn new(hres: u32, vres: u32, tilt: f64, height: f64, hfov: f64, vfov: f64) -> Self {
        let hres = hres.max(1) as f64;
        let vres = vres.max(1) as f64;
        let hfov = hfov.max(MIN_FIELD_OF_VIEW_RADIANS);
        let vfov = vfov.max(MIN_FIELD_OF_VIEW_RADIANS);
        Self {
            hres,
            vres,
            tilt,
            height,
            hfov,
            vfov,
            res_corresp_h: (hfov / 2.0).tan() / (hres / 2.0),
            res_corresp_v: (vfov / 2.0).tan() / (vres / 2.0),
        }
    }

    pub fn from_profile(profile: &CameraProfile) -> Self {
        Self::new(
            profile.horizontal_resolution_pixels,
            profile.vertical_resolution_pixels,
            profile.tilt_angle_radians,
            profile.camera_height,
            profile.horizontal_field_of_view_radians,
            profile.vertical_field_of_view_radians,
        )
    }

    /// Horizontal bearing of a pixel column, negative left of the optical axis.
    #[inline]
    pub fn horizontal_angle(&self, col: f64) -> f64 {
        col * self.res_corresp_h - self.hfov * 0.5
    }

    /// Vertical bearing of a pixel row, including the camera tilt.
    #[inline]
    pub fn vertical_angle(&self, row: f64) -> f64 {
        let max_vertical_angle = self.vres * self.res_corresp_v;
        (max_vertical_angle - row * self.res_corresp_v) + self.tilt - self.vfov * 0.5
    }

    /// Ground-plane range and bearings for a pixel `(row, col)`.
    ///
    /// The camera height and the vertical bearing to a ground point fix the
    /// range; dividing by `cos(horizontal)` undoes the foreshortening of
    /// points off the optical axis.
    pub fn loc_from_center(&self, row: f64, col: f64) -> Bearing {
        let horizontal_angle = self.horizontal_angle(col);
        let vertical_angle = self.vertical_angle(row);
        let distance = vertical_angle.tan() * self.height / horizontal_angle.cos();
        Bearing {
            distance,
            horizontal_angle,
            vertical_angle,
        }
    }

    /// In-plane orientation of an object whose image-space slope is `slope`.
    ///
    /// The apparent slope of a line flattens as the vertical viewing angle
    /// departs from perpendicular; this undoes that foreshortening.
    pub fn piece_angle(&self, slope: f64, vertical_angle: f64) -> f64 {
        let apparent = slope.atan();
        let angle_to_piece_vertical = self.tilt - self.vfov * 0.5 + vertical_angle;
        (apparent.tan() / angle_to_piece_vertical.cos()).atan()
    }

    #[inline]
    pub fn tilt(&self) -> f64 {
        self.tilt
    }

    #[inline]
    pub fn vertical_resolution(&self) -> f64 {
        self.vres
    }
}
