//! Converts raw detections into the distance/bearing vocabulary the RPC
//! layer reports for colored objects.
//!
//! Convention: the pixel column drives the horizontal bearing and the pixel
//! row drives the vertical bearing, same as the ground-plane pipeline.

use astrolabe_core::Geometry;
use serde::Serialize;

use crate::detect::TagDetection;
use crate::pose::{estimate_pose, TagPose};

/// One tag measurement as serialized into the RPC response.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct TagReport {
    pub tag_id: u32,
    /// Range to the tag in the units of the configured tag side length.
    pub distance: f64,
    pub horizontal_angle: f64,
    pub vertical_angle: f64,
    /// Tag center in camera coordinates, from the recovered pose.
    pub position: [f64; 3],
    /// Roll, pitch and yaw of the tag plane.
    pub orientation: [f64; 3],
    /// Tag center in image pixels `[col, row]`.
    pub center: [f64; 2],
}

/// Camera constants the adapter needs beyond the shared geometry.
#[derive(Clone, Copy, Debug)]
pub struct TagCamera {
    pub focal_length_h: f64,
    pub focal_length_v: f64,
    pub principal_x: f64,
    pub principal_y: f64,
    /// Physical tag side length.
    pub tag_side: f64,
}

/// Reduce one detection to range, bearings, position and orientation.
///
/// Range is the mean of two independent pinhole estimates: the physical tag
/// width over the top-edge pixel separation times the horizontal focal
/// length, and the analogous vertical estimate over the right edge. When the
/// pose solver fails (degenerate quad) the position and orientation are
/// zeroed but the range and bearings are still reported.
pub fn report(det: &TagDetection, camera: &TagCamera, geometry: &Geometry) -> TagReport {
    let top = edge_length(det, 0, 1);
    let right = edge_length(det, 1, 2);

    let mut distance = 0.0;
    let mut estimates = 0.0;
    if top > f64::EPSILON {
        distance += camera.tag_side * camera.focal_length_h / top;
        estimates += 1.0;
    }
    if right > f64::EPSILON {
        distance += camera.tag_side * camera.focal_length_v / right;
        estimates += 1.0;
    }
    if estimates > 0.0 {
        distance /= estimates;
    }

    let (position, orientation) = match pose(det, camera) {
        Some(p) => {
            let (roll, pitch, yaw) = p.euler_angles();
            (
                [p.translation.x, p.translation.y, p.translation.z],
                [roll, pitch, yaw],
            )
        }
        None => ([0.0; 3], [0.0; 3]),
    };

    TagReport {
        tag_id: det.id,
        distance,
        horizontal_angle: geometry.horizontal_angle(det.center.x),
        vertical_angle: geometry.vertical_angle(det.center.y),
        position,
        orientation,
        center: [det.center.x, det.center.y],
    }
}

fn pose(det: &TagDetection, camera: &TagCamera) -> Option<TagPose> {
    estimate_pose(
        det,
        camera.focal_length_h,
        camera.focal_length_v,
        camera.principal_x,
        camera.principal_y,
        camera.tag_side,
    )
}

fn edge_length(det: &TagDetection, a: usize, b: usize) -> f64 {
    let pa = det.corners[a];
    let pb = det.corners[b];
    ((pa.x - pb.x).powi(2) + (pa.y - pb.y).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point2;

    fn square_detection(center: (f64, f64), side_px: f64) -> TagDetection {
        let h = side_px / 2.0;
        let corners = [
            Point2::new(center.0 - h, center.1 - h),
            Point2::new(center.0 + h, center.1 - h),
            Point2::new(center.0 + h, center.1 + h),
            Point2::new(center.0 - h, center.1 + h),
        ];
        TagDetection {
            id: 3,
            hamming: 0,
            corners,
            center: Point2::new(center.0, center.1),
        }
    }

    fn camera() -> TagCamera {
        TagCamera {
            focal_length_h: 600.0,
            focal_length_v: 600.0,
            principal_x: 320.0,
            principal_y: 240.0,
            tag_side: 0.155,
        }
    }

    fn geometry() -> Geometry {
        Geometry::new(
            640,
            480,
            std::f64::consts::FRAC_PI_2,
            30.0,
            68.0_f64.to_radians(),
            51.0_f64.to_radians(),
        )
    }

    #[test]
    fn distance_matches_the_pinhole_model() {
        // A 0.155 m tag imaged at 46.5 px with f = 600 px sits at 2 m.
        let det = square_detection((320.0, 240.0), 46.5);
        let r = report(&det, &camera(), &geometry());
        assert_relative_eq!(r.distance, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn bearings_match_the_shared_projection() {
        let det = square_detection((320.0, 240.0), 40.0);
        let r = report(&det, &camera(), &geometry());
        let g = geometry();
        assert_relative_eq!(r.horizontal_angle, g.horizontal_angle(320.0), epsilon = 1e-9);
        assert_relative_eq!(r.vertical_angle, g.vertical_angle(240.0), epsilon = 1e-9);
    }

    #[test]
    fn bearing_sign_follows_the_column() {
        let left = report(&square_detection((100.0, 240.0), 40.0), &camera(), &geometry());
        let right = report(&square_detection((540.0, 240.0), 40.0), &camera(), &geometry());
        assert!(left.horizontal_angle < 0.0);
        assert!(right.horizontal_angle > 0.0);
        assert!(left.horizontal_angle < right.horizontal_angle);
    }

    #[test]
    fn position_depth_matches_the_pinhole_range() {
        // Fronto-parallel square at the principal point: the recovered
        // translation is straight down the optical axis.
        let det = square_detection((320.0, 240.0), 46.5);
        let r = report(&det, &camera(), &geometry());
        assert_relative_eq!(r.position[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(r.position[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(r.position[2], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn degenerate_quad_still_reports_bearings() {
        let mut det = square_detection((320.0, 240.0), 40.0);
        det.corners = [det.corners[0]; 4];
        let r = report(&det, &camera(), &geometry());
        assert_eq!(r.distance, 0.0);
        assert_eq!(r.position, [0.0; 3]);
        assert_eq!(r.orientation, [0.0; 3]);
        assert_relative_eq!(
            r.horizontal_angle,
            geometry().horizontal_angle(320.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn report_serializes_the_wire_fields() {
        let det = square_detection((320.0, 240.0), 40.0);
        let value = serde_json::to_value(report(&det, &camera(), &geometry())).unwrap();
        for key in [
            "tag_id",
            "distance",
            "horizontal_angle",
            "vertical_angle",
            "position",
            "orientation",
            "center",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["tag_id"], serde_json::json!(3));
        assert_eq!(value["position"].as_array().unwrap().len(), 3);
        assert_eq!(value["orientation"].as_array().unwrap().len(), 3);
    }
}
