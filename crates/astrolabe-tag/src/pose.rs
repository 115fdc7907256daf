//! Tag pose from a planar homography and the pinhole intrinsics.

use nalgebra::{Matrix3, Point2, Rotation3, Vector3};

use crate::detect::TagDetection;
use crate::homography::homography_from_4pt;

/// Rigid pose of a tag in the camera frame, Z forward.
#[derive(Clone, Copy, Debug)]
pub struct TagPose {
    pub rotation: Rotation3<f64>,
    /// Translation in the same units as the tag side length.
    pub translation: Vector3<f64>,
}

impl TagPose {
    /// Euler angles `(roll, pitch, yaw)` in radians.
    #[inline]
    pub fn euler_angles(&self) -> (f64, f64, f64) {
        self.rotation.euler_angles()
    }
}

/// Decompose the metric-plane homography into rotation and translation.
///
/// The tag plane is `z = 0` with corners at `±side/2`, so the first two
/// columns of `K⁻¹·H` are the rotated plane axes up to scale and the third
/// is the translation. The rotation is re-orthogonalized through an SVD and
/// the solution with the tag in front of the camera is kept.
pub fn estimate_pose(
    det: &TagDetection,
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    tag_side: f64,
) -> Option<TagPose> {
    if fx.abs() < f64::EPSILON || fy.abs() < f64::EPSILON || tag_side <= 0.0 {
        return None;
    }

    let half = tag_side / 2.0;
    let object = [
        Point2::new(-half, -half),
        Point2::new(half, -half),
        Point2::new(half, half),
        Point2::new(-half, half),
    ];
    let h = homography_from_4pt(&object, &det.corners)?.h;

    let k_inv = Matrix3::new(
        1.0 / fx,
        0.0,
        -cx / fx,
        0.0,
        1.0 / fy,
        -cy / fy,
        0.0,
        0.0,
        1.0,
    );
    let g = k_inv * h;

    let g1 = g.column(0).into_owned();
    let g2 = g.column(1).into_owned();
    let g3 = g.column(2).into_owned();

    let scale = (g1.norm() + g2.norm()) / 2.0;
    if scale < f64::EPSILON {
        return None;
    }

    let r1 = g1 / scale;
    let r2 = g2 / scale;
    let r3 = r1.cross(&r2);
    let mut translation = g3 / scale;

    let mut raw = Matrix3::from_columns(&[r1, r2, r3]);
    if translation.z < 0.0 {
        translation = -translation;
        raw.column_mut(0).neg_mut();
        raw.column_mut(1).neg_mut();
    }

    // Nearest orthonormal matrix.
    let svd = raw.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        rotation = u * v_t;
    }

    Some(TagPose {
        rotation: Rotation3::from_matrix_unchecked(rotation),
        translation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Project metric tag corners through a known pose and intrinsics.
    fn project(
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        side: f64,
    ) -> TagDetection {
        let half = side / 2.0;
        let object = [
            Vector3::new(-half, -half, 0.0),
            Vector3::new(half, -half, 0.0),
            Vector3::new(half, half, 0.0),
            Vector3::new(-half, half, 0.0),
        ];
        let corners = object.map(|p| {
            let c = rotation * p + translation;
            Point2::new(fx * c.x / c.z + cx, fy * c.y / c.z + cy)
        });
        let center = Point2::new(
            corners.iter().map(|p| p.x).sum::<f64>() / 4.0,
            corners.iter().map(|p| p.y).sum::<f64>() / 4.0,
        );
        TagDetection {
            id: 0,
            hamming: 0,
            corners,
            center,
        }
    }

    #[test]
    fn recovers_a_frontal_pose() {
        let rotation = Rotation3::identity();
        let translation = Vector3::new(0.1, -0.05, 2.0);
        let det = project(&rotation, &translation, 600.0, 600.0, 320.0, 240.0, 0.155);

        let pose = estimate_pose(&det, 600.0, 600.0, 320.0, 240.0, 0.155).expect("pose");
        assert_relative_eq!(pose.translation.x, 0.1, epsilon = 1e-6);
        assert_relative_eq!(pose.translation.y, -0.05, epsilon = 1e-6);
        assert_relative_eq!(pose.translation.z, 2.0, epsilon = 1e-6);

        let (roll, pitch, yaw) = pose.euler_angles();
        assert_relative_eq!(roll, 0.0, epsilon = 1e-6);
        assert_relative_eq!(pitch, 0.0, epsilon = 1e-6);
        assert_relative_eq!(yaw, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn recovers_a_yawed_pose() {
        let rotation = Rotation3::from_euler_angles(0.0, 0.4, 0.0);
        let translation = Vector3::new(-0.3, 0.0, 1.5);
        let det = project(&rotation, &translation, 500.0, 510.0, 320.0, 240.0, 0.155);

        let pose = estimate_pose(&det, 500.0, 510.0, 320.0, 240.0, 0.155).expect("pose");
        let (_, pitch, _) = pose.euler_angles();
        assert_relative_eq!(pitch, 0.4, epsilon = 1e-4);
        assert_relative_eq!(pose.translation.z, 1.5, epsilon = 1e-4);
    }

    #[test]
    fn zero_focal_length_is_rejected() {
        let det = project(
            &Rotation3::identity(),
            &Vector3::new(0.0, 0.0, 1.0),
            600.0,
            600.0,
            320.0,
            240.0,
            0.155,
        );
        assert!(estimate_pose(&det, 0.0, 600.0, 320.0, 240.0, 0.155).is_none());
    }
}
