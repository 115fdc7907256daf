//! Planar homography between tag coordinates and image pixels.

use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

#[derive(Clone, Copy, Debug)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }
}

/// Exact homography from four correspondences, `h33 = 1` normalization.
///
/// For each `(x, y) -> (u, v)`:
/// `h11 x + h12 y + h13 - u h31 x - u h32 y = u`
/// `h21 x + h22 y + h23 - v h31 x - v h32 y = v`
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let (x, y) = (src[k].x, src[k].y);
        let (u, v) = (dst[k].x, dst[k].y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;

    Some(Homography::new(Matrix3::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_an_affine_map() {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ];
        let dst = src.map(|p| Point2::new(2.0 * p.x + 5.0, 3.0 * p.y - 1.0));
        let h = homography_from_4pt(&src, &dst).expect("solvable");

        let q = h.apply(Point2::new(4.0, 7.0));
        assert_relative_eq!(q.x, 13.0, epsilon = 1e-9);
        assert_relative_eq!(q.y, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn maps_corners_exactly() {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let dst = [
            Point2::new(31.0, 18.0),
            Point2::new(92.0, 25.0),
            Point2::new(88.0, 83.0),
            Point2::new(27.0, 76.0),
        ];
        let h = homography_from_4pt(&src, &dst).expect("solvable");
        for k in 0..4 {
            let q = h.apply(src[k]);
            assert_relative_eq!(q.x, dst[k].x, epsilon = 1e-6);
            assert_relative_eq!(q.y, dst[k].y, epsilon = 1e-6);
        }
    }

    #[test]
    fn degenerate_points_fail() {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(3.0, 0.0),
        ];
        let dst = src;
        assert!(homography_from_4pt(&src, &dst).is_none());
    }
}
