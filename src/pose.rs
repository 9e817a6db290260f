//! Planar pose estimation for square markers.
//!
//! Given the four image corners of a marker of known physical size and the
//! camera calibration, recover the marker pose (rotation vector +
//! translation vector, camera frame). The pipeline is the classic planar
//! one: undistort the corners, estimate the homography from the marker's
//! model square to normalized image coordinates with a 4-point DLT, and
//! decompose it into rotation and translation. The rotation is
//! orthonormalized via SVD before being reported as an axis-angle vector.
//!
//! Model frame: marker centered at the origin in the z = 0 plane, x right,
//! y down, corners ordered top-left, top-right, bottom-right, bottom-left.

use nalgebra::{Matrix3, Rotation3, SMatrix, SVector, Vector3};

use crate::calib::Calibration;
use crate::detect::MarkerPose;

const UNDISTORT_ITERATIONS: usize = 8;

/// Solve the pose of one marker from its image corners.
///
/// Returns `None` when the corner configuration is degenerate (collinear
/// or repeated corners yield no homography).
pub fn solve_marker_pose(
    corners: &[[f64; 2]; 4],
    calib: &Calibration,
    marker_size: f64,
) -> Option<MarkerPose> {
    let half = marker_size / 2.0;
    let model = [
        [-half, -half],
        [half, -half],
        [half, half],
        [-half, half],
    ];

    let mut normalized = [[0.0f64; 2]; 4];
    for (out, corner) in normalized.iter_mut().zip(corners.iter()) {
        *out = undistort_point(corner[0], corner[1], calib);
    }

    let h = homography_from_4pt(&model, &normalized)?;

    // H = [r1 r2 t] up to scale in normalized coordinates.
    let h1 = Vector3::new(h[(0, 0)], h[(1, 0)], h[(2, 0)]);
    let h2 = Vector3::new(h[(0, 1)], h[(1, 1)], h[(2, 1)]);
    let h3 = Vector3::new(h[(0, 2)], h[(1, 2)], h[(2, 2)]);

    let n1 = h1.norm();
    let n2 = h2.norm();
    if n1 < 1e-12 || n2 < 1e-12 {
        return None;
    }
    let scale = 2.0 / (n1 + n2);

    let mut r1 = h1 * scale;
    let mut r2 = h2 * scale;
    let mut t = h3 * scale;

    // The homography is defined up to sign; the marker must sit in front
    // of the camera.
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }

    let r3 = r1.cross(&r2);
    let approx = Matrix3::from_columns(&[r1, r2, r3]);

    // Nearest rotation matrix in the Frobenius sense.
    let svd = approx.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        rotation = u * v_t;
    }

    let rvec = Rotation3::from_matrix_unchecked(rotation).scaled_axis();
    Some(MarkerPose {
        rvec: [rvec.x, rvec.y, rvec.z],
        tvec: [t.x, t.y, t.z],
    })
}

/// Undistort a pixel coordinate into the normalized image plane by
/// iteratively inverting the k1/k2/p1/p2 model.
pub fn undistort_point(u: f64, v: f64, calib: &Calibration) -> [f64; 2] {
    let [k1, k2, p1, p2] = calib.dist_coeffs();
    let x0 = (u - calib.cx()) / calib.fx();
    let y0 = (v - calib.cy()) / calib.fy();

    let mut x = x0;
    let mut y = y0;
    for _ in 0..UNDISTORT_ITERATIONS {
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
        let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        if radial.abs() < 1e-12 {
            break;
        }
        x = (x0 - dx) / radial;
        y = (y0 - dy) / radial;
    }
    [x, y]
}

/// Compute H such that `dst ~ H * src` from 4 point correspondences, with
/// Hartley normalization for conditioning.
///
/// Unknowns are the first 8 entries of H with `h33 = 1`; each
/// correspondence (x, y) -> (u, v) contributes two linear equations.
fn homography_from_4pt(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Option<Matrix3<f64>> {
    let (src_n, t_src) = normalize_points4(src);
    let (dst_n, t_dst) = normalize_points4(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let [x, y] = src_n[k];
        let [u, v] = dst_n[k];

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
    let hn = Matrix3::new(x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0);

    let t_dst_inv = t_dst.try_inverse()?;
    let h = t_dst_inv * hn * t_src;
    let s = h[(2, 2)];
    if s.abs() < 1e-12 {
        return None;
    }
    Some(h / s)
}

/// Hartley normalization: translate to the centroid and scale so the mean
/// distance from it is sqrt(2).
fn normalize_points4(pts: &[[f64; 2]; 4]) -> ([[f64; 2]; 4], Matrix3<f64>) {
    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in pts {
        cx += p[0];
        cy += p[1];
    }
    cx /= 4.0;
    cy /= 4.0;

    let mut mean_dist = 0.0;
    for p in pts {
        let dx = p[0] - cx;
        let dy = p[1] - cy;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= 4.0;

    let s = if mean_dist > 1e-12 {
        (2.0f64).sqrt() / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);

    let mut out = [[0.0; 2]; 4];
    for (i, p) in pts.iter().enumerate() {
        out[i] = [s * p[0] - s * cx, s * p[1] - s * cy];
    }
    (out, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_calib(dist: [f64; 4]) -> Calibration {
        let mut calib = Calibration::from_flat(&[
            800.0, 0.0, 600.0, //
            0.0, 800.0, 400.0, //
            0.0, 0.0, 1.0,
        ])
        .unwrap();
        calib.set_dist_coeffs(&dist).unwrap();
        calib
    }

    /// Project the model corners of a marker through a known pose,
    /// applying forward distortion.
    fn project_corners(
        rvec: Vector3<f64>,
        tvec: Vector3<f64>,
        calib: &Calibration,
        marker_size: f64,
    ) -> [[f64; 2]; 4] {
        let rotation = Rotation3::from_scaled_axis(rvec);
        let half = marker_size / 2.0;
        let model = [
            Vector3::new(-half, -half, 0.0),
            Vector3::new(half, -half, 0.0),
            Vector3::new(half, half, 0.0),
            Vector3::new(-half, half, 0.0),
        ];
        let [k1, k2, p1, p2] = calib.dist_coeffs();
        let mut out = [[0.0; 2]; 4];
        for (i, point) in model.iter().enumerate() {
            let cam = rotation * point + tvec;
            let x = cam.x / cam.z;
            let y = cam.y / cam.z;
            let r2 = x * x + y * y;
            let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
            let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            out[i] = [
                calib.fx() * xd + calib.cx(),
                calib.fy() * yd + calib.cy(),
            ];
        }
        out
    }

    #[test]
    fn recovers_known_pose_without_distortion() {
        let calib = test_calib([0.0; 4]);
        let rvec = Vector3::new(0.2, -0.1, 0.05);
        let tvec = Vector3::new(0.03, -0.02, 0.5);
        let corners = project_corners(rvec, tvec, &calib, 0.05);

        let pose = solve_marker_pose(&corners, &calib, 0.05).unwrap();
        for i in 0..3 {
            assert_relative_eq!(pose.tvec[i], tvec[i], epsilon = 1e-6);
            assert_relative_eq!(pose.rvec[i], rvec[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn recovers_known_pose_with_distortion() {
        let calib = test_calib([0.08, -0.03, 0.001, -0.0005]);
        let rvec = Vector3::new(-0.15, 0.25, 0.0);
        let tvec = Vector3::new(-0.01, 0.04, 0.7);
        let corners = project_corners(rvec, tvec, &calib, 0.05);

        let pose = solve_marker_pose(&corners, &calib, 0.05).unwrap();
        for i in 0..3 {
            assert_relative_eq!(pose.tvec[i], tvec[i], epsilon = 1e-3);
            assert_relative_eq!(pose.rvec[i], rvec[i], epsilon = 1e-3);
        }
    }

    #[test]
    fn fronto_parallel_marker_reports_forward_translation() {
        let calib = test_calib([0.0; 4]);
        let corners = [
            [560.0, 360.0],
            [640.0, 360.0],
            [640.0, 440.0],
            [560.0, 440.0],
        ];
        let pose = solve_marker_pose(&corners, &calib, 0.05).unwrap();
        // 80 px at fx=800 and 0.05 m side: z = 0.05 * 800 / 80 = 0.5 m.
        assert_relative_eq!(pose.tvec[2], 0.5, epsilon = 1e-6);
        assert_relative_eq!(pose.tvec[0], 0.0, epsilon = 1e-9);
        assert!(pose.rvec.iter().all(|component| component.abs() < 1e-6));
    }

    #[test]
    fn degenerate_corners_yield_no_pose() {
        let calib = test_calib([0.0; 4]);
        let corners = [[100.0, 100.0]; 4];
        assert!(solve_marker_pose(&corners, &calib, 0.05).is_none());
    }

    #[test]
    fn undistort_is_identity_with_zero_coefficients() {
        let calib = test_calib([0.0; 4]);
        let [x, y] = undistort_point(700.0, 300.0, &calib);
        assert_relative_eq!(x, (700.0 - 600.0) / 800.0, epsilon = 1e-12);
        assert_relative_eq!(y, (300.0 - 400.0) / 800.0, epsilon = 1e-12);
    }
}
