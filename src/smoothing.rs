//! Exponential smoothing of per-marker poses.
//!
//! Raw single-frame poses jitter, especially the rotation of a
//! near-fronto-parallel marker. The smoother keeps one exponential moving
//! average per marker id and blends each new pose into it. A marker that
//! has not been seen for more than `max_gap_frames` frames restarts from
//! the new pose instead of dragging stale state across the gap.

use std::collections::HashMap;

use crate::config::SmoothingSettings;
use crate::detect::TrackedMarker;

struct SmoothState {
    rvec: [f64; 3],
    tvec: [f64; 3],
    last_sequence: u64,
}

pub struct PoseSmoother {
    alpha: f64,
    max_gap_frames: u64,
    states: HashMap<u32, SmoothState>,
}

impl PoseSmoother {
    pub fn new(settings: &SmoothingSettings) -> Self {
        Self {
            alpha: settings.alpha,
            max_gap_frames: settings.max_gap_frames,
            states: HashMap::new(),
        }
    }

    /// Smooth the poses of the markers seen in frame `sequence` in place,
    /// then drop state for markers that have been gone too long.
    pub fn apply(&mut self, sequence: u64, markers: &mut [TrackedMarker]) {
        for marker in markers.iter_mut() {
            let Some(pose) = marker.pose.as_mut() else {
                continue;
            };
            match self.states.get_mut(&marker.id) {
                Some(state) if sequence.saturating_sub(state.last_sequence) <= self.max_gap_frames => {
                    // Axis-angle encodings flip sign when the rotation
                    // angle wraps at pi; align before blending so the two
                    // encodings of the same rotation do not cancel out.
                    // Small opposing rotations are genuine motion and are
                    // left alone.
                    let wrapped = norm3(&pose.rvec) + norm3(&state.rvec) > std::f64::consts::PI;
                    if wrapped && dot3(&pose.rvec, &state.rvec) < 0.0 {
                        for component in pose.rvec.iter_mut() {
                            *component = -*component;
                        }
                    }
                    state.rvec = blend(self.alpha, &pose.rvec, &state.rvec);
                    state.tvec = blend(self.alpha, &pose.tvec, &state.tvec);
                    state.last_sequence = sequence;
                    pose.rvec = state.rvec;
                    pose.tvec = state.tvec;
                }
                _ => {
                    self.states.insert(
                        marker.id,
                        SmoothState {
                            rvec: pose.rvec,
                            tvec: pose.tvec,
                            last_sequence: sequence,
                        },
                    );
                }
            }
        }

        let max_gap = self.max_gap_frames;
        self.states
            .retain(|_, state| sequence.saturating_sub(state.last_sequence) <= max_gap);
    }
}

fn blend(alpha: f64, new: &[f64; 3], prev: &[f64; 3]) -> [f64; 3] {
    [
        alpha * new[0] + (1.0 - alpha) * prev[0],
        alpha * new[1] + (1.0 - alpha) * prev[1],
        alpha * new[2] + (1.0 - alpha) * prev[2],
    ]
}

fn dot3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm3(v: &[f64; 3]) -> f64 {
    dot3(v, v).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::MarkerPose;

    fn settings(alpha: f64, max_gap_frames: u64) -> SmoothingSettings {
        SmoothingSettings {
            alpha,
            max_gap_frames,
        }
    }

    fn marker(id: u32, rvec: [f64; 3], tvec: [f64; 3]) -> TrackedMarker {
        TrackedMarker {
            id,
            corners: [[0.0; 2]; 4],
            pose: Some(MarkerPose { rvec, tvec }),
        }
    }

    #[test]
    fn first_observation_passes_through() {
        let mut smoother = PoseSmoother::new(&settings(0.3, 10));
        let mut markers = vec![marker(7, [0.1, 0.2, 0.3], [0.0, 0.0, 0.5])];
        smoother.apply(0, &mut markers);
        let pose = markers[0].pose.as_ref().unwrap();
        assert_eq!(pose.rvec, [0.1, 0.2, 0.3]);
        assert_eq!(pose.tvec, [0.0, 0.0, 0.5]);
    }

    #[test]
    fn converges_toward_constant_pose() {
        let mut smoother = PoseSmoother::new(&settings(0.5, 10));
        let mut markers = vec![marker(3, [0.0; 3], [0.0, 0.0, 1.0])];
        smoother.apply(0, &mut markers);

        for seq in 1..20 {
            markers = vec![marker(3, [0.0; 3], [0.0, 0.0, 2.0])];
            smoother.apply(seq, &mut markers);
        }
        let z = markers[0].pose.as_ref().unwrap().tvec[2];
        assert!((z - 2.0).abs() < 1e-4, "z = {z}");
    }

    #[test]
    fn blends_with_configured_alpha() {
        let mut smoother = PoseSmoother::new(&settings(0.25, 10));
        let mut markers = vec![marker(1, [0.0; 3], [0.0, 0.0, 1.0])];
        smoother.apply(0, &mut markers);

        markers = vec![marker(1, [0.0; 3], [0.0, 0.0, 2.0])];
        smoother.apply(1, &mut markers);
        let z = markers[0].pose.as_ref().unwrap().tvec[2];
        assert!((z - 1.25).abs() < 1e-12);
    }

    #[test]
    fn long_gap_resets_state() {
        let mut smoother = PoseSmoother::new(&settings(0.5, 3));
        let mut markers = vec![marker(9, [0.0; 3], [0.0, 0.0, 1.0])];
        smoother.apply(0, &mut markers);

        // Gap of 10 frames exceeds max_gap_frames = 3.
        markers = vec![marker(9, [0.0; 3], [0.0, 0.0, 5.0])];
        smoother.apply(10, &mut markers);
        let z = markers[0].pose.as_ref().unwrap().tvec[2];
        assert_eq!(z, 5.0);
    }

    #[test]
    fn aligns_flipped_axis_angle_near_pi() {
        let mut smoother = PoseSmoother::new(&settings(0.5, 10));
        let mut markers = vec![marker(2, [3.0, 0.0, 0.0], [0.0, 0.0, 1.0])];
        smoother.apply(0, &mut markers);

        // Nearly the same rotation, re-encoded with the opposite sign
        // after wrapping at pi.
        markers = vec![marker(2, [-3.0, 0.0, 0.0], [0.0, 0.0, 1.0])];
        smoother.apply(1, &mut markers);
        let rvec = markers[0].pose.as_ref().unwrap().rvec;
        assert_eq!(rvec, [3.0, 0.0, 0.0]);
    }

    #[test]
    fn small_tilt_through_zero_is_not_flipped() {
        let mut smoother = PoseSmoother::new(&settings(0.5, 10));
        let mut markers = vec![marker(2, [0.1, 0.0, 0.0], [0.0, 0.0, 1.0])];
        smoother.apply(0, &mut markers);

        // A marker genuinely tilting past flat: the new rotation opposes
        // the old one and must blend through zero, not snap back.
        markers = vec![marker(2, [-0.1, 0.0, 0.0], [0.0, 0.0, 1.0])];
        smoother.apply(1, &mut markers);
        let rvec = markers[0].pose.as_ref().unwrap().rvec;
        assert!(rvec[0].abs() < 1e-12, "rvec[0] = {}", rvec[0]);
    }

    #[test]
    fn markers_without_pose_are_left_alone() {
        let mut smoother = PoseSmoother::new(&settings(0.5, 10));
        let mut markers = vec![TrackedMarker {
            id: 4,
            corners: [[0.0; 2]; 4],
            pose: None,
        }];
        smoother.apply(0, &mut markers);
        assert!(markers[0].pose.is_none());
    }
}
