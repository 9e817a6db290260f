use serde::{Deserialize, Serialize};

/// A detected marker before pose estimation: the tag id and its four image
/// corners in pixel coordinates, ordered top-left, top-right, bottom-right,
/// bottom-left.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarkerObservation {
    pub id: u32,
    pub corners: [[f64; 2]; 4],
}

/// A marker pose relative to the camera: Rodrigues rotation vector and
/// translation vector in meters, camera frame (x right, y down, z forward).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarkerPose {
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

/// A fully processed marker as published to the polling host.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackedMarker {
    pub id: u32,
    pub corners: [[f64; 2]; 4],
    /// `None` until a calibration is loaded.
    pub pose: Option<MarkerPose>,
}

impl TrackedMarker {
    pub fn from_observation(obs: MarkerObservation, pose: Option<MarkerPose>) -> Self {
        Self {
            id: obs.id,
            corners: obs.corners,
            pose,
        }
    }
}
