//! Fiducial marker tracking pipeline.
//!
//! This crate captures camera frames, detects square fiducial markers,
//! solves their 3D poses against camera calibration, and republishes the
//! latest results for a polling host application.
//!
//! # Architecture
//!
//! A single worker thread runs the capture loop:
//!
//! 1. Pull the next frame from the configured [`capture::CaptureSource`]
//! 2. Normalize the pixel format to 8-bit grayscale
//! 3. Run the configured [`detect::DetectorBackend`]
//! 4. Solve a planar pose per marker when calibration is loaded
//! 5. Smooth poses with a per-marker exponential moving average
//! 6. Replace the shared snapshot in a single mutex-guarded assignment
//!
//! The host polls [`Tracker::latest`] for the most recent snapshot. That
//! mutex handoff is the only cross-thread coordination in the crate.
//!
//! # Module Structure
//!
//! - `config`: TOML configuration with environment overrides
//! - `calib`: camera intrinsics and distortion coefficients
//! - `frame`: frame container and pixel-format normalization
//! - `capture`: frame sources (V4L2 devices, synthetic fixture)
//! - `detect`: marker detector backends and result types
//! - `pose`: planar pose estimation from marker corners
//! - `smoothing`: exponential moving average over poses
//! - `tracker`: worker loop and the polling handle

pub mod calib;
pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod pose;
pub mod smoothing;
pub mod tracker;

pub use calib::Calibration;
pub use capture::{CaptureSource, CaptureStats};
pub use config::{CameraSettings, DetectorSettings, SmoothingSettings, TrackerConfig};
pub use detect::{
    BackendRegistry, DetectorBackend, MarkerObservation, MarkerPose, SyntheticBackend,
    TrackedMarker,
};
pub use frame::{Frame, PixelFormat};
pub use tracker::{DetectionSnapshot, Tracker, TrackerStats};

#[cfg(feature = "backend-apriltag")]
pub use detect::ApriltagBackend;
#[cfg(feature = "capture-v4l2")]
pub use capture::V4l2Source;
