pub mod synthetic;

#[cfg(feature = "backend-apriltag")]
pub mod apriltag;

pub use synthetic::SyntheticBackend;

#[cfg(feature = "backend-apriltag")]
pub use apriltag::ApriltagBackend;
