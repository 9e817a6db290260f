mod backend;
mod backends;
mod registry;
mod result;

use anyhow::Result;

use crate::config::DetectorSettings;

pub use backend::DetectorBackend;
pub use backends::SyntheticBackend;
pub use registry::BackendRegistry;
pub use result::{MarkerObservation, MarkerPose, TrackedMarker};

#[cfg(feature = "backend-apriltag")]
pub use backends::ApriltagBackend;

/// Build a registry with every compiled-in backend registered and the
/// configured backend selected as default.
pub fn build_registry(settings: &DetectorSettings) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(SyntheticBackend::new());
    #[cfg(feature = "backend-apriltag")]
    registry.register(ApriltagBackend::new(&settings.family)?);
    registry.set_default(&settings.backend)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_registry_honors_configured_backend() {
        let settings = DetectorSettings {
            backend: "synthetic".to_string(),
            family: "tag36h11".to_string(),
            marker_size_m: 0.05,
        };
        let registry = build_registry(&settings).unwrap();
        let backend = registry.default_backend().unwrap();
        assert_eq!(backend.lock().unwrap().name(), "synthetic");
    }

    #[test]
    fn build_registry_rejects_unknown_backend() {
        let settings = DetectorSettings {
            backend: "nope".to_string(),
            family: "tag36h11".to_string(),
            marker_size_m: 0.05,
        };
        assert!(build_registry(&settings).is_err());
    }
}
