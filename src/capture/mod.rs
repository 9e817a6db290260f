//! Frame capture sources.
//!
//! This module provides the sources a [`crate::Tracker`] can pull raw
//! grayscale frames from:
//! - V4L2 devices (feature: capture-v4l2)
//! - Synthetic `stub://` fixtures (testing and benches)
//!
//! All sources produce [`Frame`] instances in a grayscale pixel format;
//! format normalization and mirroring happen downstream in
//! [`crate::frame`] before detection.

use anyhow::Result;

use crate::config::CameraSettings;
use crate::frame::Frame;

pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticSource;
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Source;

/// A source of raw frames.
pub trait CaptureSource: Send {
    /// Establish the connection to the underlying device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Whether the source has delivered frames recently.
    fn is_healthy(&self) -> bool;

    fn stats(&self) -> CaptureStats;
}

/// Counters reported by a capture source.
#[derive(Debug, Clone)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Open the capture source named by the camera settings.
///
/// `stub://` strings map to the synthetic fixture source; anything else is
/// treated as a V4L2 device node and requires the `capture-v4l2` feature.
pub fn open_source(settings: &CameraSettings) -> Result<Box<dyn CaptureSource>> {
    if settings.source.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(
            &settings.source,
            settings.width,
            settings.height,
        )));
    }

    #[cfg(feature = "capture-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(settings)?))
    }

    #[cfg(not(feature = "capture-v4l2"))]
    {
        anyhow::bail!(
            "source '{}' requires the capture-v4l2 feature",
            settings.source
        );
    }
}
