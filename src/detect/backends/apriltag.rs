#![cfg(feature = "backend-apriltag")]

use anyhow::{anyhow, Context, Result};
use apriltag::{DetectorBuilder, Family, Image};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::MarkerObservation;

/// AprilTag backend wrapping the `apriltag` crate.
///
/// This is the production decoder; the tag family is chosen in config
/// (`[detector] family`). Detection here reports corners only; pose
/// estimation goes through the shared planar solver so both backends
/// produce uniform conventions.
pub struct ApriltagBackend {
    detector: apriltag::Detector,
}

impl ApriltagBackend {
    pub fn new(family: &str) -> Result<Self> {
        let family = parse_family(family)?;
        let detector = DetectorBuilder::default()
            .add_family_bits(family, 1)
            .build()
            .context("build apriltag detector")?;
        Ok(Self { detector })
    }
}

fn parse_family(name: &str) -> Result<Family> {
    match name {
        "tag36h11" => Ok(Family::tag_36h11()),
        "tag25h9" => Ok(Family::tag_25h9()),
        "tag16h5" => Ok(Family::tag_16h5()),
        "tagStandard41h12" => Ok(Family::tag_standard_41h12()),
        other => Err(anyhow!(
            "unsupported tag family '{}' (expected tag36h11, tag25h9, tag16h5, or tagStandard41h12)",
            other
        )),
    }
}

impl DetectorBackend for ApriltagBackend {
    fn name(&self) -> &'static str {
        "apriltag"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<MarkerObservation>> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} grayscale bytes, received {}",
                expected,
                pixels.len()
            ));
        }

        let mut image = Image::zeros_with_stride(width as usize, height as usize, width as usize)
            .context("allocate apriltag image")?;
        for y in 0..height as usize {
            for x in 0..width as usize {
                image[(x, y)] = pixels[y * width as usize + x];
            }
        }

        let detections = self.detector.detect(&image);
        let mut observations = Vec::with_capacity(detections.len());
        for det in detections {
            let c = det.corners();
            observations.push(MarkerObservation {
                id: det.id() as u32,
                // The library winds corners counter-clockwise from the
                // bottom-left; remap to top-left first, clockwise.
                corners: [c[3], c[2], c[1], c[0]],
            });
        }
        Ok(observations)
    }
}
