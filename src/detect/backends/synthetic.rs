use anyhow::Result;

use crate::capture::synthetic::{BRIGHT_THRESHOLD, ID_BITS};
use crate::detect::backend::DetectorBackend;
use crate::detect::result::MarkerObservation;

/// Smallest marker edge the decoder accepts, in pixels. Guards against
/// stray bright pixels being read as a marker.
const MIN_SIDE_PX: u32 = 16;

/// Decoder for the synthetic fixture scene rendered by
/// [`crate::capture::SyntheticSource`]: at most one bright square whose id
/// is encoded in an 8-bit strip across its vertical center.
///
/// This backend exists for tests and bench configs; production decoding
/// goes through the `backend-apriltag` feature.
pub struct SyntheticBackend;

impl SyntheticBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<MarkerObservation>> {
        let w = width as usize;
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;

        for y in 0..height {
            let row = y as usize * w;
            for x in 0..width {
                if pixels[row + x as usize] > BRIGHT_THRESHOLD {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        if min_x == u32::MAX {
            return Ok(vec![]);
        }
        let side_x = max_x - min_x + 1;
        let side_y = max_y - min_y + 1;
        if side_x < MIN_SIDE_PX || side_y < MIN_SIDE_PX {
            return Ok(vec![]);
        }

        // Read the id strip along the square's center row, MSB first.
        let center_y = ((min_y + max_y) / 2) as usize;
        let mut id = 0u32;
        for bit in 0..ID_BITS {
            let sample_x = min_x as f64 + (bit as f64 + 0.5) * side_x as f64 / ID_BITS as f64;
            let sample = pixels[center_y * w + sample_x as usize];
            if sample <= BRIGHT_THRESHOLD {
                id |= 1 << (ID_BITS - 1 - bit);
            }
        }

        let (min_x, min_y, max_x, max_y) =
            (min_x as f64, min_y as f64, max_x as f64, max_y as f64);
        Ok(vec![MarkerObservation {
            id,
            corners: [
                [min_x, min_y],
                [max_x, min_y],
                [max_x, max_y],
                [min_x, max_y],
            ],
        }])
    }
}
