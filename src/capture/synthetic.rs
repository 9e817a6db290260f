//! Synthetic capture source for `stub://` source strings.
//!
//! Renders a deterministic grayscale scene containing one encoded square
//! marker that translates across the frame. The scene layout is a shared
//! contract with [`crate::detect::SyntheticBackend`], which decodes it:
//!
//! - background sits near [`BACKGROUND_LEVEL`] with mild sensor noise
//! - the marker is a filled square at [`MARKER_LEVEL`]
//! - the marker id is an 8-bit strip across the square's vertical center,
//!   MSB first, where a darkened cell means the bit is set

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{CaptureSource, CaptureStats};
use crate::frame::Frame;

/// Background gray level of the synthetic scene.
pub(crate) const BACKGROUND_LEVEL: u8 = 16;
/// Fill level of the marker square.
pub(crate) const MARKER_LEVEL: u8 = 230;
/// Threshold separating marker pixels from background.
pub(crate) const BRIGHT_THRESHOLD: u8 = 128;
/// Number of id bits encoded in the strip.
pub(crate) const ID_BITS: u32 = 8;

const MARGIN: u32 = 10;
const STEP_PX: u64 = 2;

/// Synthetic frame source.
pub struct SyntheticSource {
    source: String,
    width: u32,
    height: u32,
    marker_id: u32,
    frame_count: u64,
    rng: StdRng,
}

impl SyntheticSource {
    /// Create a source for a `stub://` string. The fragment after the last
    /// `#` selects the marker id (default 7), e.g. `stub://bench#23`.
    pub fn new(source: &str, width: u32, height: u32) -> Self {
        let marker_id = source
            .rsplit_once('#')
            .and_then(|(_, id)| id.parse().ok())
            .unwrap_or(7u32)
            & ((1 << ID_BITS) - 1);
        Self {
            source: source.to_string(),
            width,
            height,
            marker_id,
            frame_count: 0,
            rng: StdRng::seed_from_u64(0x7461_6774),
        }
    }

}

impl CaptureSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.source);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let side = fixture_side(self.width, self.height);
        let travel = self.width.saturating_sub(side + 2 * MARGIN).max(1) as u64;
        let x0 = MARGIN + ((self.frame_count * STEP_PX) % travel) as u32;
        let y0 = self.height.saturating_sub(side) / 2;

        let pixels = (self.width as usize)
            .checked_mul(self.height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let mut data = vec![0u8; pixels];
        for px in data.iter_mut() {
            *px = BACKGROUND_LEVEL + self.rng.gen_range(0..8);
        }
        render_fixture_marker(&mut data, self.width, side, x0, y0, self.marker_id);

        let sequence = self.frame_count;
        self.frame_count += 1;
        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            sequence,
        })
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            source: self.source.clone(),
        }
    }
}

/// Marker side length used by the fixture: a multiple of the id-strip cell
/// count, at least 32 pixels.
pub(crate) fn fixture_side(width: u32, height: u32) -> u32 {
    let side = (width.min(height) / 4) & !(ID_BITS - 1);
    side.max(32)
}

/// Draw the fixture marker into a grayscale buffer.
pub(crate) fn render_fixture_marker(
    data: &mut [u8],
    width: u32,
    side: u32,
    x0: u32,
    y0: u32,
    id: u32,
) {
    let w = width as usize;
    let h = if w == 0 { 0 } else { data.len() / w };
    for y in y0..(y0 + side).min(h as u32) {
        let row = y as usize * w;
        for x in x0..(x0 + side).min(width) {
            data[row + x as usize] = MARKER_LEVEL;
        }
    }

    // Id strip: a band across the vertical center, one cell per bit.
    let cell = side / ID_BITS;
    let strip_y0 = y0 + side / 2 - cell / 2;
    for bit in 0..ID_BITS {
        if id & (1 << (ID_BITS - 1 - bit)) == 0 {
            continue;
        }
        for y in strip_y0..(strip_y0 + cell).min(h as u32) {
            let row = y as usize * w;
            for x in (x0 + bit * cell)..(x0 + (bit + 1) * cell).min(width) {
                data[row + x as usize] = BACKGROUND_LEVEL;
            }
        }
    }
}
