//! Frame container and pixel-format normalization.
//!
//! Capture sources hand over whatever the driver produced; the worker loop
//! normalizes every frame to 8-bit grayscale before detection. The format
//! is inferred from the buffer length, mirroring how the capture hardware
//! reports monochrome streams: exactly `w * h` bytes is 8-bit, exactly
//! `2 * w * h` bytes is little-endian 16-bit.

use anyhow::{anyhow, Result};

/// A captured frame as delivered by a [`crate::capture::CaptureSource`].
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Driver-assigned capture sequence number.
    pub sequence: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Gray16,
}

impl PixelFormat {
    /// Infer the pixel format from the buffer length.
    pub fn infer(len: usize, width: u32, height: u32) -> Result<Self> {
        let pixels = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if len == pixels {
            Ok(PixelFormat::Gray8)
        } else if len == pixels * 2 {
            Ok(PixelFormat::Gray16)
        } else {
            Err(anyhow!(
                "unexpected frame size: {} (expected {} or {})",
                len,
                pixels,
                pixels * 2
            ))
        }
    }
}

/// Normalize a frame buffer to 8-bit grayscale.
///
/// 16-bit input is converted by keeping the high byte of each
/// little-endian sample.
pub fn normalize_to_gray(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    match PixelFormat::infer(data.len(), width, height)? {
        PixelFormat::Gray8 => Ok(data.to_vec()),
        PixelFormat::Gray16 => Ok(data.chunks_exact(2).map(|sample| sample[1]).collect()),
    }
}

/// Mirror a grayscale image horizontally in place.
pub fn hflip_in_place(gray: &mut [u8], width: u32) {
    let width = width as usize;
    if width == 0 {
        return;
    }
    for row in gray.chunks_exact_mut(width) {
        row.reverse();
    }
}
