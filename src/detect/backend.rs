use anyhow::Result;

use crate::detect::result::MarkerObservation;

/// Marker detector backend trait.
///
/// Backends receive 8-bit grayscale pixels and report marker observations.
/// Implementations must treat the pixel slice as read-only and ephemeral;
/// the worker loop owns the buffer and reuses it.
pub trait DetectorBackend: Send {
    /// Backend identifier, used for registry lookup and logging.
    fn name(&self) -> &'static str;

    /// Detect markers in a grayscale frame.
    ///
    /// Corners are reported in top-left, top-right, bottom-right,
    /// bottom-left order regardless of the underlying library's winding.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32)
        -> Result<Vec<MarkerObservation>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
