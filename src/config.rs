use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_SOURCE: &str = "stub://bench";
const DEFAULT_WIDTH: u32 = 1200;
const DEFAULT_HEIGHT: u32 = 800;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_EXPOSURE_US: u32 = 5000;
const DEFAULT_BACKEND: &str = "synthetic";
const DEFAULT_FAMILY: &str = "tag36h11";
const DEFAULT_MARKER_SIZE_M: f64 = 0.05;
const DEFAULT_ALPHA: f64 = 0.35;
const DEFAULT_MAX_GAP_FRAMES: u64 = 15;

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    smoothing: Option<SmoothingConfigFile>,
    calibration: Option<CalibrationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    exposure_us: Option<u32>,
    hflip: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    family: Option<String>,
    marker_size_m: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SmoothingConfigFile {
    alpha: Option<f64>,
    max_gap_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    path: Option<PathBuf>,
}

/// Runtime configuration for a [`crate::Tracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub smoothing: SmoothingSettings,
    pub calibration_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Source string: a device node ("/dev/video0") or "stub://" fixture.
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Absolute exposure in microseconds, applied when the driver supports it.
    pub exposure_us: Option<u32>,
    /// Mirror frames horizontally before detection.
    pub hflip: bool,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub family: String,
    /// Physical marker side length in meters.
    pub marker_size_m: f64,
}

#[derive(Debug, Clone)]
pub struct SmoothingSettings {
    /// EMA weight of the newest sample, in (0, 1].
    pub alpha: f64,
    /// Frames a marker may go unseen before its filter state resets.
    pub max_gap_frames: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::from_file(TrackerConfigFile::default())
    }
}

impl TrackerConfig {
    /// Load configuration from the file named by `TAGTRACK_CONFIG` (if set),
    /// then apply environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TAGTRACK_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(Path::new(path))?,
            None => TrackerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from an explicit path, then apply environment
    /// overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerConfigFile) -> Self {
        let camera = CameraSettings {
            source: file
                .camera
                .as_ref()
                .and_then(|camera| camera.source.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_HEIGHT),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_TARGET_FPS),
            exposure_us: file
                .camera
                .as_ref()
                .and_then(|camera| camera.exposure_us)
                .or(Some(DEFAULT_EXPOSURE_US)),
            hflip: file
                .camera
                .as_ref()
                .and_then(|camera| camera.hflip)
                .unwrap_or(false),
        };
        let detector = DetectorSettings {
            backend: file
                .detector
                .as_ref()
                .and_then(|detector| detector.backend.clone())
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            family: file
                .detector
                .as_ref()
                .and_then(|detector| detector.family.clone())
                .unwrap_or_else(|| DEFAULT_FAMILY.to_string()),
            marker_size_m: file
                .detector
                .as_ref()
                .and_then(|detector| detector.marker_size_m)
                .unwrap_or(DEFAULT_MARKER_SIZE_M),
        };
        let smoothing = SmoothingSettings {
            alpha: file
                .smoothing
                .as_ref()
                .and_then(|smoothing| smoothing.alpha)
                .unwrap_or(DEFAULT_ALPHA),
            max_gap_frames: file
                .smoothing
                .as_ref()
                .and_then(|smoothing| smoothing.max_gap_frames)
                .unwrap_or(DEFAULT_MAX_GAP_FRAMES),
        };
        let calibration_path = file.calibration.and_then(|calibration| calibration.path);
        Self {
            camera,
            detector,
            smoothing,
            calibration_path,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("TAGTRACK_SOURCE") {
            if !source.trim().is_empty() {
                self.camera.source = source;
            }
        }
        if let Ok(backend) = std::env::var("TAGTRACK_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend;
            }
        }
        if let Ok(path) = std::env::var("TAGTRACK_CALIBRATION") {
            if !path.trim().is_empty() {
                self.calibration_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(size) = std::env::var("TAGTRACK_MARKER_SIZE_M") {
            let size: f64 = size
                .parse()
                .map_err(|_| anyhow!("TAGTRACK_MARKER_SIZE_M must be a size in meters"))?;
            self.detector.marker_size_m = size;
        }
        if let Ok(fps) = std::env::var("TAGTRACK_TARGET_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("TAGTRACK_TARGET_FPS must be an integer frame rate"))?;
            self.camera.target_fps = fps;
        }
        Ok(())
    }

    /// Check invariants that would otherwise surface as worker failures.
    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        if (self.camera.width as u64) * (self.camera.height as u64) > u32::MAX as u64 {
            return Err(anyhow!("camera dimensions exceed the frame size limit"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if !(self.smoothing.alpha > 0.0 && self.smoothing.alpha <= 1.0) {
            return Err(anyhow!("smoothing alpha must be in (0, 1]"));
        }
        if self.smoothing.max_gap_frames == 0 {
            return Err(anyhow!("smoothing max_gap_frames must be at least 1"));
        }
        if self.detector.marker_size_m <= 0.0 {
            return Err(anyhow!("marker_size_m must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TrackerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg: TrackerConfigFile =
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(cfg)
}
