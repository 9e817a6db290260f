//! V4L2 frame source.
//!
//! Captures raw grayscale frames from a local device node such as
//! /dev/video0. The device is asked for the GREY (8-bit) format; sensors
//! that only offer a 16-bit grayscale format still work because the frame
//! layer infers the format from the buffer size and narrows it to 8 bits.

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::{CaptureSource, CaptureStats};
use crate::config::CameraSettings;
use crate::frame::Frame;

/// V4L2_CID_EXPOSURE_ABSOLUTE, in units of 100 microseconds.
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

/// V4L2 device source.
pub struct V4l2Source {
    device_path: String,
    width: u32,
    height: u32,
    target_fps: u32,
    exposure_us: Option<u32>,
    state: Option<DeviceState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(settings: &CameraSettings) -> Result<Self> {
        Ok(Self {
            device_path: settings.source.clone(),
            width: settings.width,
            height: settings.height,
            target_fps: settings.target_fps,
            exposure_us: settings.exposure_us,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            active_width: settings.width,
            active_height: settings.height,
        })
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            2_000
        } else {
            (1000 / self.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl CaptureSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"GREY");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.device_path,
                    err
                );
            }
        }

        if let Some(exposure_us) = self.exposure_us {
            let control = v4l::control::Control {
                id: CID_EXPOSURE_ABSOLUTE,
                value: v4l::control::Value::Integer((exposure_us / 100) as i64),
            };
            if let Err(err) = device.set_control(control) {
                log::warn!(
                    "V4l2Source: failed to set exposure on {}: {}",
                    self.device_path,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{})",
            self.device_path,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (buf, meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;
        let data = buf.to_vec();
        let sequence = meta.sequence as u64;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        Ok(Frame {
            data,
            width: self.active_width,
            height: self.active_height,
            sequence,
        })
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count,
            source: self.device_path.clone(),
        }
    }
}
