//! Background marker tracker.
//!
//! A [`Tracker`] owns the capture-detect-pose pipeline on a worker thread
//! and publishes the latest result into shared state. Host code polls
//! [`Tracker::latest`] at its own rate; the snapshot it sees is always the
//! most recent fully processed frame, never a partial one.
//!
//! Worker loop per frame:
//! 1. pull a raw frame from the capture source (reconnect on failure)
//! 2. normalize the grayscale format and apply the optional mirror
//! 3. run the configured detector backend
//! 4. solve the planar pose of each marker when a calibration is loaded
//! 5. smooth the poses and publish the snapshot

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::calib::Calibration;
use crate::capture::{open_source, CaptureSource};
use crate::config::TrackerConfig;
use crate::detect::{build_registry, DetectorBackend, TrackedMarker};
use crate::frame::{hflip_in_place, normalize_to_gray};
use crate::pose::solve_marker_pose;
use crate::smoothing::PoseSmoother;

/// Delay before reconnecting after a capture failure.
const RECONNECT_BACKOFF: Duration = Duration::from_millis(250);

/// The most recent fully processed frame.
#[derive(Clone, Debug, Default)]
pub struct DetectionSnapshot {
    /// Capture sequence number of the frame the markers came from.
    pub sequence: u64,
    pub markers: Vec<TrackedMarker>,
}

/// Counters accumulated by the worker thread, including the capture
/// source's own health and frame counters.
#[derive(Clone, Debug, Default)]
pub struct TrackerStats {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub capture_restarts: u64,
    pub detect_failures: u64,
    /// Frames delivered by the capture source, as reported by the source.
    pub frames_captured: u64,
    /// Capture source health at the last loop iteration.
    pub source_healthy: bool,
}

struct Shared {
    latest: Mutex<DetectionSnapshot>,
    stats: Mutex<TrackerStats>,
    calibration: Mutex<Option<Calibration>>,
    running: AtomicBool,
}

/// Marker tracker running the pipeline on a background thread.
pub struct Tracker {
    config: TrackerConfig,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Tracker {
    /// Create a tracker. If the configuration names a calibration file it
    /// is loaded now so pose estimation starts with the first frame.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let calibration = match &config.calibration_path {
            Some(path) => Some(
                Calibration::load(path)
                    .with_context(|| format!("load calibration {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Self {
            config,
            shared: Arc::new(Shared {
                latest: Mutex::new(DetectionSnapshot::default()),
                stats: Mutex::new(TrackerStats::default()),
                calibration: Mutex::new(calibration),
                running: AtomicBool::new(false),
            }),
            worker: None,
        })
    }

    /// Replace the calibration. Takes effect on the next processed frame.
    pub fn set_calibration(&self, calibration: Calibration) {
        *lock_or_recover(&self.shared.calibration) = Some(calibration);
    }

    /// Load a calibration file and install it.
    pub fn load_calibration(&self, path: &std::path::Path) -> Result<()> {
        let calibration = Calibration::load(path)
            .with_context(|| format!("load calibration {}", path.display()))?;
        self.set_calibration(calibration);
        Ok(())
    }

    /// Change the physical marker size. Rejected while the worker runs
    /// because it would mix scales within one smoothing window.
    pub fn set_marker_size(&mut self, marker_size_m: f64) -> Result<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(anyhow!("cannot change marker size while tracker is running"));
        }
        if marker_size_m <= 0.0 {
            return Err(anyhow!("marker_size_m must be greater than zero"));
        }
        self.config.detector.marker_size_m = marker_size_m;
        Ok(())
    }

    /// Start the worker thread.
    pub fn start(&mut self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("tracker already running"));
        }

        let mut source = open_source(&self.config.camera).inspect_err(|_| {
            self.shared.running.store(false, Ordering::SeqCst);
        })?;
        if let Err(err) = source.connect() {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(err.context("connect capture source"));
        }
        let registry = build_registry(&self.config.detector).inspect_err(|_| {
            self.shared.running.store(false, Ordering::SeqCst);
        })?;
        let backend = match registry.default_backend() {
            Some(backend) => backend,
            None => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(anyhow!("no detector backend registered"));
            }
        };
        if let Err(err) = lock_or_recover(&backend).warm_up() {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(err.context("warm up detector backend"));
        }

        let config = self.config.clone();
        let shared = self.shared.clone();
        let worker = std::thread::spawn(move || {
            run_pipeline(config, source, backend, shared);
        });
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop the worker thread and wait for it. Idempotent.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("tracker worker thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Latest published snapshot. Non-blocking apart from the brief copy
    /// under the snapshot mutex.
    pub fn latest(&self) -> DetectionSnapshot {
        lock_or_recover(&self.shared.latest).clone()
    }

    pub fn stats(&self) -> TrackerStats {
        lock_or_recover(&self.shared.stats).clone()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_or_recover<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn run_pipeline(
    config: TrackerConfig,
    mut source: Box<dyn CaptureSource>,
    backend: Arc<Mutex<dyn DetectorBackend>>,
    shared: Arc<Shared>,
) {
    let mut smoother = PoseSmoother::new(&config.smoothing);
    let frame_interval = if config.camera.target_fps > 0 {
        Duration::from_secs(1) / config.camera.target_fps
    } else {
        Duration::ZERO
    };

    while shared.running.load(Ordering::SeqCst) {
        let started = Instant::now();

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("capture failed, reconnecting: {:#}", err);
                {
                    let mut stats = lock_or_recover(&shared.stats);
                    stats.capture_restarts += 1;
                    stats.source_healthy = source.is_healthy();
                }
                std::thread::sleep(RECONNECT_BACKOFF);
                if let Err(err) = source.connect() {
                    log::warn!("capture reconnect failed: {:#}", err);
                }
                continue;
            }
        };

        let mut gray = match normalize_to_gray(&frame.data, frame.width, frame.height) {
            Ok(gray) => gray,
            Err(err) => {
                log::warn!("dropping frame {}: {:#}", frame.sequence, err);
                lock_or_recover(&shared.stats).frames_skipped += 1;
                continue;
            }
        };
        if config.camera.hflip {
            hflip_in_place(&mut gray, frame.width);
        }

        let observations = {
            let mut backend = lock_or_recover(&backend);
            backend.detect(&gray, frame.width, frame.height)
        };
        let observations = match observations {
            Ok(observations) => observations,
            Err(err) => {
                log::warn!("detection failed on frame {}: {:#}", frame.sequence, err);
                lock_or_recover(&shared.stats).detect_failures += 1;
                continue;
            }
        };

        let calibration = lock_or_recover(&shared.calibration).clone();
        let mut markers: Vec<TrackedMarker> = observations
            .into_iter()
            .map(|obs| {
                let pose = calibration.as_ref().and_then(|calib| {
                    solve_marker_pose(&obs.corners, calib, config.detector.marker_size_m)
                });
                TrackedMarker::from_observation(obs, pose)
            })
            .collect();
        smoother.apply(frame.sequence, &mut markers);

        {
            let mut latest = lock_or_recover(&shared.latest);
            latest.sequence = frame.sequence;
            latest.markers = markers;
        }
        {
            let capture = source.stats();
            let mut stats = lock_or_recover(&shared.stats);
            stats.frames_processed += 1;
            stats.frames_captured = capture.frames_captured;
            stats.source_healthy = source.is_healthy();
        }

        if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> TrackerConfig {
        let mut config = TrackerConfig::default();
        config.camera.source = "stub://test#9".to_string();
        config.camera.width = 640;
        config.camera.height = 480;
        config.camera.target_fps = 200;
        config
    }

    #[test]
    fn lock_helper_accepts_trait_objects() {
        let backend: Arc<Mutex<dyn DetectorBackend>> =
            Arc::new(Mutex::new(crate::detect::SyntheticBackend::new()));
        assert_eq!(lock_or_recover(&backend).name(), "synthetic");
    }

    #[test]
    fn start_twice_is_an_error() {
        let mut tracker = Tracker::new(stub_config()).unwrap();
        tracker.start().unwrap();
        let err = tracker.start().unwrap_err();
        assert!(err.to_string().contains("already running"));
        tracker.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let mut tracker = Tracker::new(stub_config()).unwrap();
        tracker.start().unwrap();
        tracker.stop();
        tracker.stop();
        assert!(!tracker.is_running());
    }

    #[test]
    fn marker_size_is_locked_while_running() {
        let mut tracker = Tracker::new(stub_config()).unwrap();
        tracker.set_marker_size(0.1).unwrap();
        tracker.start().unwrap();
        assert!(tracker.set_marker_size(0.2).is_err());
        tracker.stop();
        tracker.set_marker_size(0.2).unwrap();
    }

    #[test]
    fn rejects_unknown_backend() {
        let mut config = stub_config();
        config.detector.backend = "nope".to_string();
        let mut tracker = Tracker::new(config).unwrap();
        assert!(tracker.start().is_err());
        assert!(!tracker.is_running());
    }

    #[test]
    fn publishes_detections_from_stub_source() {
        let mut tracker = Tracker::new(stub_config()).unwrap();
        tracker.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let snapshot = loop {
            let snapshot = tracker.latest();
            if !snapshot.markers.is_empty() {
                break snapshot;
            }
            assert!(Instant::now() < deadline, "no detections within deadline");
            std::thread::sleep(Duration::from_millis(10));
        };
        tracker.stop();

        assert_eq!(snapshot.markers[0].id, 9);
        // No calibration was loaded.
        assert!(snapshot.markers[0].pose.is_none());
        let stats = tracker.stats();
        assert!(stats.frames_processed > 0);
        assert!(stats.frames_captured >= stats.frames_processed);
        assert!(stats.source_healthy);
    }
}
