//! End-to-end pipeline test against the synthetic fixture source.

use std::io::Write;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use tagtrack::{Calibration, DetectionSnapshot, Tracker, TrackerConfig};

fn stub_config(source: &str) -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.camera.source = source.to_string();
    config.camera.width = 640;
    config.camera.height = 480;
    config.camera.target_fps = 200;
    config
}

fn wait_for_markers(tracker: &Tracker, timeout: Duration) -> DetectionSnapshot {
    let deadline = Instant::now() + timeout;
    loop {
        let snapshot = tracker.latest();
        if !snapshot.markers.is_empty() {
            return snapshot;
        }
        assert!(
            Instant::now() < deadline,
            "no detections within {:?}",
            timeout
        );
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn detects_fixture_marker_without_calibration() {
    let mut tracker = Tracker::new(stub_config("stub://bench#42")).expect("create tracker");
    tracker.start().expect("start tracker");

    let snapshot = wait_for_markers(&tracker, Duration::from_secs(5));
    tracker.stop();

    assert_eq!(snapshot.markers.len(), 1);
    let marker = &snapshot.markers[0];
    assert_eq!(marker.id, 42);
    assert!(marker.pose.is_none(), "pose requires a calibration");

    // Corners stay inside the frame and are ordered clockwise from
    // top-left.
    for corner in &marker.corners {
        assert!(corner[0] >= 0.0 && corner[0] < 640.0);
        assert!(corner[1] >= 0.0 && corner[1] < 480.0);
    }
    assert!(marker.corners[1][0] > marker.corners[0][0]);
    assert!(marker.corners[2][1] > marker.corners[1][1]);

    let stats = tracker.stats();
    assert!(stats.frames_processed > 0);
    assert_eq!(stats.detect_failures, 0);
    assert!(stats.frames_captured >= stats.frames_processed);
    assert!(stats.source_healthy);
}

#[test]
fn estimates_pose_once_calibrated() {
    let mut tracker = Tracker::new(stub_config("stub://bench#7")).expect("create tracker");
    let calibration = Calibration::new(
        [
            [600.0, 0.0, 320.0],
            [0.0, 600.0, 240.0],
            [0.0, 0.0, 1.0],
        ],
        [0.0; 4],
    )
    .expect("calibration");
    tracker.set_calibration(calibration);
    tracker.start().expect("start tracker");

    let snapshot = wait_for_markers(&tracker, Duration::from_secs(5));
    tracker.stop();

    let pose = snapshot.markers[0]
        .pose
        .as_ref()
        .expect("pose with calibration loaded");
    // The fixture marker spans 120 px; at fx = 600 and a 0.05 m marker the
    // distance works out to roughly 0.25 m in front of the camera.
    assert!(pose.tvec[2] > 0.0);
    assert!((pose.tvec[2] - 0.25).abs() < 0.02, "z = {}", pose.tvec[2]);
    // Fronto-parallel fixture, so rotation stays small.
    assert!(pose.rvec.iter().all(|component| component.abs() < 0.1));
}

#[test]
fn loads_calibration_file_from_config() {
    let mut file = NamedTempFile::with_suffix(".toml").expect("temp calibration");
    let toml = r#"
        [calibration]
        camera_matrix = [[600.0, 0.0, 320.0], [0.0, 600.0, 240.0], [0.0, 0.0, 1.0]]
        dist_coeffs = [0.0, 0.0, 0.0, 0.0]
    "#;
    file.write_all(toml.as_bytes()).expect("write calibration");

    let mut config = stub_config("stub://bench#5");
    config.calibration_path = Some(file.path().to_path_buf());

    let mut tracker = Tracker::new(config).expect("create tracker");
    tracker.start().expect("start tracker");
    let snapshot = wait_for_markers(&tracker, Duration::from_secs(5));
    tracker.stop();

    assert_eq!(snapshot.markers[0].id, 5);
    assert!(snapshot.markers[0].pose.is_some());
}

#[test]
fn tracker_survives_stop_and_restart() {
    let mut tracker = Tracker::new(stub_config("stub://bench#1")).expect("create tracker");

    tracker.start().expect("first start");
    wait_for_markers(&tracker, Duration::from_secs(5));
    tracker.stop();
    assert!(!tracker.is_running());

    tracker.start().expect("second start");
    wait_for_markers(&tracker, Duration::from_secs(5));
    tracker.stop();
}
