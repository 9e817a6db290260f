//! tagtrackd - marker tracking daemon
//!
//! This daemon:
//! 1. Loads tracker configuration (TOML file plus environment overrides)
//! 2. Starts the capture-detect-pose worker
//! 3. Logs new detection snapshots and periodic health stats
//! 4. Shuts the worker down cleanly on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tagtrack::{Tracker, TrackerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fiducial marker tracking daemon")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "TAGTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Capture source, overriding the configuration.
    /// A device node ("/dev/video0") or a "stub://" fixture.
    #[arg(long)]
    source: Option<String>,

    /// Path to a calibration file (TOML or JSON), overriding the
    /// configuration.
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Seconds between periodic stats log lines.
    #[arg(long, default_value_t = 5)]
    status_interval_s: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => TrackerConfig::load_from(path)?,
        None => TrackerConfig::load()?,
    };
    if let Some(source) = args.source {
        config.camera.source = source;
    }
    if let Some(calibration) = args.calibration {
        config.calibration_path = Some(calibration);
    }

    let mut tracker = Tracker::new(config)?;
    tracker.start()?;
    log::info!(
        "tagtrackd running: source={} backend={} marker_size={}m",
        tracker.config().camera.source,
        tracker.config().detector.backend,
        tracker.config().detector.marker_size_m
    );
    if tracker.config().calibration_path.is_none() {
        log::warn!("no calibration configured, poses will not be estimated");
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let status_interval = Duration::from_secs(args.status_interval_s.max(1));
    let mut last_status = Instant::now();
    let mut last_sequence: Option<u64> = None;

    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let snapshot = tracker.latest();
        if last_sequence != Some(snapshot.sequence) {
            last_sequence = Some(snapshot.sequence);
            for marker in &snapshot.markers {
                match &marker.pose {
                    Some(pose) => log::info!(
                        "frame {} marker {}: tvec=[{:.3}, {:.3}, {:.3}] rvec=[{:.3}, {:.3}, {:.3}]",
                        snapshot.sequence,
                        marker.id,
                        pose.tvec[0],
                        pose.tvec[1],
                        pose.tvec[2],
                        pose.rvec[0],
                        pose.rvec[1],
                        pose.rvec[2],
                    ),
                    None => log::info!(
                        "frame {} marker {}: detected (no calibration)",
                        snapshot.sequence,
                        marker.id
                    ),
                }
            }
        }

        if last_status.elapsed() >= status_interval {
            last_status = Instant::now();
            let stats = tracker.stats();
            log::info!(
                "stats: captured={} processed={} skipped={} restarts={} detect_failures={} healthy={}",
                stats.frames_captured,
                stats.frames_processed,
                stats.frames_skipped,
                stats.capture_restarts,
                stats.detect_failures,
                stats.source_healthy
            );
        }
    }

    log::info!("shutdown signal received, stopping tracker...");
    tracker.stop();
    Ok(())
}
