//! sortcelld - sorting cell control daemon
//!
//! This daemon:
//! 1. Pulls frames from the configured source (synthetic belt scene by default)
//! 2. Runs detection on a skip-frame cadence
//! 3. Picks a target with region-of-interest priority and debounces it
//! 4. Estimates the grip angle and hands the pick to the state machine
//! 5. Holds the belt stopped during arm motion and restarts it after

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sortcell::config::SortcellConfig;
use sortcell::detect::{BlobSource, DetectionCadence, DetectionSource};
use sortcell::drivers;
use sortcell::frame::{FrameSource, SyntheticBeltSource};
use sortcell::machine::{PickAttempt, PickStateMachine};
use sortcell::orient::OrientationEstimator;
use sortcell::select::{Roi, TargetSelector};
use sortcell::stability::StabilityTracker;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sorting cell control daemon")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "SORTCELL_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many frames. 0 runs until Ctrl-C.
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// Label the stub detector reports for `stub://` endpoints.
    #[arg(long, default_value = "plastic_bottle")]
    stub_label: String,
}

fn frame_source(config: &SortcellConfig) -> Result<Box<dyn FrameSource>> {
    let url = &config.frame.source;
    if url.starts_with("synthetic://") {
        return Ok(Box::new(SyntheticBeltSource::new(
            config.frame.width,
            config.frame.height,
        )));
    }
    bail!("unsupported frame source {:?}, expected synthetic://", url);
}

fn detection_source(config: &SortcellConfig, stub_label: &str) -> Result<Box<dyn DetectionSource>> {
    let endpoint = &config.detection.endpoint;
    if endpoint.starts_with("stub://") {
        return Ok(Box::new(BlobSource::new(stub_label)));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        #[cfg(feature = "remote-detect")]
        {
            return Ok(Box::new(sortcell::detect::remote::RemoteSource::new(
                endpoint,
                config.detection.timeout,
            )?));
        }
        #[cfg(not(feature = "remote-detect"))]
        bail!(
            "endpoint {:?} needs the remote-detect feature, rebuild with --features remote-detect",
            endpoint
        );
    }
    bail!("unsupported detection endpoint {:?}", endpoint);
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = SortcellConfig::load_path(args.config.as_deref())?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .context("set Ctrl-C handler")?;
    }

    let belt = drivers::belt_from_url(&config.belt.url, config.belt.timeout)?;
    let arm = drivers::arm_from_url(&config.arm.url, config.arm.baud)?;
    let machine = PickStateMachine::new(&config, belt, arm);

    match machine.probe_belt() {
        Ok(state) => log::info!("belt {} reports {}", config.belt.url, state),
        Err(err) => log::warn!("belt probe failed: {:#}", err),
    }
    machine.start_belt().context("start belt")?;

    let mut source = frame_source(&config)?;
    let mut detector = detection_source(&config, &args.stub_label)?;
    let mut cadence = DetectionCadence::new(config.detection.skip_frames);
    let mut stability = StabilityTracker::new(config.stability.threshold);
    let estimator = OrientationEstimator::default();
    let selector = TargetSelector::new(Roi::from_margins(
        config.frame.width,
        config.frame.height,
        config.roi.margin_x,
        config.roi.margin_y,
    ));
    let min_confidence = config.effective_min_confidence();

    log::info!(
        "sortcelld running: source={}, detector={}, belt={}, arm={}",
        source.name(),
        detector.name(),
        config.belt.url,
        config.arm.url
    );
    log::info!(
        "trigger: {} consecutive frames inside {:?}, confidence >= {:.2}, cooldown {:?}",
        config.stability.threshold,
        selector.roi().bounds(),
        min_confidence,
        config.pick.cooldown
    );

    let mut frame_count = 0u64;
    let mut pick_count = 0u64;
    let mut last_status = Instant::now();

    while running.load(Ordering::SeqCst) {
        if args.frames > 0 && frame_count >= args.frames {
            break;
        }
        let frame = source.next_frame()?;
        frame_count += 1;

        let detections = cadence.observe(detector.as_mut(), &frame);
        let selected = selector.select(&detections);
        if let Some(t) = &selected {
            if t.detection.confidence < min_confidence {
                log::debug!(
                    "target {} at {:?} is below the confidence floor ({:.2} < {:.2})",
                    t.detection.label,
                    t.centroid,
                    t.detection.confidence,
                    min_confidence
                );
            }
        }
        let target = selected.filter(|t| t.detection.confidence >= min_confidence);
        stability.observe(target.as_ref(), machine.state());

        if let Some(target) = &target {
            if stability.is_eligible() && machine.can_trigger(config.pick.cooldown) {
                let d = &target.detection;
                let angle = match frame.luma_region(d.x1, d.y1, d.x2, d.y2) {
                    Some(region) => estimator.estimate(&region, &d.label),
                    None => {
                        log::warn!(
                            "target box ({},{})..({},{}) lies outside the frame, angle 0",
                            d.x1,
                            d.y1,
                            d.x2,
                            d.y2
                        );
                        0.0
                    }
                };
                let attempt = PickAttempt::new(&d.label, angle, target.centroid, frame.center());
                match machine.execute(attempt) {
                    Ok(report) => {
                        pick_count += 1;
                        if !report.belt_restarted {
                            log::error!("belt left stopped after pick #{}", pick_count);
                        }
                    }
                    Err(busy) => log::debug!("{}", busy),
                }
                stability.reset();
            }
        }

        if last_status.elapsed() >= Duration::from_secs(5) {
            log::info!(
                "status: frames={} picks={} machine={} streak={}",
                frame_count,
                pick_count,
                machine.state(),
                stability.count()
            );
            last_status = Instant::now();
        }

        thread::sleep(config.frame.interval);
    }

    log::info!("shutting down after {} frames, {} picks", frame_count, pick_count);
    machine.emergency_stop();
    Ok(())
}
