//! Runtime configuration.
//!
//! One immutable `SortcellConfig` is built at startup from (in order of
//! precedence) environment variables, an optional JSON config file, and
//! compiled defaults. Components receive references to the sub-structures
//! they need; nothing reads ambient global state after construction.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::trajectory::{ARM_CHANNELS, SEQUENCE_STEPS};

const DEFAULT_FRAME_SOURCE: &str = "synthetic://belt";
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 50;

const DEFAULT_DETECT_ENDPOINT: &str = "stub://blob";
const DEFAULT_MIN_CONFIDENCE: f32 = 0.40;
const DEFAULT_SKIP_FRAMES: u32 = 0;
const DEFAULT_DETECT_TIMEOUT_MS: u64 = 4000;

/// Pick eligibility never drops below this confidence, whatever is configured.
pub const CONFIDENCE_FLOOR: f32 = 0.50;

const DEFAULT_ROI_MARGIN_X: f32 = 0.15;
const DEFAULT_ROI_MARGIN_Y: f32 = 0.15;

const DEFAULT_STABILITY_THRESHOLD: u32 = 2;
const DEFAULT_COOLDOWN_SECS: f64 = 2.0;

const DEFAULT_STEP_DURATION_MS: u16 = 2000;
const DEFAULT_STEP_SETTLE_MS: u64 = 1000;
const DEFAULT_BELT_SETTLE_MS: u64 = 500;
const DEFAULT_FINISH_SETTLE_MS: u64 = 1000;
const DEFAULT_RESTART_BACKOFF_MS: u64 = 500;
const DEFAULT_RESTART_SETTLE_MS: u64 = 300;

const DEFAULT_ROTATION_SERVO: u8 = 2;
const DEFAULT_ROTATION_NEUTRAL: u16 = 500;
const DEFAULT_ROTATION_MIN: u16 = 130;
const DEFAULT_ROTATION_MAX: u16 = 875;
const DEFAULT_ROTATION_FIXED: u16 = 130;
const DEFAULT_WINDOW_MIN_DEG: f32 = -35.0;
const DEFAULT_WINDOW_MAX_DEG: f32 = 35.0;
const DEFAULT_ROTATION_STEPS: &[usize] = &[1, 2, 3];

const DEFAULT_HORIZONTAL_SERVO: u8 = 6;
const DEFAULT_HORIZONTAL_FACTOR: f32 = 0.15;
const DEFAULT_HORIZONTAL_MAX: i32 = 100;
const DEFAULT_VERTICAL_SERVO: u8 = 3;
const DEFAULT_VERTICAL_FACTOR: f32 = -0.10;
const DEFAULT_VERTICAL_MAX: i32 = 80;
const DEFAULT_DEADZONE_PX: i32 = 20;
const DEFAULT_FINE_TUNE_STEPS: &[usize] = &[1, 2];

const DEFAULT_BELT_URL: &str = "stub://belt";
const DEFAULT_BELT_TIMEOUT_MS: u64 = 3000;

const DEFAULT_ARM_URL: &str = "stub://arm";
const DEFAULT_ARM_BAUD: u32 = 9600;
const DEFAULT_TRAVEL_MIN: u16 = 0;
const DEFAULT_TRAVEL_MAX: u16 = 1000;

#[derive(Debug, Deserialize, Default)]
struct SortcellConfigFile {
    frame: Option<FrameFile>,
    detection: Option<DetectionFile>,
    roi: Option<RoiFile>,
    stability: Option<StabilityFile>,
    pick: Option<PickFile>,
    motion: Option<MotionFile>,
    rotation: Option<RotationFile>,
    fine_tune: Option<FineTuneFile>,
    labels: Option<LabelsFile>,
    belt: Option<BeltFile>,
    arm: Option<ArmFile>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionFile {
    endpoint: Option<String>,
    min_confidence: Option<f32>,
    skip_frames: Option<u32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RoiFile {
    margin_x: Option<f32>,
    margin_y: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct StabilityFile {
    threshold: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PickFile {
    cooldown_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionFile {
    step_duration_ms: Option<u16>,
    step_settle_ms: Option<u64>,
    belt_settle_ms: Option<u64>,
    finish_settle_ms: Option<u64>,
    restart_backoff_ms: Option<u64>,
    restart_settle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RotationFile {
    servo: Option<u8>,
    neutral: Option<u16>,
    min: Option<u16>,
    max: Option<u16>,
    fixed: Option<u16>,
    window_min_deg: Option<f32>,
    window_max_deg: Option<f32>,
    affected_steps: Option<Vec<usize>>,
}

#[derive(Debug, Deserialize, Default)]
struct FineTuneFile {
    enabled: Option<bool>,
    horizontal_servo: Option<u8>,
    horizontal_factor: Option<f32>,
    horizontal_max: Option<i32>,
    vertical_servo: Option<u8>,
    vertical_factor: Option<f32>,
    vertical_max: Option<i32>,
    deadzone_x: Option<i32>,
    deadzone_y: Option<i32>,
    affected_steps: Option<Vec<usize>>,
}

#[derive(Debug, Deserialize, Default)]
struct LabelsFile {
    recyclable: Option<Vec<String>>,
    non_recyclable: Option<Vec<String>>,
    angle_based: Option<Vec<String>>,
    fixed_rotation: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct BeltFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ArmFile {
    url: Option<String>,
    baud: Option<u32>,
    travel_min: Option<u16>,
    travel_max: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct SortcellConfig {
    pub frame: FrameSettings,
    pub detection: DetectionSettings,
    pub roi: RoiSettings,
    pub stability: StabilitySettings,
    pub pick: PickSettings,
    pub motion: MotionSettings,
    pub rotation: RotationSettings,
    pub fine_tune: FineTuneSettings,
    pub labels: LabelSettings,
    pub belt: BeltSettings,
    pub arm: ArmSettings,
}

#[derive(Debug, Clone)]
pub struct FrameSettings {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub endpoint: String,
    pub min_confidence: f32,
    pub skip_frames: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RoiSettings {
    pub margin_x: f32,
    pub margin_y: f32,
}

#[derive(Debug, Clone)]
pub struct StabilitySettings {
    pub threshold: u32,
}

#[derive(Debug, Clone)]
pub struct PickSettings {
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    pub step_duration_ms: u16,
    pub step_settle: Duration,
    pub belt_settle: Duration,
    pub finish_settle: Duration,
    pub restart_backoff: Duration,
    pub restart_settle: Duration,
}

#[derive(Debug, Clone)]
pub struct RotationSettings {
    /// Grip wrist servo id, 1-based as on the controller bus.
    pub servo: u8,
    pub neutral: u16,
    pub min: u16,
    pub max: u16,
    pub fixed: u16,
    pub window_min_deg: f32,
    pub window_max_deg: f32,
    pub affected_steps: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct FineTuneSettings {
    pub enabled: bool,
    pub horizontal_servo: u8,
    pub horizontal_factor: f32,
    pub horizontal_max: i32,
    pub vertical_servo: u8,
    pub vertical_factor: f32,
    pub vertical_max: i32,
    pub deadzone_x: i32,
    pub deadzone_y: i32,
    pub affected_steps: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct LabelSettings {
    pub recyclable: Vec<String>,
    pub non_recyclable: Vec<String>,
    pub angle_based: Vec<String>,
    pub fixed_rotation: Vec<String>,
}

impl Default for LabelSettings {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            recyclable: list(&["plastic_bottle", "glass_bottle", "aluminum_can"]),
            non_recyclable: list(&["paper_cup", "chips_bag"]),
            angle_based: list(&["plastic_bottle", "glass_bottle"]),
            fixed_rotation: list(&["paper_cup", "chips_bag", "aluminum_can"]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BeltSettings {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ArmSettings {
    pub url: String,
    pub baud: u32,
    /// Hardware travel range shared by all channels.
    pub travel_min: u16,
    pub travel_max: u16,
}

impl SortcellConfig {
    /// Load from the `SORTCELL_CONFIG` file (if set), then apply env
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SORTCELL_CONFIG").ok();
        Self::load_path(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file path (`None` = defaults only), then apply
    /// env overrides and validate.
    pub fn load_path(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(p) => read_config_file(p)?,
            None => SortcellConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SortcellConfigFile) -> Self {
        let frame = file.frame.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let roi = file.roi.unwrap_or_default();
        let stability = file.stability.unwrap_or_default();
        let pick = file.pick.unwrap_or_default();
        let motion = file.motion.unwrap_or_default();
        let rotation = file.rotation.unwrap_or_default();
        let fine_tune = file.fine_tune.unwrap_or_default();
        let labels = file.labels.unwrap_or_default();
        let belt = file.belt.unwrap_or_default();
        let arm = file.arm.unwrap_or_default();

        let label_defaults = LabelSettings::default();

        Self {
            frame: FrameSettings {
                source: frame
                    .source
                    .unwrap_or_else(|| DEFAULT_FRAME_SOURCE.to_string()),
                width: frame.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: frame.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
                interval: Duration::from_millis(
                    frame.interval_ms.unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
                ),
            },
            detection: DetectionSettings {
                endpoint: detection
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_DETECT_ENDPOINT.to_string()),
                min_confidence: detection.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                skip_frames: detection.skip_frames.unwrap_or(DEFAULT_SKIP_FRAMES),
                timeout: Duration::from_millis(
                    detection.timeout_ms.unwrap_or(DEFAULT_DETECT_TIMEOUT_MS),
                ),
            },
            roi: RoiSettings {
                margin_x: roi.margin_x.unwrap_or(DEFAULT_ROI_MARGIN_X),
                margin_y: roi.margin_y.unwrap_or(DEFAULT_ROI_MARGIN_Y),
            },
            stability: StabilitySettings {
                threshold: stability.threshold.unwrap_or(DEFAULT_STABILITY_THRESHOLD),
            },
            pick: PickSettings {
                cooldown: Duration::from_secs_f64(
                    pick.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS).max(0.0),
                ),
            },
            motion: MotionSettings {
                step_duration_ms: motion.step_duration_ms.unwrap_or(DEFAULT_STEP_DURATION_MS),
                step_settle: Duration::from_millis(
                    motion.step_settle_ms.unwrap_or(DEFAULT_STEP_SETTLE_MS),
                ),
                belt_settle: Duration::from_millis(
                    motion.belt_settle_ms.unwrap_or(DEFAULT_BELT_SETTLE_MS),
                ),
                finish_settle: Duration::from_millis(
                    motion.finish_settle_ms.unwrap_or(DEFAULT_FINISH_SETTLE_MS),
                ),
                restart_backoff: Duration::from_millis(
                    motion.restart_backoff_ms.unwrap_or(DEFAULT_RESTART_BACKOFF_MS),
                ),
                restart_settle: Duration::from_millis(
                    motion.restart_settle_ms.unwrap_or(DEFAULT_RESTART_SETTLE_MS),
                ),
            },
            rotation: RotationSettings {
                servo: rotation.servo.unwrap_or(DEFAULT_ROTATION_SERVO),
                neutral: rotation.neutral.unwrap_or(DEFAULT_ROTATION_NEUTRAL),
                min: rotation.min.unwrap_or(DEFAULT_ROTATION_MIN),
                max: rotation.max.unwrap_or(DEFAULT_ROTATION_MAX),
                fixed: rotation.fixed.unwrap_or(DEFAULT_ROTATION_FIXED),
                window_min_deg: rotation.window_min_deg.unwrap_or(DEFAULT_WINDOW_MIN_DEG),
                window_max_deg: rotation.window_max_deg.unwrap_or(DEFAULT_WINDOW_MAX_DEG),
                affected_steps: rotation
                    .affected_steps
                    .unwrap_or_else(|| DEFAULT_ROTATION_STEPS.to_vec()),
            },
            fine_tune: FineTuneSettings {
                enabled: fine_tune.enabled.unwrap_or(true),
                horizontal_servo: fine_tune
                    .horizontal_servo
                    .unwrap_or(DEFAULT_HORIZONTAL_SERVO),
                horizontal_factor: fine_tune
                    .horizontal_factor
                    .unwrap_or(DEFAULT_HORIZONTAL_FACTOR),
                horizontal_max: fine_tune.horizontal_max.unwrap_or(DEFAULT_HORIZONTAL_MAX),
                vertical_servo: fine_tune.vertical_servo.unwrap_or(DEFAULT_VERTICAL_SERVO),
                vertical_factor: fine_tune.vertical_factor.unwrap_or(DEFAULT_VERTICAL_FACTOR),
                vertical_max: fine_tune.vertical_max.unwrap_or(DEFAULT_VERTICAL_MAX),
                deadzone_x: fine_tune.deadzone_x.unwrap_or(DEFAULT_DEADZONE_PX),
                deadzone_y: fine_tune.deadzone_y.unwrap_or(DEFAULT_DEADZONE_PX),
                affected_steps: fine_tune
                    .affected_steps
                    .unwrap_or_else(|| DEFAULT_FINE_TUNE_STEPS.to_vec()),
            },
            labels: LabelSettings {
                recyclable: labels.recyclable.unwrap_or(label_defaults.recyclable),
                non_recyclable: labels
                    .non_recyclable
                    .unwrap_or(label_defaults.non_recyclable),
                angle_based: labels.angle_based.unwrap_or(label_defaults.angle_based),
                fixed_rotation: labels
                    .fixed_rotation
                    .unwrap_or(label_defaults.fixed_rotation),
            },
            belt: BeltSettings {
                url: belt.url.unwrap_or_else(|| DEFAULT_BELT_URL.to_string()),
                timeout: Duration::from_millis(
                    belt.timeout_ms.unwrap_or(DEFAULT_BELT_TIMEOUT_MS),
                ),
            },
            arm: ArmSettings {
                url: arm.url.unwrap_or_else(|| DEFAULT_ARM_URL.to_string()),
                baud: arm.baud.unwrap_or(DEFAULT_ARM_BAUD),
                travel_min: arm.travel_min.unwrap_or(DEFAULT_TRAVEL_MIN),
                travel_max: arm.travel_max.unwrap_or(DEFAULT_TRAVEL_MAX),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SORTCELL_BELT_URL") {
            if !url.trim().is_empty() {
                self.belt.url = url;
            }
        }
        if let Ok(url) = std::env::var("SORTCELL_ARM_URL") {
            if !url.trim().is_empty() {
                self.arm.url = url;
            }
        }
        if let Ok(endpoint) = std::env::var("SORTCELL_DETECT_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.detection.endpoint = endpoint;
            }
        }
        if let Ok(source) = std::env::var("SORTCELL_FRAME_SOURCE") {
            if !source.trim().is_empty() {
                self.frame.source = source;
            }
        }
        if let Ok(conf) = std::env::var("SORTCELL_MIN_CONFIDENCE") {
            let value: f32 = conf
                .parse()
                .map_err(|_| anyhow!("SORTCELL_MIN_CONFIDENCE must be a number in [0,1]"))?;
            self.detection.min_confidence = value;
        }
        if let Ok(secs) = std::env::var("SORTCELL_COOLDOWN_SECS") {
            let value: f64 = secs
                .parse()
                .map_err(|_| anyhow!("SORTCELL_COOLDOWN_SECS must be a number of seconds"))?;
            if value < 0.0 {
                return Err(anyhow!("SORTCELL_COOLDOWN_SECS must not be negative"));
            }
            self.pick.cooldown = Duration::from_secs_f64(value);
        }
        if let Ok(threshold) = std::env::var("SORTCELL_STABILITY_THRESHOLD") {
            let value: u32 = threshold
                .parse()
                .map_err(|_| anyhow!("SORTCELL_STABILITY_THRESHOLD must be an integer"))?;
            self.stability.threshold = value;
        }
        if let Ok(skip) = std::env::var("SORTCELL_SKIP_FRAMES") {
            let value: u32 = skip
                .parse()
                .map_err(|_| anyhow!("SORTCELL_SKIP_FRAMES must be an integer"))?;
            self.detection.skip_frames = value;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }

        // Margins are clamped, not rejected.
        self.roi.margin_x = self.roi.margin_x.clamp(0.0, 1.0);
        self.roi.margin_y = self.roi.margin_y.clamp(0.0, 1.0);

        self.stability.threshold = self.stability.threshold.max(1);

        if !(0.0..=1.0).contains(&self.detection.min_confidence) {
            return Err(anyhow!(
                "detection.min_confidence must be in [0,1], got {}",
                self.detection.min_confidence
            ));
        }

        let rot = &self.rotation;
        if !(rot.min <= rot.neutral && rot.neutral <= rot.max) {
            return Err(anyhow!(
                "rotation range must satisfy min <= neutral <= max, got {}/{}/{}",
                rot.min,
                rot.neutral,
                rot.max
            ));
        }
        if rot.fixed < rot.min || rot.fixed > rot.max {
            return Err(anyhow!(
                "rotation.fixed {} outside [{}, {}]",
                rot.fixed,
                rot.min,
                rot.max
            ));
        }
        if rot.window_min_deg > rot.window_max_deg {
            return Err(anyhow!("rotation window min exceeds max"));
        }
        validate_servo("rotation.servo", rot.servo)?;
        validate_steps("rotation.affected_steps", &rot.affected_steps)?;

        let fine = &self.fine_tune;
        validate_servo("fine_tune.horizontal_servo", fine.horizontal_servo)?;
        validate_servo("fine_tune.vertical_servo", fine.vertical_servo)?;
        validate_steps("fine_tune.affected_steps", &fine.affected_steps)?;
        if fine.deadzone_x < 0 || fine.deadzone_y < 0 {
            return Err(anyhow!("fine_tune deadzones must not be negative"));
        }
        if fine.horizontal_max < 0 || fine.vertical_max < 0 {
            return Err(anyhow!("fine_tune adjustment limits must not be negative"));
        }
        if fine.horizontal_servo == fine.vertical_servo {
            return Err(anyhow!(
                "fine_tune horizontal and vertical servos must differ"
            ));
        }
        // Rotation and fine-tune writes must land on disjoint channels.
        if fine.horizontal_servo == rot.servo || fine.vertical_servo == rot.servo {
            return Err(anyhow!(
                "fine_tune servos must not overlap rotation.servo {}",
                rot.servo
            ));
        }

        if self.arm.travel_min >= self.arm.travel_max {
            return Err(anyhow!(
                "arm travel range must satisfy min < max, got {}..{}",
                self.arm.travel_min,
                self.arm.travel_max
            ));
        }

        for label in self.labels.recyclable.iter() {
            let key = crate::labels::canonical(label);
            if self
                .labels
                .non_recyclable
                .iter()
                .any(|l| crate::labels::canonical(l) == key)
            {
                return Err(anyhow!(
                    "label {:?} listed as both recyclable and non-recyclable",
                    label
                ));
            }
        }
        for label in self.labels.angle_based.iter() {
            let key = crate::labels::canonical(label);
            if self
                .labels
                .fixed_rotation
                .iter()
                .any(|l| crate::labels::canonical(l) == key)
            {
                return Err(anyhow!(
                    "label {:?} listed as both angle-based and fixed-rotation",
                    label
                ));
            }
        }
        Ok(())
    }

    /// Confidence a target must reach before it can gate a pick. The
    /// configured minimum is floored at [`CONFIDENCE_FLOOR`].
    pub fn effective_min_confidence(&self) -> f32 {
        self.detection.min_confidence.max(CONFIDENCE_FLOOR)
    }
}

impl Default for SortcellConfig {
    fn default() -> Self {
        Self::from_file(SortcellConfigFile::default())
    }
}

fn validate_servo(name: &str, servo: u8) -> Result<()> {
    if servo == 0 || servo as usize > ARM_CHANNELS {
        return Err(anyhow!(
            "{} must be in 1..={}, got {}",
            name,
            ARM_CHANNELS,
            servo
        ));
    }
    Ok(())
}

fn validate_steps(name: &str, steps: &[usize]) -> Result<()> {
    for &step in steps {
        if step >= SEQUENCE_STEPS {
            return Err(anyhow!(
                "{} index {} outside sequence 0..{}",
                name,
                step,
                SEQUENCE_STEPS
            ));
        }
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<SortcellConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
