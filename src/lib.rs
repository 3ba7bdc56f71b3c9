//! Sortcell
//!
//! Control engine for a vision-guided pick-and-place sorting cell: a
//! camera watches a conveyor, a detector labels what passes, and a
//! 6-channel servo arm lifts stabilized targets into a recyclable or
//! non-recyclable box while the belt is held stopped.
//!
//! # Pipeline
//!
//! Frames flow one way through the engine:
//!
//! 1. `frame`: frame acquisition (synthetic belt scene for dry runs)
//! 2. `detect`: labeled boxes from a detection source, skip-frame cadence
//! 3. `select`: target choice with region-of-interest priority
//! 4. `stability`: N-consecutive-frame debounce before a pick may fire
//! 5. `orient`: grip angle from a min-area rectangle fit of the target
//! 6. `correct` / `trajectory`: pixel offset and angle folded into a
//!    9-pose arm sequence
//! 7. `machine`: the single state machine that stops the belt, drives
//!    the arm and restarts the belt, refusing overlapping picks
//!
//! Actuators live behind the `drivers` traits; `stub://` URLs select
//! in-memory doubles so the whole pipeline runs without hardware.

pub mod config;
pub mod correct;
pub mod detect;
pub mod drivers;
pub mod frame;
pub mod labels;
pub mod machine;
pub mod orient;
pub mod select;
pub mod stability;
pub mod trajectory;

pub use config::{SortcellConfig, CONFIDENCE_FLOOR};
pub use correct::{Correction, PositionCorrector};
pub use detect::{Detection, DetectionCadence, DetectionSource};
pub use drivers::{ArmDrive, BeltDrive, BeltState};
pub use frame::{Frame, FrameSource, SyntheticBeltSource};
pub use labels::{Category, LabelBook, RotationStrategy};
pub use machine::{
    MachineBusy, PickAttempt, PickOutcome, PickReport, PickStateMachine, SystemState,
};
pub use orient::OrientationEstimator;
pub use select::{Roi, Target, TargetSelector};
pub use stability::StabilityTracker;
pub use trajectory::{angle_to_servo, Sequence, TrajectoryBuilder};
