//! Pick execution and the belt/arm interlock.
//!
//! One `PickStateMachine` owns both actuators. A pick moves the machine
//! Idle -> Picking -> Cooldown -> Idle inside a single `execute` call;
//! the state mutex is held only for transitions, never across motion.
//! A second trigger while a pick runs is refused with `MachineBusy`
//! instead of queueing, and the post-pick cooldown is enforced by
//! timestamp so it survives the return to Idle.

use crate::config::{MotionSettings, SortcellConfig};
use crate::correct::PositionCorrector;
use crate::drivers::{ArmDrive, BeltDrive, BeltState};
use crate::labels::{Category, LabelBook};
use crate::trajectory::{Sequence, TrajectoryBuilder, STEP_NAMES};
use anyhow::Result;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Where the cell is in its pick cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Idle,
    Picking,
    Cooldown,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemState::Idle => write!(f, "idle"),
            SystemState::Picking => write!(f, "picking"),
            SystemState::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// Time source for cooldown accounting, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-advanced clock. Clones share the offset.
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.base + *offset
    }
}

/// Everything the vision side hands over for one pick.
#[derive(Debug, Clone)]
pub struct PickAttempt {
    pub label: String,
    pub angle_deg: f32,
    /// Target centroid in pixels.
    pub centroid: (i32, i32),
    /// Frame center in pixels.
    pub center: (i32, i32),
    pub requested_at: Instant,
}

impl PickAttempt {
    pub fn new(label: &str, angle_deg: f32, centroid: (i32, i32), center: (i32, i32)) -> Self {
        Self {
            label: label.to_string(),
            angle_deg,
            centroid,
            center,
            requested_at: Instant::now(),
        }
    }

    /// Centroid offset from frame center.
    pub fn offset(&self) -> (i32, i32) {
        (
            self.centroid.0 - self.center.0,
            self.centroid.1 - self.center.1,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickOutcome {
    Completed,
    /// Belt would not stop; the arm never moved.
    BeltStopFailed,
    /// A pose command failed at this step; the rest were skipped.
    ArmFault { step: usize },
}

impl fmt::Display for PickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PickOutcome::Completed => write!(f, "completed"),
            PickOutcome::BeltStopFailed => write!(f, "belt stop failed"),
            PickOutcome::ArmFault { step } => write!(f, "arm fault at step {}", step),
        }
    }
}

/// What `execute` reports back to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickReport {
    pub outcome: PickOutcome,
    /// False means the belt is left stopped and needs operator attention.
    pub belt_restarted: bool,
}

/// Pick refused because the machine is not Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineBusy {
    pub state: SystemState,
}

impl fmt::Display for MachineBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pick refused, machine is {}", self.state)
    }
}

impl Error for MachineBusy {}

#[derive(Debug)]
struct MachineState {
    state: SystemState,
    last_pick_done: Option<Instant>,
}

pub struct PickStateMachine {
    state: Mutex<MachineState>,
    belt: Mutex<Box<dyn BeltDrive>>,
    arm: Mutex<Box<dyn ArmDrive>>,
    builder: TrajectoryBuilder,
    corrector: PositionCorrector,
    labels: LabelBook,
    motion: MotionSettings,
    clock: Box<dyn Clock>,
}

impl PickStateMachine {
    pub fn new(config: &SortcellConfig, belt: Box<dyn BeltDrive>, arm: Box<dyn ArmDrive>) -> Self {
        Self::with_clock(config, belt, arm, Box::new(SystemClock))
    }

    pub fn with_clock(
        config: &SortcellConfig,
        belt: Box<dyn BeltDrive>,
        arm: Box<dyn ArmDrive>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let labels = LabelBook::from_settings(&config.labels);
        Self {
            state: Mutex::new(MachineState {
                state: SystemState::Idle,
                last_pick_done: None,
            }),
            belt: Mutex::new(belt),
            arm: Mutex::new(arm),
            builder: TrajectoryBuilder::new(
                &config.rotation,
                &config.fine_tune,
                (config.arm.travel_min, config.arm.travel_max),
                &labels,
            ),
            corrector: PositionCorrector::new(&config.fine_tune),
            labels,
            motion: config.motion.clone(),
            clock,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_belt(&self) -> MutexGuard<'_, Box<dyn BeltDrive>> {
        self.belt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_arm(&self) -> MutexGuard<'_, Box<dyn ArmDrive>> {
        self.arm.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SystemState {
        self.lock_state().state
    }

    /// True when Idle and the post-pick cooldown has elapsed.
    pub fn can_trigger(&self, cooldown: Duration) -> bool {
        let guard = self.lock_state();
        if guard.state != SystemState::Idle {
            return false;
        }
        match guard.last_pick_done {
            None => true,
            Some(done) => self.clock.now().saturating_duration_since(done) >= cooldown,
        }
    }

    /// Start the conveyor. Used at daemon startup and by tooling.
    pub fn start_belt(&self) -> Result<()> {
        self.lock_belt().start()
    }

    /// Ask the belt device for its live state.
    pub fn probe_belt(&self) -> Result<BeltState> {
        self.lock_belt().probe()
    }

    /// Run one full pick. Returns `MachineBusy` without touching hardware
    /// when a pick is already in flight.
    pub fn execute(&self, attempt: PickAttempt) -> Result<PickReport, MachineBusy> {
        {
            let mut guard = self.lock_state();
            if guard.state != SystemState::Idle {
                return Err(MachineBusy { state: guard.state });
            }
            guard.state = SystemState::Picking;
        }

        log::info!(
            "pick start: {} at {:?}, offset {:?}, angle {:.1}",
            attempt.label,
            attempt.centroid,
            attempt.offset(),
            attempt.angle_deg
        );

        let outcome = self.motion_phase(&attempt);

        {
            let mut guard = self.lock_state();
            guard.state = SystemState::Cooldown;
            guard.last_pick_done = Some(self.clock.now());
        }

        let belt_restarted = self.restart_belt();
        thread::sleep(self.motion.restart_settle);

        self.lock_state().state = SystemState::Idle;

        log::info!(
            "pick done: {} {} (belt restarted: {}) in {:.1?}",
            attempt.label,
            outcome,
            belt_restarted,
            attempt.requested_at.elapsed()
        );
        Ok(PickReport {
            outcome,
            belt_restarted,
        })
    }

    fn motion_phase(&self, attempt: &PickAttempt) -> PickOutcome {
        let outcome = match self.lock_belt().stop() {
            Err(err) => {
                log::error!("belt stop failed, pick aborted: {:#}", err);
                PickOutcome::BeltStopFailed
            }
            Ok(()) => {
                thread::sleep(self.motion.belt_settle);

                let category = self.labels.category(&attempt.label);
                if category == Category::Unknown {
                    log::warn!(
                        "label {:?} has no category, delivering to the left box",
                        attempt.label
                    );
                }
                let correction = self.corrector.correct(attempt.centroid, attempt.center);
                if correction.horizontal.delta != 0 || correction.vertical.delta != 0 {
                    log::debug!(
                        "fine correction {:?} -> servo {} {:+}, servo {} {:+}",
                        correction.offset,
                        correction.horizontal.servo,
                        correction.horizontal.delta,
                        correction.vertical.servo,
                        correction.vertical.delta
                    );
                }
                let sequence = self
                    .builder
                    .build(&attempt.label, category, attempt.angle_deg, &correction);

                self.run_sequence(&sequence)
            }
        };

        // torque release runs on every path, the arm must not hold between picks
        if let Err(err) = self.lock_arm().power_off() {
            log::warn!("arm power off failed: {:#}", err);
        }
        outcome
    }

    fn run_sequence(&self, sequence: &Sequence) -> PickOutcome {
        let mut arm = self.lock_arm();
        for (index, step) in sequence.steps().iter().enumerate() {
            log::debug!("pose {} ({})", index, STEP_NAMES[index]);
            if let Err(err) = arm.set_pose(&step.channel_pairs(), self.motion.step_duration_ms) {
                log::error!(
                    "arm fault at step {} ({}), sequence abandoned: {:#}",
                    index,
                    STEP_NAMES[index],
                    err
                );
                return PickOutcome::ArmFault { step: index };
            }
            thread::sleep(self.motion.step_settle);
        }
        drop(arm);
        thread::sleep(self.motion.finish_settle);
        PickOutcome::Completed
    }

    /// One retry after a backoff, then give up and leave the belt stopped.
    fn restart_belt(&self) -> bool {
        let mut belt = self.lock_belt();
        match belt.start() {
            Ok(()) => true,
            Err(first) => {
                log::warn!("belt restart failed, retrying once: {:#}", first);
                thread::sleep(self.motion.restart_backoff);
                match belt.start() {
                    Ok(()) => true,
                    Err(second) => {
                        log::error!("belt restart failed twice, belt left stopped: {:#}", second);
                        false
                    }
                }
            }
        }
    }

    /// Quiesce both actuators and force Idle. Errors are logged, never
    /// returned; shutdown must not depend on hardware answering.
    pub fn emergency_stop(&self) {
        self.lock_state().state = SystemState::Idle;
        if let Err(err) = self.lock_belt().stop() {
            log::error!("emergency belt stop failed: {:#}", err);
        }
        if let Err(err) = self.lock_arm().power_off() {
            log::error!("emergency arm power off failed: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{StubArm, StubBelt};
    use crate::trajectory::SEQUENCE_STEPS;

    fn fast_config() -> SortcellConfig {
        let mut cfg = SortcellConfig::default();
        cfg.motion.step_duration_ms = 20;
        cfg.motion.step_settle = Duration::ZERO;
        cfg.motion.belt_settle = Duration::ZERO;
        cfg.motion.finish_settle = Duration::ZERO;
        cfg.motion.restart_backoff = Duration::ZERO;
        cfg.motion.restart_settle = Duration::ZERO;
        cfg
    }

    fn machine_with_stubs() -> (PickStateMachine, StubBelt, StubArm) {
        let belt = StubBelt::new();
        let arm = StubArm::new();
        let machine = PickStateMachine::new(
            &fast_config(),
            Box::new(belt.clone()),
            Box::new(arm.clone()),
        );
        (machine, belt, arm)
    }

    fn centered_attempt(label: &str, angle: f32) -> PickAttempt {
        PickAttempt::new(label, angle, (320, 240), (320, 240))
    }

    #[test]
    fn completed_pick_runs_all_poses_and_restarts_the_belt() {
        let (machine, belt, arm) = machine_with_stubs();
        let report = machine.execute(centered_attempt("plastic_bottle", 20.0)).unwrap();
        assert_eq!(report.outcome, PickOutcome::Completed);
        assert!(report.belt_restarted);
        assert_eq!(machine.state(), SystemState::Idle);

        let poses = arm.poses();
        assert_eq!(poses.len(), SEQUENCE_STEPS);
        for pose in &poses {
            assert_eq!(pose.len(), 6);
        }
        // wrist value for 20 deg lands in the grip steps
        assert!(poses[1].contains(&(2, 583)));
        assert_eq!(belt.stops(), 1);
        assert_eq!(belt.starts(), 1);
        assert_eq!(arm.power_offs(), 1);
    }

    #[test]
    fn belt_stop_failure_aborts_before_any_motion() {
        let (machine, belt, arm) = machine_with_stubs();
        belt.fail_next_stops(1);
        let report = machine.execute(centered_attempt("chips_bag", 0.0)).unwrap();
        assert_eq!(report.outcome, PickOutcome::BeltStopFailed);
        assert!(report.belt_restarted);
        assert!(arm.poses().is_empty());
        // cleanup still runs even though the arm never moved
        assert_eq!(arm.power_offs(), 1);
        assert_eq!(machine.state(), SystemState::Idle);
    }

    #[test]
    fn arm_fault_reports_the_failing_step() {
        let (machine, _belt, arm) = machine_with_stubs();
        arm.fail_at_call(3);
        let report = machine.execute(centered_attempt("glass_bottle", 0.0)).unwrap();
        assert_eq!(report.outcome, PickOutcome::ArmFault { step: 3 });
        assert_eq!(arm.poses().len(), 3);
        // torque release still happens after a fault
        assert_eq!(arm.power_offs(), 1);
        assert_eq!(machine.state(), SystemState::Idle);
    }

    #[test]
    fn belt_restart_retries_once_then_gives_up() {
        let (machine, belt, _arm) = machine_with_stubs();
        belt.fail_next_starts(2);
        let report = machine.execute(centered_attempt("plastic_bottle", 0.0)).unwrap();
        assert_eq!(report.outcome, PickOutcome::Completed);
        assert!(!report.belt_restarted);
        assert_eq!(belt.starts(), 2);
        assert_eq!(machine.state(), SystemState::Idle);
    }

    #[test]
    fn single_restart_failure_recovers_on_the_retry() {
        let (machine, belt, _arm) = machine_with_stubs();
        belt.fail_next_starts(1);
        let report = machine.execute(centered_attempt("plastic_bottle", 0.0)).unwrap();
        assert!(report.belt_restarted);
        assert_eq!(belt.starts(), 2);
    }

    #[test]
    fn cooldown_gates_the_next_trigger() {
        let belt = StubBelt::new();
        let arm = StubArm::new();
        let clock = ManualClock::new();
        let mut cfg = fast_config();
        cfg.pick.cooldown = Duration::from_secs(2);
        let machine = PickStateMachine::with_clock(
            &cfg,
            Box::new(belt),
            Box::new(arm),
            Box::new(clock.clone()),
        );

        assert!(machine.can_trigger(cfg.pick.cooldown));
        machine.execute(centered_attempt("plastic_bottle", 0.0)).unwrap();
        assert!(!machine.can_trigger(cfg.pick.cooldown));
        clock.advance(Duration::from_millis(1999));
        assert!(!machine.can_trigger(cfg.pick.cooldown));
        clock.advance(Duration::from_millis(1));
        assert!(machine.can_trigger(cfg.pick.cooldown));
    }

    #[test]
    fn unknown_label_is_delivered_to_the_left_box() {
        let (machine, _belt, arm) = machine_with_stubs();
        let report = machine.execute(centered_attempt("banana", 0.0)).unwrap();
        assert_eq!(report.outcome, PickOutcome::Completed);
        // left swing keeps base rotation at 1000 mid-sequence
        assert!(arm.poses()[4].contains(&(6, 1000)));
    }

    #[test]
    fn emergency_stop_quiesces_both_drivers() {
        let (machine, belt, arm) = machine_with_stubs();
        machine.execute(centered_attempt("plastic_bottle", 0.0)).unwrap();
        machine.emergency_stop();
        assert_eq!(belt.stops(), 2);
        assert_eq!(arm.power_offs(), 2);
        assert_eq!(machine.state(), SystemState::Idle);
        assert_eq!(belt.cached_state(), BeltState::Stopped);
    }
}
