//! The machine must refuse overlapping picks instead of queueing them,
//! and a refused pick must leave no trace on the hardware.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sortcell::config::SortcellConfig;
use sortcell::drivers::{StubArm, StubBelt};
use sortcell::machine::{
    ManualClock, PickAttempt, PickOutcome, PickStateMachine, SystemState,
};
use sortcell::trajectory::SEQUENCE_STEPS;

fn fast_config() -> SortcellConfig {
    let mut cfg = SortcellConfig::default();
    cfg.motion.step_duration_ms = 20;
    cfg.motion.step_settle = Duration::ZERO;
    cfg.motion.belt_settle = Duration::ZERO;
    cfg.motion.finish_settle = Duration::ZERO;
    cfg.motion.restart_backoff = Duration::ZERO;
    cfg.motion.restart_settle = Duration::ZERO;
    cfg.pick.cooldown = Duration::ZERO;
    cfg
}

fn attempt(label: &str) -> PickAttempt {
    PickAttempt::new(label, 0.0, (320, 240), (320, 240))
}

#[test]
fn concurrent_trigger_is_refused_without_touching_hardware() {
    let mut cfg = fast_config();
    // stretch the pick so the second trigger lands mid-motion
    cfg.motion.step_settle = Duration::from_millis(50);

    let belt = StubBelt::new();
    let arm = StubArm::new();
    let machine = Arc::new(PickStateMachine::new(
        &cfg,
        Box::new(belt.clone()),
        Box::new(arm.clone()),
    ));

    let first = {
        let machine = machine.clone();
        thread::spawn(move || machine.execute(attempt("plastic_bottle")))
    };

    thread::sleep(Duration::from_millis(100));
    let second = machine.execute(attempt("chips_bag"));
    let busy = second.expect_err("second pick must be refused");
    assert_eq!(busy.state, SystemState::Picking);
    assert_eq!(busy.to_string(), "pick refused, machine is picking");

    let report = first.join().expect("pick thread").expect("first pick");
    assert_eq!(report.outcome, PickOutcome::Completed);
    assert!(report.belt_restarted);

    // exactly one pick's worth of motion and belt switching
    assert_eq!(arm.poses().len(), SEQUENCE_STEPS);
    assert_eq!(arm.power_offs(), 1);
    assert_eq!(belt.stops(), 1);
    assert_eq!(belt.starts(), 1);
    assert_eq!(machine.state(), SystemState::Idle);
}

#[test]
fn second_pick_runs_after_the_cooldown_elapses() {
    let mut cfg = fast_config();
    cfg.pick.cooldown = Duration::from_secs(2);

    let belt = StubBelt::new();
    let arm = StubArm::new();
    let clock = ManualClock::new();
    let machine = PickStateMachine::with_clock(
        &cfg,
        Box::new(belt.clone()),
        Box::new(arm.clone()),
        Box::new(clock.clone()),
    );

    machine.execute(attempt("plastic_bottle")).expect("first pick");
    assert!(!machine.can_trigger(cfg.pick.cooldown));

    clock.advance(Duration::from_secs(2));
    assert!(machine.can_trigger(cfg.pick.cooldown));

    let report = machine.execute(attempt("glass_bottle")).expect("second pick");
    assert_eq!(report.outcome, PickOutcome::Completed);
    assert_eq!(arm.poses().len(), 2 * SEQUENCE_STEPS);
    assert_eq!(belt.stops(), 2);
    assert_eq!(belt.starts(), 2);
}

#[test]
fn back_to_back_picks_with_zero_cooldown() {
    let cfg = fast_config();
    let belt = StubBelt::new();
    let arm = StubArm::new();
    let machine = PickStateMachine::new(&cfg, Box::new(belt.clone()), Box::new(arm.clone()));

    for _ in 0..3 {
        assert!(machine.can_trigger(cfg.pick.cooldown));
        machine.execute(attempt("aluminum_can")).expect("pick");
    }
    assert_eq!(arm.poses().len(), 3 * SEQUENCE_STEPS);
    assert_eq!(machine.state(), SystemState::Idle);
}
