//! Pose sequences and trajectory construction.
//!
//! A pick is nine poses: Home, Reach, Grip, Lift, Rotate, Position,
//! Release, Retract, Home. Two base templates exist, one per delivery
//! side, and a built trajectory is a template with the grip wrist value
//! written into the rotation-affected steps and the positional correction
//! added into the fine-tune-affected steps. Base templates are never
//! mutated.

use crate::config::{FineTuneSettings, RotationSettings};
use crate::correct::Correction;
use crate::labels::{Category, LabelBook, RotationStrategy};

/// Controllable channels on the arm bus.
pub const ARM_CHANNELS: usize = 6;
/// Poses per pick.
pub const SEQUENCE_STEPS: usize = 9;

/// Step names for logging, indexed like the sequence.
pub const STEP_NAMES: [&str; SEQUENCE_STEPS] = [
    "home", "reach", "grip", "lift", "rotate", "position", "release", "retract", "home",
];

/// Delivery swing to the left (recyclable) box. Channel layout:
/// 1 grip, 2 wrist, 3 elbow height, 4-5 shoulder/boom, 6 base rotation.
const LEFT_TEMPLATE: [[u16; ARM_CHANNELS]; SEQUENCE_STEPS] = [
    [250, 500, 300, 900, 700, 500],
    [250, 500, 150, 660, 330, 500],
    [600, 500, 150, 660, 330, 500],
    [600, 500, 150, 660, 450, 500],
    [600, 500, 150, 660, 450, 1000],
    [600, 500, 125, 800, 475, 1000],
    [250, 500, 125, 800, 475, 1000],
    [250, 500, 125, 900, 700, 1000],
    [250, 500, 300, 900, 700, 500],
];

/// Delivery swing to the right (non-recyclable) box. Differs from the left
/// template only in the base-rotation channel of the swing steps.
const RIGHT_TEMPLATE: [[u16; ARM_CHANNELS]; SEQUENCE_STEPS] = [
    [250, 500, 300, 900, 700, 500],
    [250, 500, 150, 660, 330, 500],
    [600, 500, 150, 660, 330, 500],
    [600, 500, 150, 660, 450, 500],
    [600, 500, 150, 660, 450, 0],
    [600, 500, 125, 800, 475, 0],
    [250, 500, 125, 800, 475, 0],
    [250, 500, 125, 900, 700, 0],
    [250, 500, 300, 900, 700, 500],
];

/// One pose: a value per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoseStep {
    channels: [u16; ARM_CHANNELS],
}

impl PoseStep {
    pub const fn new(channels: [u16; ARM_CHANNELS]) -> Self {
        Self { channels }
    }

    /// Value of a 1-based servo channel.
    pub fn get(&self, servo: u8) -> Option<u16> {
        self.channels.get(servo_index(servo)?).copied()
    }

    /// Overwrite a 1-based servo channel. Out-of-range ids are ignored;
    /// config validation keeps them out of real call paths.
    pub fn set(&mut self, servo: u8, value: u16) {
        if let Some(idx) = servo_index(servo) {
            if let Some(slot) = self.channels.get_mut(idx) {
                *slot = value;
            }
        }
    }

    /// Add a delta to a 1-based servo channel, clamped to the travel range.
    pub fn adjust(&mut self, servo: u8, delta: i32, travel: (u16, u16)) {
        if let Some(idx) = servo_index(servo) {
            if let Some(slot) = self.channels.get_mut(idx) {
                let moved = (*slot as i32 + delta).clamp(travel.0 as i32, travel.1 as i32);
                *slot = moved as u16;
            }
        }
    }

    /// (servo id, value) pairs in bus convention, for the arm driver.
    pub fn channel_pairs(&self) -> [(u8, u16); ARM_CHANNELS] {
        let mut pairs = [(0u8, 0u16); ARM_CHANNELS];
        for (i, &value) in self.channels.iter().enumerate() {
            pairs[i] = (i as u8 + 1, value);
        }
        pairs
    }
}

fn servo_index(servo: u8) -> Option<usize> {
    if servo == 0 || servo as usize > ARM_CHANNELS {
        None
    } else {
        Some(servo as usize - 1)
    }
}

/// An ordered, ready-to-dispatch pick trajectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    steps: [PoseStep; SEQUENCE_STEPS],
}

impl Sequence {
    fn from_template(template: &[[u16; ARM_CHANNELS]; SEQUENCE_STEPS]) -> Self {
        let mut steps = [PoseStep::new([0; ARM_CHANNELS]); SEQUENCE_STEPS];
        for (i, channels) in template.iter().enumerate() {
            steps[i] = PoseStep::new(*channels);
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[PoseStep] {
        &self.steps
    }

    fn step_mut(&mut self, index: usize) -> Option<&mut PoseStep> {
        self.steps.get_mut(index)
    }
}

/// Map an estimated angle onto the wrist servo range. Clamped to [-90, 90];
/// 0 maps to neutral, +90 to max, -90 to min, linear in between.
pub fn angle_to_servo(angle_deg: f32, rotation: &RotationSettings) -> u16 {
    let angle = angle_deg.clamp(-90.0, 90.0);
    let neutral = rotation.neutral as f32;
    let value = if angle >= 0.0 {
        neutral + (rotation.max as f32 - neutral) * (angle / 90.0)
    } else {
        neutral + (neutral - rotation.min as f32) * (angle / 90.0)
    };
    value.round() as u16
}

#[derive(Debug, Clone)]
pub struct TrajectoryBuilder {
    rotation: RotationSettings,
    fine_steps: Vec<usize>,
    travel: (u16, u16),
    labels: LabelBook,
}

impl TrajectoryBuilder {
    pub fn new(
        rotation: &RotationSettings,
        fine_tune: &FineTuneSettings,
        travel: (u16, u16),
        labels: &LabelBook,
    ) -> Self {
        Self {
            rotation: rotation.clone(),
            fine_steps: fine_tune.affected_steps.clone(),
            travel,
            labels: labels.clone(),
        }
    }

    /// Compose the full trajectory for one pick. `category` must already be
    /// resolved by the caller; `Unknown` falls back to the left template.
    pub fn build(
        &self,
        label: &str,
        category: Category,
        angle_deg: f32,
        correction: &Correction,
    ) -> Sequence {
        let template = match category {
            Category::NonRecyclable => &RIGHT_TEMPLATE,
            Category::Recyclable | Category::Unknown => &LEFT_TEMPLATE,
        };
        let mut sequence = Sequence::from_template(template);

        let wrist = self.wrist_value(label, angle_deg);
        for &index in &self.rotation.affected_steps {
            if let Some(step) = sequence.step_mut(index) {
                step.set(self.rotation.servo, wrist);
            }
        }

        // rotation first, then fine tuning; validated channels never overlap
        if correction.enabled {
            for &index in &self.fine_steps {
                if let Some(step) = sequence.step_mut(index) {
                    step.adjust(
                        correction.horizontal.servo,
                        correction.horizontal.delta,
                        self.travel,
                    );
                    step.adjust(
                        correction.vertical.servo,
                        correction.vertical.delta,
                        self.travel,
                    );
                }
            }
        }

        sequence
    }

    fn wrist_value(&self, label: &str, angle_deg: f32) -> u16 {
        match self.labels.strategy(label) {
            RotationStrategy::Fixed => self.rotation.fixed,
            RotationStrategy::AngleBased => {
                if angle_deg >= self.rotation.window_min_deg
                    && angle_deg <= self.rotation.window_max_deg
                {
                    angle_to_servo(angle_deg, &self.rotation)
                } else {
                    log::debug!(
                        "angle {:.1} outside adjustment window for {}, wrist stays neutral",
                        angle_deg,
                        label
                    );
                    self.rotation.neutral
                }
            }
            RotationStrategy::Unknown => {
                log::debug!("no rotation strategy for {}, wrist stays neutral", label);
                self.rotation.neutral
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SortcellConfig;
    use crate::correct::{ChannelAdjust, Correction, PositionCorrector};

    fn builder() -> TrajectoryBuilder {
        let cfg = SortcellConfig::default();
        TrajectoryBuilder::new(
            &cfg.rotation,
            &cfg.fine_tune,
            (cfg.arm.travel_min, cfg.arm.travel_max),
            &LabelBook::from_settings(&cfg.labels),
        )
    }

    fn no_correction() -> Correction {
        Correction {
            enabled: true,
            offset: (0, 0),
            horizontal: ChannelAdjust { servo: 6, delta: 0 },
            vertical: ChannelAdjust { servo: 3, delta: 0 },
        }
    }

    #[test]
    fn angle_to_servo_hits_the_calibration_points() {
        let rotation = SortcellConfig::default().rotation;
        assert_eq!(angle_to_servo(0.0, &rotation), 500);
        assert_eq!(angle_to_servo(90.0, &rotation), 875);
        assert_eq!(angle_to_servo(-90.0, &rotation), 130);
        // out-of-range input clamps
        assert_eq!(angle_to_servo(120.0, &rotation), 875);
        assert_eq!(angle_to_servo(-150.0, &rotation), 130);
    }

    #[test]
    fn angle_to_servo_is_monotonic() {
        let rotation = SortcellConfig::default().rotation;
        let mut previous = angle_to_servo(-90.0, &rotation);
        let mut angle = -89.0f32;
        while angle <= 90.0 {
            let value = angle_to_servo(angle, &rotation);
            assert!(value >= previous, "decrease at angle {}", angle);
            previous = value;
            angle += 1.0;
        }
    }

    #[test]
    fn angle_based_label_rotates_only_the_affected_steps() {
        // 20 deg inside the +-35 window: 500 + 375 * 20/90 = 583
        let seq = builder().build("plastic_bottle", Category::Recyclable, 20.0, &no_correction());
        let expected = 583u16;
        for (i, step) in seq.steps().iter().enumerate() {
            let wrist = step.get(2).unwrap();
            if [1, 2, 3].contains(&i) {
                assert_eq!(wrist, expected, "step {}", i);
            } else {
                assert_eq!(wrist, 500, "step {}", i);
            }
        }
        // left template: base rotation swings to 1000 mid-sequence
        assert_eq!(seq.steps()[4].get(6).unwrap(), 1000);
    }

    #[test]
    fn fixed_label_uses_the_constant_and_right_template() {
        let seq = builder().build("chips_bag", Category::NonRecyclable, 57.0, &no_correction());
        for i in [1usize, 2, 3] {
            assert_eq!(seq.steps()[i].get(2).unwrap(), 130);
        }
        // right template: base rotation swings to 0 mid-sequence
        assert_eq!(seq.steps()[4].get(6).unwrap(), 0);
        assert_eq!(seq.steps()[7].get(6).unwrap(), 0);
        // first and last steps return home on both templates
        assert_eq!(seq.steps()[0].get(6).unwrap(), 500);
        assert_eq!(seq.steps()[8].get(6).unwrap(), 500);
    }

    #[test]
    fn cups_and_cans_grip_at_the_fixed_value() {
        // fixed-rotation labels ignore the estimated angle entirely
        let seq = builder().build("paper_cup", Category::NonRecyclable, 45.0, &no_correction());
        assert_eq!(seq.steps()[1].get(2).unwrap(), 130);
        let seq = builder().build("aluminum_can", Category::Recyclable, -20.0, &no_correction());
        assert_eq!(seq.steps()[1].get(2).unwrap(), 130);
    }

    #[test]
    fn angle_outside_window_stays_neutral() {
        let seq = builder().build("plastic_bottle", Category::Recyclable, 60.0, &no_correction());
        assert_eq!(seq.steps()[1].get(2).unwrap(), 500);
    }

    #[test]
    fn unknown_label_gets_neutral_wrist_and_left_template() {
        let seq = builder().build("banana", Category::Unknown, 45.0, &no_correction());
        assert_eq!(seq.steps()[1].get(2).unwrap(), 500);
        assert_eq!(seq.steps()[4].get(6).unwrap(), 1000);
    }

    #[test]
    fn correction_lands_on_the_fine_tune_steps_only() {
        let cfg = SortcellConfig::default();
        let corrector = PositionCorrector::new(&cfg.fine_tune);
        // dx=40 -> +6 on servo 6; dy=-50 -> +5 on servo 3
        let correction = corrector.correct((360, 190), (320, 240));
        let seq = builder().build("paper_cup", Category::NonRecyclable, 0.0, &correction);

        for (i, step) in seq.steps().iter().enumerate() {
            let base = &RIGHT_TEMPLATE[i];
            let expect_h = if [1usize, 2].contains(&i) {
                base[5] + 6
            } else {
                base[5]
            };
            let expect_v = if [1usize, 2].contains(&i) {
                base[2] + 5
            } else {
                base[2]
            };
            assert_eq!(step.get(6).unwrap(), expect_h, "step {} horizontal", i);
            assert_eq!(step.get(3).unwrap(), expect_v, "step {} vertical", i);
        }
    }

    #[test]
    fn disabled_correction_leaves_channels_untouched() {
        let correction = Correction {
            enabled: false,
            offset: (0, 0),
            horizontal: ChannelAdjust {
                servo: 6,
                delta: 999,
            },
            vertical: ChannelAdjust {
                servo: 3,
                delta: 999,
            },
        };
        let seq = builder().build("paper_cup", Category::NonRecyclable, 0.0, &correction);
        assert_eq!(seq.steps()[1].get(6).unwrap(), RIGHT_TEMPLATE[1][5]);
    }

    #[test]
    fn adjustment_clamps_to_travel_range() {
        let correction = Correction {
            enabled: true,
            offset: (700, -900),
            horizontal: ChannelAdjust {
                servo: 6,
                delta: 100,
            },
            vertical: ChannelAdjust {
                servo: 3,
                delta: -80,
            },
        };
        let seq = builder().build("chips_bag", Category::NonRecyclable, 0.0, &correction);
        // step 1 vertical: 150 - 80 = 70, within range
        assert_eq!(seq.steps()[1].get(3).unwrap(), 70);
        // step 1 horizontal: 500 + 100 = 600, within range
        assert_eq!(seq.steps()[1].get(6).unwrap(), 600);

        let big = Correction {
            enabled: true,
            offset: (0, 0),
            horizontal: ChannelAdjust {
                servo: 6,
                delta: 2000,
            },
            vertical: ChannelAdjust {
                servo: 3,
                delta: -2000,
            },
        };
        let seq = builder().build("chips_bag", Category::NonRecyclable, 0.0, &big);
        assert_eq!(seq.steps()[1].get(6).unwrap(), 1000);
        assert_eq!(seq.steps()[1].get(3).unwrap(), 0);
    }

    #[test]
    fn building_twice_yields_identical_sequences() {
        let b = builder();
        let first = b.build("plastic_bottle", Category::Recyclable, 20.0, &no_correction());
        let second = b.build("plastic_bottle", Category::Recyclable, 20.0, &no_correction());
        assert_eq!(first, second);
    }
}
