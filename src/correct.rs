//! Fine positional correction from pixel offset.
//!
//! The pick templates assume the object sits at frame center. When the
//! stabilized target is off-center, its pixel offset is converted into two
//! bounded channel adjustments: horizontal reach and vertical height. Small
//! offsets inside the deadzone are ignored to keep jitter out of the arm.

use crate::config::FineTuneSettings;

/// One axis of correction: which servo takes it and by how much.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAdjust {
    /// 1-based servo id on the controller bus.
    pub servo: u8,
    pub delta: i32,
}

/// Result of a correction pass. `offset` holds the raw pixel offsets; an
/// axis inside the deadzone still reports its offset but contributes a
/// zero adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correction {
    pub enabled: bool,
    pub offset: (i32, i32),
    pub horizontal: ChannelAdjust,
    pub vertical: ChannelAdjust,
}

#[derive(Debug, Clone)]
pub struct PositionCorrector {
    settings: FineTuneSettings,
}

impl PositionCorrector {
    pub fn new(settings: &FineTuneSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    /// Map a centroid's offset from frame center into channel adjustments.
    /// Pure function of its inputs and the settings.
    pub fn correct(&self, centroid: (i32, i32), center: (i32, i32)) -> Correction {
        let s = &self.settings;
        let offset = (centroid.0 - center.0, centroid.1 - center.1);

        let horizontal = if s.enabled && offset.0.abs() >= s.deadzone_x {
            scale(offset.0, s.horizontal_factor, s.horizontal_max)
        } else {
            0
        };
        let vertical = if s.enabled && offset.1.abs() >= s.deadzone_y {
            scale(offset.1, s.vertical_factor, s.vertical_max)
        } else {
            0
        };

        Correction {
            enabled: s.enabled,
            offset,
            horizontal: ChannelAdjust {
                servo: s.horizontal_servo,
                delta: horizontal,
            },
            vertical: ChannelAdjust {
                servo: s.vertical_servo,
                delta: vertical,
            },
        }
    }
}

/// Scale a pixel offset by a factor (truncating toward zero, so sub-unit
/// results vanish) and clamp the magnitude.
fn scale(offset: i32, factor: f32, max_magnitude: i32) -> i32 {
    let raw = (offset as f32 * factor) as i32;
    raw.clamp(-max_magnitude, max_magnitude)
}
