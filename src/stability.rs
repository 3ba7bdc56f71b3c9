//! Debounce for pick triggering.
//!
//! A pick fires only after the same label has been selected inside the ROI
//! for N consecutive frames while the machine is Idle. Anything else (no
//! target, target outside the ROI, machine busy) zeroes the streak.

use crate::labels;
use crate::machine::SystemState;
use crate::select::Target;

#[derive(Debug)]
pub struct StabilityTracker {
    threshold: u32,
    count: u32,
    label: Option<String>,
}

impl StabilityTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            count: 0,
            label: None,
        }
    }

    /// Fold in one frame's observation and return the updated streak.
    pub fn observe(&mut self, target: Option<&Target>, state: SystemState) -> u32 {
        match target {
            Some(t) if state == SystemState::Idle && t.in_roi => {
                let key = labels::canonical(&t.detection.label);
                if self.label.as_deref() == Some(key.as_str()) {
                    self.count += 1;
                } else {
                    self.label = Some(key);
                    self.count = 1;
                }
            }
            _ => {
                self.count = 0;
                self.label = None;
            }
        }
        self.count
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// True once the streak has reached the configured threshold.
    pub fn is_eligible(&self) -> bool {
        self.count >= self.threshold
    }

    /// Clear the streak. Called after every trigger attempt so one stable
    /// run cannot fire twice.
    pub fn reset(&mut self) {
        self.count = 0;
        self.label = None;
    }
}
