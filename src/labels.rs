//! Label classification tables.
//!
//! Detector labels arrive as free-form strings. Two lookups drive trajectory
//! shaping: `Category` picks the delivery-side base template, and
//! `RotationStrategy` picks how the grip wrist value is derived. Both return
//! an explicit `Unknown` variant for labels missing from the tables; callers
//! decide the fallback and log it where it happens.

use std::collections::HashSet;
use std::fmt;

use crate::config::LabelSettings;

/// Delivery-side classification of a detected label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Recyclable,
    NonRecyclable,
    Unknown,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Recyclable => write!(f, "recyclable"),
            Category::NonRecyclable => write!(f, "non_recyclable"),
            Category::Unknown => write!(f, "unknown"),
        }
    }
}

/// How the grip wrist channel value is chosen for a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    /// A constant wrist value regardless of the estimated angle.
    Fixed,
    /// Wrist value mapped linearly from the estimated angle.
    AngleBased,
    /// Label not present in either table; callers fall back to neutral.
    Unknown,
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationStrategy::Fixed => write!(f, "fixed"),
            RotationStrategy::AngleBased => write!(f, "angle_based"),
            RotationStrategy::Unknown => write!(f, "unknown"),
        }
    }
}

/// Canonical form used for every label comparison in the crate.
pub fn canonical(label: &str) -> String {
    label.trim().to_ascii_lowercase()
}

/// Immutable label lookup tables, canonicalized at construction.
#[derive(Debug, Clone)]
pub struct LabelBook {
    recyclable: HashSet<String>,
    non_recyclable: HashSet<String>,
    angle_based: HashSet<String>,
    fixed_rotation: HashSet<String>,
}

impl LabelBook {
    pub fn new(
        recyclable: &[String],
        non_recyclable: &[String],
        angle_based: &[String],
        fixed_rotation: &[String],
    ) -> Self {
        let canon = |labels: &[String]| -> HashSet<String> {
            labels.iter().map(|l| canonical(l)).collect()
        };
        Self {
            recyclable: canon(recyclable),
            non_recyclable: canon(non_recyclable),
            angle_based: canon(angle_based),
            fixed_rotation: canon(fixed_rotation),
        }
    }

    pub fn from_settings(settings: &LabelSettings) -> Self {
        Self::new(
            &settings.recyclable,
            &settings.non_recyclable,
            &settings.angle_based,
            &settings.fixed_rotation,
        )
    }

    pub fn category(&self, label: &str) -> Category {
        let key = canonical(label);
        if self.recyclable.contains(&key) {
            Category::Recyclable
        } else if self.non_recyclable.contains(&key) {
            Category::NonRecyclable
        } else {
            Category::Unknown
        }
    }

    pub fn strategy(&self, label: &str) -> RotationStrategy {
        let key = canonical(label);
        if self.fixed_rotation.contains(&key) {
            RotationStrategy::Fixed
        } else if self.angle_based.contains(&key) {
            RotationStrategy::AngleBased
        } else {
            RotationStrategy::Unknown
        }
    }
}
