//! Per-frame target selection with region-of-interest priority.
//!
//! One detection is chosen per frame. Anything inside the ROI beats
//! everything outside it, regardless of confidence; among candidates on the
//! same side of that split, highest confidence wins and ties keep the
//! first-seen detection.

use crate::detect::Detection;

/// Centered pick window. `rx`/`ry` are half-extents in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub cx: i32,
    pub cy: i32,
    pub rx: i32,
    pub ry: i32,
}

impl Roi {
    /// Build from fractional margins of the frame size. The margin is the
    /// window's full width as a fraction of the frame, so a margin of 0.15
    /// on a 640-wide frame gives a half-extent of 48 px around the center,
    /// and a margin of 1.0 spans the whole frame.
    pub fn from_margins(width: u32, height: u32, margin_x: f32, margin_y: f32) -> Self {
        Self {
            cx: width as i32 / 2,
            cy: height as i32 / 2,
            rx: (width as f32 * margin_x / 2.0) as i32,
            ry: (height as f32 * margin_y / 2.0) as i32,
        }
    }

    pub fn contains(&self, u: i32, v: i32) -> bool {
        (u - self.cx).abs() <= self.rx && (v - self.cy).abs() <= self.ry
    }

    /// Corner form, for status logging.
    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        (
            self.cx - self.rx,
            self.cy - self.ry,
            self.cx + self.rx,
            self.cy + self.ry,
        )
    }
}

/// A selected detection with its derived per-frame fields.
#[derive(Debug, Clone)]
pub struct Target {
    pub detection: Detection,
    pub centroid: (i32, i32),
    pub in_roi: bool,
}

#[derive(Debug, Clone)]
pub struct TargetSelector {
    roi: Roi,
}

impl TargetSelector {
    pub fn new(roi: Roi) -> Self {
        Self { roi }
    }

    pub fn roi(&self) -> &Roi {
        &self.roi
    }

    /// Pick the frame's single best target, or `None` for an empty list.
    pub fn select(&self, detections: &[Detection]) -> Option<Target> {
        let mut best_inside: Option<Target> = None;
        let mut best_any: Option<Target> = None;
        for detection in detections {
            let centroid = detection.centroid();
            let in_roi = self.roi.contains(centroid.0, centroid.1);
            let candidate = Target {
                detection: detection.clone(),
                centroid,
                in_roi,
            };
            // strict > keeps the first-seen detection on ties
            if in_roi
                && best_inside
                    .as_ref()
                    .map_or(true, |b| candidate.detection.confidence > b.detection.confidence)
            {
                best_inside = Some(candidate.clone());
            }
            if best_any
                .as_ref()
                .map_or(true, |b| candidate.detection.confidence > b.detection.confidence)
            {
                best_any = Some(candidate);
            }
        }
        best_inside.or(best_any)
    }
}
