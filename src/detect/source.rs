//! Detection records and the source boundary.
//!
//! The detector is an external collaborator: whatever answers for one frame
//! is authoritative for that frame. A source failure withholds detections
//! for the frame (logged, never fatal), so downstream stability tracking
//! simply sees an empty frame.

use anyhow::Result;

use crate::frame::Frame;

/// One detected object, corner-form bounding box in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    /// In [0, 1].
    pub confidence: f32,
    pub label: String,
}

impl Detection {
    /// Box centroid under integer division, the convention every spatial
    /// comparison in the engine uses.
    pub fn centroid(&self) -> (i32, i32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }
}

/// Boundary trait for whatever produces per-frame detections.
pub trait DetectionSource: Send {
    fn name(&self) -> &'static str;
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Inference cadence: run the source every `skip + 1` frames and reuse the
/// previous result in between. A failed inference clears the carried
/// detections so a stale target cannot keep accruing stability.
#[derive(Debug)]
pub struct DetectionCadence {
    skip: u32,
    frame_counter: u64,
    last: Vec<Detection>,
}

impl DetectionCadence {
    pub fn new(skip: u32) -> Self {
        Self {
            skip,
            frame_counter: 0,
            last: Vec::new(),
        }
    }

    pub fn observe(&mut self, source: &mut dyn DetectionSource, frame: &Frame) -> Vec<Detection> {
        let run = self.frame_counter % (self.skip as u64 + 1) == 0;
        self.frame_counter += 1;
        if run {
            match source.detect(frame) {
                Ok(detections) => self.last = detections,
                Err(e) => {
                    log::warn!("detection source {} failed: {:#}", source.name(), e);
                    self.last.clear();
                }
            }
        }
        self.last.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedSource;

    fn frame() -> Frame {
        Frame::new(8, 8, vec![0; 8 * 8 * 3]).unwrap()
    }

    fn det(label: &str) -> Detection {
        Detection {
            x1: 0,
            y1: 0,
            x2: 10,
            y2: 10,
            confidence: 0.9,
            label: label.to_string(),
        }
    }

    #[test]
    fn centroid_truncates_like_the_roi_math() {
        let d = Detection {
            x1: 0,
            y1: 0,
            x2: 5,
            y2: 3,
            confidence: 1.0,
            label: "x".to_string(),
        };
        assert_eq!(d.centroid(), (2, 1));
    }

    #[test]
    fn cadence_reuses_detections_on_skipped_frames() {
        let mut source = ScriptedSource::new(vec![
            vec![det("a")],
            vec![det("b")],
            vec![det("c")],
        ]);
        let mut cadence = DetectionCadence::new(2);
        let f = frame();
        // frames 0,1,2 share script entry 0; frame 3 advances
        assert_eq!(cadence.observe(&mut source, &f)[0].label, "a");
        assert_eq!(cadence.observe(&mut source, &f)[0].label, "a");
        assert_eq!(cadence.observe(&mut source, &f)[0].label, "a");
        assert_eq!(cadence.observe(&mut source, &f)[0].label, "b");
    }

    #[test]
    fn cadence_zero_runs_every_frame() {
        let mut source = ScriptedSource::new(vec![vec![det("a")], vec![det("b")]]);
        let mut cadence = DetectionCadence::new(0);
        let f = frame();
        assert_eq!(cadence.observe(&mut source, &f)[0].label, "a");
        assert_eq!(cadence.observe(&mut source, &f)[0].label, "b");
    }

    #[test]
    fn failed_inference_clears_carried_detections() {
        let mut source = ScriptedSource::new(vec![vec![det("a")]]);
        source.push_failure("inference service unreachable");
        let mut cadence = DetectionCadence::new(0);
        let f = frame();
        assert_eq!(cadence.observe(&mut source, &f).len(), 1);
        assert!(cadence.observe(&mut source, &f).is_empty());
    }

    #[test]
    fn exhausted_script_yields_empty_frames() {
        let mut source = ScriptedSource::new(vec![vec![det("a")]]);
        let mut cadence = DetectionCadence::new(0);
        let f = frame();
        cadence.observe(&mut source, &f);
        assert!(cadence.observe(&mut source, &f).is_empty());
    }
}
