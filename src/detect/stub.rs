//! Detection sources that need no network: a scripted source for tests and
//! a brightness-blob detector for dry runs against the synthetic scene.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::{Detection, DetectionSource};
use crate::frame::Frame;

/// Replays a fixed per-frame script of detection lists. Once the script is
/// exhausted every frame comes back empty.
pub struct ScriptedSource {
    script: VecDeque<Result<Vec<Detection>, String>>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            script: frames.into_iter().map(Ok).collect(),
        }
    }

    /// Append a frame that fails with the given message.
    pub fn push_failure(&mut self, message: &str) {
        self.script.push_back(Err(message.to_string()));
    }

    /// Append another frame of detections.
    pub fn push_frame(&mut self, detections: Vec<Detection>) {
        self.script.push_back(Ok(detections));
    }
}

impl DetectionSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        match self.script.pop_front() {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }
}

/// Luma below this counts as object when blob-scanning a frame.
const BLOB_THRESHOLD: u8 = 128;
/// Fewer dark pixels than this is noise, not a detection.
const MIN_BLOB_PIXELS: usize = 32;

/// Finds the bounding box of dark pixels in the frame and reports it as a
/// single detection with a fixed label. Pairs with `SyntheticBeltSource`
/// for camera-free end-to-end runs.
pub struct BlobSource {
    label: String,
}

impl BlobSource {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

impl DetectionSource for BlobSource {
    fn name(&self) -> &'static str {
        "blob"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let region = match frame.luma_region(0, 0, frame.width as i32, frame.height as i32) {
            Some(region) => region,
            None => return Ok(Vec::new()),
        };
        let (w, h) = (region.width, region.height);
        let px = region.pixels();
        let mut count = 0usize;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        for y in 0..h {
            for x in 0..w {
                if px[y * w + x] < BLOB_THRESHOLD {
                    count += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        if count < MIN_BLOB_PIXELS {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            x1: min_x as i32,
            y1: min_y as i32,
            x2: max_x as i32 + 1,
            y2: max_y as i32 + 1,
            confidence: 0.90,
            label: self.label.clone(),
        }])
    }
}
