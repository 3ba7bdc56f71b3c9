//! Frames and frame sources.
//!
//! - `Frame`: owned RGB24 pixel buffer with the derived views the engine
//!   needs (center point, cropped luma regions for orientation estimation).
//! - `FrameSource`: boundary trait the daemon pulls frames through.
//! - `SyntheticBeltSource`: deterministic generated scene (light belt, one
//!   darker rotated object drifting across it) so the whole pipeline runs
//!   without a camera. Doubles as the fixture for orientation tests.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::Detection;

/// One captured frame, RGB24, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} rgb24",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn rgb(&self) -> &[u8] {
        &self.data
    }

    /// Frame center in pixel coordinates (integer division, matching the
    /// centroid convention used for detections).
    pub fn center(&self) -> (i32, i32) {
        (self.width as i32 / 2, self.height as i32 / 2)
    }

    /// Crop a bounding box to the frame and convert it to luma. Returns
    /// `None` when the clipped box is empty.
    pub fn luma_region(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> Option<LumaRegion> {
        let x1 = x1.max(0) as usize;
        let y1 = y1.max(0) as usize;
        let x2 = (x2.min(self.width as i32)).max(0) as usize;
        let y2 = (y2.min(self.height as i32)).max(0) as usize;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        let width = x2 - x1;
        let height = y2 - y1;
        let mut pixels = Vec::with_capacity(width * height);
        for y in y1..y2 {
            let row = (y * self.width as usize + x1) * 3;
            for x in 0..width {
                let p = row + x * 3;
                pixels.push(luma(self.data[p], self.data[p + 1], self.data[p + 2]));
            }
        }
        Some(LumaRegion {
            width,
            height,
            pixels,
        })
    }
}

/// Integer BT.601 luma approximation.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

/// Grayscale crop handed to the orientation estimator.
#[derive(Debug, Clone)]
pub struct LumaRegion {
    pub width: usize,
    pub height: usize,
    pixels: Vec<u8>,
}

impl LumaRegion {
    /// Build a region directly from luma bytes. Used by tests and by
    /// adapters that already have grayscale data.
    pub fn from_luma(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != width * height {
            return Err(anyhow!(
                "luma buffer is {} bytes, expected {} for {}x{}",
                pixels.len(),
                width * height,
                width,
                height
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// Boundary trait for whatever produces frames.
pub trait FrameSource: Send {
    fn name(&self) -> &'static str;
    fn next_frame(&mut self) -> Result<Frame>;
}

const BELT_SHADE: u8 = 200;
const OBJECT_SHADE: u8 = 60;
const DEFAULT_NOISE: i16 = 3;
const DEFAULT_DRIFT_PX: f32 = 4.0;

/// Scene objects cycled through as each one drifts off the belt.
const SCENE_OBJECTS: &[(&str, f32)] = &[
    ("plastic_bottle", 25.0),
    ("chips_bag", -15.0),
    ("glass_bottle", -30.0),
    ("paper_cup", 5.0),
];

/// Generated conveyor scene: a light belt with one darker rotated
/// rectangular object moving right to left.
pub struct SyntheticBeltSource {
    width: u32,
    height: u32,
    label: String,
    angle_deg: f32,
    cx: f32,
    cy: f32,
    half_len: f32,
    half_wide: f32,
    drift_px: f32,
    noise: i16,
    cycle: usize,
    rng: StdRng,
    last_truth: Detection,
}

impl SyntheticBeltSource {
    pub fn new(width: u32, height: u32) -> Self {
        let (label, angle) = SCENE_OBJECTS[0];
        let mut source = Self {
            width,
            height,
            label: label.to_string(),
            angle_deg: angle,
            cx: width as f32 * 0.8,
            cy: height as f32 / 2.0,
            half_len: width as f32 * 0.11,
            half_wide: height as f32 * 0.045,
            drift_px: DEFAULT_DRIFT_PX,
            noise: DEFAULT_NOISE,
            cycle: 0,
            rng: StdRng::seed_from_u64(0x5041_434b),
            last_truth: Detection {
                x1: 0,
                y1: 0,
                x2: 1,
                y2: 1,
                confidence: 0.0,
                label: label.to_string(),
            },
        };
        source.last_truth = source.bounding_box();
        source
    }

    /// Pin the scene to a single object. Used by tests that need a known
    /// label and angle.
    pub fn with_object(mut self, label: &str, angle_deg: f32) -> Self {
        self.label = label.to_string();
        self.angle_deg = angle_deg;
        self.cycle = usize::MAX; // stop cycling
        self.last_truth = self.bounding_box();
        self
    }

    /// Ground-truth detection for the most recently rendered frame.
    pub fn truth(&self) -> Detection {
        self.last_truth.clone()
    }

    fn bounding_box(&self) -> Detection {
        let theta = self.angle_deg.to_radians();
        let half_w = self.half_len * theta.cos().abs() + self.half_wide * theta.sin().abs();
        let half_h = self.half_len * theta.sin().abs() + self.half_wide * theta.cos().abs();
        Detection {
            x1: (self.cx - half_w) as i32,
            y1: (self.cy - half_h) as i32,
            x2: (self.cx + half_w) as i32 + 1,
            y2: (self.cy + half_h) as i32 + 1,
            confidence: 0.90,
            label: self.label.clone(),
        }
    }

    fn render(&mut self) -> Frame {
        let theta = self.angle_deg.to_radians();
        let (sin, cos) = (theta.sin(), theta.cos());
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                let dx = x as f32 - self.cx;
                let dy = y as f32 - self.cy;
                // object-local coordinates
                let u = dx * cos + dy * sin;
                let v = -dx * sin + dy * cos;
                let shade = if u.abs() <= self.half_len && v.abs() <= self.half_wide {
                    OBJECT_SHADE
                } else {
                    let jitter = self.rng.gen_range(-self.noise..=self.noise);
                    (BELT_SHADE as i16 + jitter).clamp(0, 255) as u8
                };
                data.extend_from_slice(&[shade, shade, shade]);
            }
        }
        // len is width*height*3 by construction
        Frame {
            width: self.width,
            height: self.height,
            data,
        }
    }

    fn advance(&mut self) {
        self.cx -= self.drift_px;
        if self.cx < -self.half_len * 2.0 {
            self.cx = self.width as f32 + self.half_len * 2.0;
            if self.cycle != usize::MAX {
                self.cycle = (self.cycle + 1) % SCENE_OBJECTS.len();
                let (label, angle) = SCENE_OBJECTS[self.cycle];
                self.label = label.to_string();
                self.angle_deg = angle;
            }
        }
    }
}

impl FrameSource for SyntheticBeltSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let frame = self.render();
        self.last_truth = self.bounding_box();
        self.advance();
        Ok(frame)
    }
}
