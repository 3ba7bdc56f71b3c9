//! Orientation estimation from a cropped target region.
//!
//! Objects on the belt are darker than the belt surface, so the region is
//! binarized with a local-mean adaptive threshold (tolerant of uneven
//! lighting), the largest 8-connected foreground component is taken as the
//! object, and the minimum-area rectangle around its outline gives the
//! angle. The angle is re-referenced to the object's long axis and
//! normalized to [-90, 90] degrees, 0 meaning long-axis horizontal.
//!
//! Estimation never fails upward: any degenerate input degrades to 0
//! degrees with a warning, and the pick proceeds with a neutral wrist.

use anyhow::{anyhow, bail, Result};
use std::collections::VecDeque;

use crate::frame::LumaRegion;

const DEFAULT_BLOCK: usize = 11;
const DEFAULT_BIAS: i32 = 2;
/// Components smaller than this are noise, not an object.
const MIN_COMPONENT_PIXELS: usize = 16;

#[derive(Debug, Clone)]
pub struct OrientationEstimator {
    /// Side length of the local-mean window.
    block: usize,
    /// Offset subtracted from the local mean before comparison.
    bias: i32,
    min_pixels: usize,
}

impl Default for OrientationEstimator {
    fn default() -> Self {
        Self {
            block: DEFAULT_BLOCK,
            bias: DEFAULT_BIAS,
            min_pixels: MIN_COMPONENT_PIXELS,
        }
    }
}

impl OrientationEstimator {
    pub fn new(block: usize, bias: i32) -> Self {
        Self {
            block: block.max(3),
            bias,
            min_pixels: MIN_COMPONENT_PIXELS,
        }
    }

    /// Estimate the long-axis angle of the object in `region`, in degrees
    /// within [-90, 90]. Degrades to 0.0 on any failure.
    pub fn estimate(&self, region: &LumaRegion, label: &str) -> f32 {
        match self.try_estimate(region) {
            Ok(angle) => {
                log::debug!("estimated angle {:.1} deg for {}", angle, label);
                angle
            }
            Err(e) => {
                log::warn!("orientation fallback to 0 deg for {}: {}", label, e);
                0.0
            }
        }
    }

    fn try_estimate(&self, region: &LumaRegion) -> Result<f32> {
        let (w, h) = (region.width, region.height);
        if w == 0 || h == 0 {
            bail!("empty region");
        }
        let mask = self.threshold(region);
        let component =
            largest_component(&mask, w, h).ok_or_else(|| anyhow!("no foreground pixels"))?;
        if component.len() < self.min_pixels {
            bail!("largest blob is only {} px", component.len());
        }
        let outline = boundary_points(&component, &mask, w, h);
        let hull = convex_hull(outline);
        if hull.len() < 2 {
            bail!("degenerate outline");
        }
        let (mut angle, extent_u, extent_v) = min_area_rect(&hull);
        // re-reference to the long axis
        if extent_u < extent_v {
            angle += 90.0;
        }
        Ok(normalize_angle(angle))
    }

    /// Local-mean adaptive threshold. Foreground = darker than the
    /// neighborhood mean by at least `bias`.
    fn threshold(&self, region: &LumaRegion) -> Vec<bool> {
        let (w, h) = (region.width, region.height);
        let px = region.pixels();
        let stride = w + 1;
        let mut integral = vec![0u64; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0u64;
            for x in 0..w {
                row_sum += px[y * w + x] as u64;
                integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
            }
        }
        let r = self.block / 2;
        let mut mask = vec![false; w * h];
        for y in 0..h {
            let y0 = y.saturating_sub(r);
            let y1 = (y + r).min(h - 1);
            for x in 0..w {
                let x0 = x.saturating_sub(r);
                let x1 = (x + r).min(w - 1);
                let sum = integral[(y1 + 1) * stride + x1 + 1] + integral[y0 * stride + x0]
                    - integral[y0 * stride + x1 + 1]
                    - integral[(y1 + 1) * stride + x0];
                let count = ((y1 - y0 + 1) * (x1 - x0 + 1)) as u64;
                let mean = (sum / count) as i32;
                mask[y * w + x] = (px[y * w + x] as i32) <= mean - self.bias;
            }
        }
        mask
    }
}

/// Pixel indices of the largest 8-connected foreground component.
fn largest_component(mask: &[bool], w: usize, h: usize) -> Option<Vec<usize>> {
    let mut seen = vec![false; mask.len()];
    let mut best: Vec<usize> = Vec::new();
    let mut queue = VecDeque::new();
    for start in 0..mask.len() {
        if !mask[start] || seen[start] {
            continue;
        }
        let mut current = Vec::new();
        seen[start] = true;
        queue.push_back(start);
        while let Some(idx) = queue.pop_front() {
            current.push(idx);
            let x = (idx % w) as i32;
            let y = (idx / w) as i32;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                        continue;
                    }
                    let n = ny as usize * w + nx as usize;
                    if mask[n] && !seen[n] {
                        seen[n] = true;
                        queue.push_back(n);
                    }
                }
            }
        }
        if current.len() > best.len() {
            best = current;
        }
    }
    if best.is_empty() {
        None
    } else {
        Some(best)
    }
}

/// Component pixels touching the background (or the region edge). The hull
/// of the outline equals the hull of the filled component.
fn boundary_points(component: &[usize], mask: &[bool], w: usize, h: usize) -> Vec<(i64, i64)> {
    let mut points = Vec::new();
    for &idx in component {
        let x = idx % w;
        let y = idx / w;
        let edge = x == 0
            || y == 0
            || x == w - 1
            || y == h - 1
            || !mask[idx - 1]
            || !mask[idx + 1]
            || !mask[idx - w]
            || !mask[idx + w];
        if edge {
            points.push((x as i64, y as i64));
        }
    }
    points
}

/// Andrew's monotone chain. Collinear inputs collapse to their two extreme
/// points.
fn convex_hull(mut points: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    points.sort_unstable();
    points.dedup();
    if points.len() < 3 {
        return points;
    }
    let cross = |o: (i64, i64), a: (i64, i64), b: (i64, i64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };
    let mut hull: Vec<(i64, i64)> = Vec::with_capacity(points.len() * 2);
    for &p in points.iter() {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in points.iter().rev() {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Minimum-area enclosing rectangle over the hull, found by aligning with
/// each hull edge. Returns (edge angle in degrees, extent along the edge,
/// extent across it).
fn min_area_rect(hull: &[(i64, i64)]) -> (f32, f64, f64) {
    if hull.len() == 2 {
        let dx = (hull[1].0 - hull[0].0) as f64;
        let dy = (hull[1].1 - hull[0].1) as f64;
        return (
            dy.atan2(dx).to_degrees() as f32,
            (dx * dx + dy * dy).sqrt(),
            0.0,
        );
    }
    let n = hull.len();
    let mut best_area = f64::INFINITY;
    let mut best = (0.0f32, 0.0f64, 0.0f64);
    for i in 0..n {
        let p = hull[i];
        let q = hull[(i + 1) % n];
        let dx = (q.0 - p.0) as f64;
        let dy = (q.1 - p.1) as f64;
        let len = (dx * dx + dy * dy).sqrt();
        if len == 0.0 {
            continue;
        }
        let (ux, uy) = (dx / len, dy / len);
        let (mut min_u, mut max_u) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_v, mut max_v) = (f64::INFINITY, f64::NEG_INFINITY);
        for &(x, y) in hull {
            let (fx, fy) = (x as f64, y as f64);
            let u = fx * ux + fy * uy;
            let v = -fx * uy + fy * ux;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        let extent_u = max_u - min_u;
        let extent_v = max_v - min_v;
        let area = extent_u * extent_v;
        if area < best_area {
            best_area = area;
            best = (dy.atan2(dx).to_degrees() as f32, extent_u, extent_v);
        }
    }
    best
}

fn normalize_angle(mut angle: f32) -> f32 {
    while angle > 90.0 {
        angle -= 180.0;
    }
    while angle < -90.0 {
        angle += 180.0;
    }
    angle
}
