/// Screen-space rectangles

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixels; the origin may be negative on
/// multi-monitor desktops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Same size, moved by `(dx, dy)`
    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Point at fractional position `(fx, fy)` inside the rectangle
    pub fn point_at(&self, fx: f64, fy: f64) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 * fx,
            self.y as f64 + self.height as f64 * fy,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Overlap with a `bounds_w` x `bounds_h` area anchored at the origin
    pub fn clamp_to(&self, bounds_w: u32, bounds_h: u32) -> Option<Rect> {
        let x0 = self.x.max(0) as i64;
        let y0 = self.y.max(0) as i64;
        let x1 = (self.x as i64 + self.width as i64).min(bounds_w as i64);
        let y1 = (self.y as i64 + self.height as i64).min(bounds_h as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    /// Part of the rectangle at non-negative coordinates, which is where any
    /// capture of it actually starts
    pub fn clip_negative(&self) -> Option<Rect> {
        self.clamp_to(u32::MAX, u32::MAX)
    }
}
