//! Screen-space geometry: points, display bounds and interpolation.
//!
//! All coordinates are logical compositor pixels with the origin at the
//! top-left of the virtual desktop.  Paths are linear in screen space.

use serde::{Deserialize, Serialize};

use crate::protocol::Region;

/// A point in logical screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// The point a fraction `t` of the way from `self` to `other`.
    pub fn lerp(self, other: Point, t: f64) -> Point {
        Point {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Returns `self` moved by `(dx, dy)`.
    pub fn offset(self, dx: f64, dy: f64) -> Point {
        Point {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// The rectangle of the virtual desktop that accepts absolute coordinates.
///
/// `x`/`y` is the top-left corner; the right and bottom edges are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl DisplayBounds {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns the rightmost X coordinate (exclusive).
    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    /// Returns the bottommost Y coordinate (exclusive).
    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    /// Returns `true` if `p` lies inside the bounds.  NaN never does.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= f64::from(self.x)
            && p.x < self.right() as f64
            && p.y >= f64::from(self.y)
            && p.y < self.bottom() as f64
    }

    /// Smallest rectangle covering both `self` and `other`.
    pub fn union(&self, other: &DisplayBounds) -> DisplayBounds {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        DisplayBounds {
            x,
            y,
            width: u32::try_from(right - i64::from(x)).unwrap_or(u32::MAX),
            height: u32::try_from(bottom - i64::from(y)).unwrap_or(u32::MAX),
        }
    }

    /// Bounds covering every advertised device region, if there are any.
    pub fn from_regions<'a>(regions: impl IntoIterator<Item = &'a Region>) -> Option<Self> {
        regions
            .into_iter()
            .map(|r| {
                DisplayBounds::new(
                    i32::try_from(r.offset_x).unwrap_or(i32::MAX),
                    i32::try_from(r.offset_y).unwrap_or(i32::MAX),
                    r.width,
                    r.height,
                )
            })
            .reduce(|acc, b| acc.union(&b))
    }
}

impl Default for DisplayBounds {
    /// A single 1920x1080 output at the origin.
    fn default() -> Self {
        Self::new(0, 0, 1920, 1080)
    }
}

/// Points strictly after `from` up to and including `to`, evenly spaced.
///
/// Returns `steps` points; the last is exactly `to`.  Zero steps yields an
/// empty path.
pub fn interpolate(from: Point, to: Point, steps: usize) -> Vec<Point> {
    (1..=steps)
        .map(|i| {
            if i == steps {
                to
            } else {
                from.lerp(to, i as f64 / steps as f64)
            }
        })
        .collect()
}

/// Number of steps needed so no step moves further than `max_step_px`.
///
/// Never returns fewer than `min_steps`.
pub fn steps_for_distance(distance: f64, max_step_px: f64, min_steps: usize) -> usize {
    if max_step_px <= 0.0 || !distance.is_finite() {
        return min_steps;
    }
    let needed = (distance / max_step_px).ceil() as usize;
    needed.max(min_steps)
}

/// Splits `total` into `parts` integers whose sum is exactly `total`.
///
/// The remainder is handed out one unit at a time to the leading parts, so
/// parts differ by at most one.  Zero parts yields an empty vector.
pub fn split_evenly(total: i32, parts: usize) -> Vec<i32> {
    if parts == 0 {
        return Vec::new();
    }
    let n = i32::try_from(parts).unwrap_or(i32::MAX);
    let base = total / n;
    let remainder = (total % n).unsigned_abs() as usize;
    let sign = total.signum();
    (0..parts)
        .map(|i| if i < remainder { base + sign } else { base })
        .collect()
}
