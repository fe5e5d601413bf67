//! Geometry primitives shared by layers, tools and hit-testing.
//!
//! Two coordinate spaces are in play. Tools receive pointer positions as
//! [`NormalizedPoint`]s in `0.0..=1.0` relative to the rendering surface;
//! layers are positioned with integer [`Bounds`] in surface pixels.
//! [`SurfaceSize`] converts between them.

use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "geometry_test.rs"]
mod tests;

/// A pointer position relative to the surface, `0.0..=1.0` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Same point with both coordinates clamped into `0.0..=1.0`.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self { x: self.x.clamp(0.0, 1.0), y: self.y.clamp(0.0, 1.0) }
    }

    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A point in surface pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Pixel dimensions of the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn diagonal(&self) -> f64 {
        f64::from(self.width).hypot(f64::from(self.height))
    }

    #[must_use]
    pub fn to_pixels(&self, p: NormalizedPoint) -> Point {
        Point { x: p.x * f64::from(self.width), y: p.y * f64::from(self.height) }
    }

    #[must_use]
    pub fn to_normalized(&self, p: Point) -> NormalizedPoint {
        let w = f64::from(self.width.max(1));
        let h = f64::from(self.height.max(1));
        NormalizedPoint { x: p.x / w, y: p.y / h }
    }

    /// Full-surface bounds anchored at the origin.
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        Bounds::new(0, 0, self.width, self.height)
    }
}

/// Axis-aligned rectangle in surface pixels. Position may be negative after
/// a move; size is unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    #[must_use]
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    #[must_use]
    pub fn is_positive_area(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    #[must_use]
    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    #[must_use]
    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    /// Half-open containment: the right and bottom edges are outside.
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= f64::from(self.x) && p.y >= f64::from(self.y) && p.x < self.right() as f64 && p.y < self.bottom() as f64
    }

    /// Smallest rectangle covering both.
    #[must_use]
    pub fn union(&self, other: &Bounds) -> Bounds {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Bounds { x, y, width: (right - i64::from(x)) as u32, height: (bottom - i64::from(y)) as u32 }
    }

    /// Overlap of both, or `None` when they do not intersect.
    #[must_use]
    pub fn intersect(&self, other: &Bounds) -> Option<Bounds> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= i64::from(x) || bottom <= i64::from(y) {
            return None;
        }
        Some(Bounds { x, y, width: (right - i64::from(x)) as u32, height: (bottom - i64::from(y)) as u32 })
    }

    /// Union of a list of rectangles; `None` for an empty list.
    #[must_use]
    pub fn union_all<'a>(items: impl IntoIterator<Item = &'a Bounds>) -> Option<Bounds> {
        items.into_iter().fold(None, |acc: Option<Bounds>, b| Some(acc.map_or(*b, |a| a.union(b))))
    }

    /// Pixel bounding box of normalized points (floor of the minimum, ceil of
    /// the maximum), clamped to the surface.
    #[must_use]
    pub fn from_normalized_points(points: &[NormalizedPoint], surface: SurfaceSize) -> Option<Bounds> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let w = f64::from(surface.width);
        let h = f64::from(surface.height);
        let x0 = (min_x * w).floor().clamp(0.0, w);
        let y0 = (min_y * h).floor().clamp(0.0, h);
        let x1 = (max_x * w).ceil().clamp(0.0, w);
        let y1 = (max_y * h).ceil().clamp(0.0, h);
        Some(Bounds { x: x0 as i32, y: y0 as i32, width: (x1 - x0) as u32, height: (y1 - y0) as u32 })
    }
}

/// Even-odd ray-cast point-in-polygon test.
#[must_use]
pub fn point_in_polygon(p: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y) && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}
