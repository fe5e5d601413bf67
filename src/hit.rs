//! Alpha-map hit testing.
//!
//! A layer's hit-test entry keeps one alpha byte per pixel of its decoded
//! raster. Lookups map a surface point into the layer's bounds, scale into
//! raster coordinates, and compare the alpha against
//! [`HIT_ALPHA_THRESHOLD`]. Layers whose entry has not been built yet fall
//! back to bounding-box containment.

#[cfg(test)]
#[path = "hit_test.rs"]
mod tests;

use crate::consts::HIT_ALPHA_THRESHOLD;
use crate::geometry::{Bounds, Point};
use crate::raster::Surface;

/// Derived alpha map of one layer raster. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitTestEntry {
    alpha: Vec<u8>,
    width: u32,
    height: u32,
}

impl HitTestEntry {
    #[must_use]
    pub fn from_surface(surface: &Surface) -> Self {
        Self { alpha: surface.alpha_channel(), width: surface.width(), height: surface.height() }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Alpha at raster coordinates, `None` outside the map.
    #[must_use]
    pub fn alpha_at(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.alpha.get(y as usize * self.width as usize + x as usize).copied()
    }

    /// Hit check for a surface point against a layer placed at `bounds`.
    #[must_use]
    pub fn is_opaque_at(&self, bounds: &Bounds, p: Point) -> bool {
        if !bounds.contains(p) || self.width == 0 || self.height == 0 {
            return false;
        }
        let lx = (p.x - f64::from(bounds.x)) / f64::from(bounds.width) * f64::from(self.width);
        let ly = (p.y - f64::from(bounds.y)) / f64::from(bounds.height) * f64::from(self.height);
        self.alpha_at(lx.floor() as u32, ly.floor() as u32).is_some_and(|a| a > HIT_ALPHA_THRESHOLD)
    }
}

/// Whether a layer at `bounds` is hit at `p`, using the alpha map when built.
#[must_use]
pub fn layer_hit(bounds: &Bounds, entry: Option<&HitTestEntry>, p: Point) -> bool {
    match entry {
        Some(entry) => entry.is_opaque_at(bounds, p),
        None => bounds.contains(p),
    }
}
