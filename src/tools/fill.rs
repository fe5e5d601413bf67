//! Fill tools: paint bucket and linear gradient, plus the flood fill they
//! rely on.

use std::collections::VecDeque;

use image::{Rgba, RgbaImage};
use tracing::warn;

use super::{Action, Overlay, ToolContext};
use crate::geometry::{Bounds, NormalizedPoint};
use crate::layers::LayerType;
use crate::raster::Surface;

#[cfg(test)]
#[path = "fill_test.rs"]
mod tests;

// =============================================================================
// FLOOD FILL
// =============================================================================

/// Pixels reached by a flood fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillRegion {
    width: u32,
    height: u32,
    mask: Vec<bool>,
    count: usize,
    bounds: Option<Bounds>,
}

impl FillRegion {
    fn empty(width: u32, height: u32) -> Self {
        Self { width, height, mask: vec![false; width as usize * height as usize], count: 0, bounds: None }
    }

    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.mask[(y * self.width + x) as usize]
    }

    /// Number of filled pixels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Tight bounding box of the filled pixels.
    #[must_use]
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// Full-size transparent surface with only the filled pixels painted.
    #[must_use]
    pub fn paint(&self, color: Rgba<u8>) -> Surface {
        let mut image = RgbaImage::new(self.width, self.height);
        for (x, y, px) in image.enumerate_pixels_mut() {
            if self.mask[(y * self.width + x) as usize] {
                *px = color;
            }
        }
        Surface::from_image(image)
    }
}

fn matches(a: Rgba<u8>, b: Rgba<u8>, tolerance: u8) -> bool {
    a.0.iter().zip(b.0.iter()).all(|(x, y)| x.abs_diff(*y) <= tolerance)
}

/// 4-connected breadth-first fill from `(seed_x, seed_y)` over pixels whose
/// every channel is within `tolerance` of the seed colour.
#[must_use]
pub fn flood_fill(pixels: &RgbaImage, seed_x: u32, seed_y: u32, tolerance: u8) -> FillRegion {
    let (width, height) = pixels.dimensions();
    let mut region = FillRegion::empty(width, height);
    if seed_x >= width || seed_y >= height {
        return region;
    }
    let target = *pixels.get_pixel(seed_x, seed_y);
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (seed_x, seed_y, seed_x, seed_y);

    let mut queue = VecDeque::from([(seed_x, seed_y)]);
    region.mask[(seed_y * width + seed_x) as usize] = true;
    while let Some((x, y)) = queue.pop_front() {
        region.count += 1;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);

        let neighbours = [
            (x.checked_sub(1), Some(y)),
            (x.checked_add(1).filter(|nx| *nx < width), Some(y)),
            (Some(x), y.checked_sub(1)),
            (Some(x), y.checked_add(1).filter(|ny| *ny < height)),
        ];
        for (nx, ny) in neighbours {
            let (Some(nx), Some(ny)) = (nx, ny) else {
                continue;
            };
            let idx = (ny * width + nx) as usize;
            if !region.mask[idx] && matches(*pixels.get_pixel(nx, ny), target, tolerance) {
                region.mask[idx] = true;
                queue.push_back((nx, ny));
            }
        }
    }
    region.bounds = Some(Bounds::new(min_x as i32, min_y as i32, max_x - min_x + 1, max_y - min_y + 1));
    region
}

// =============================================================================
// BUCKET
// =============================================================================

/// Fills the connected region under a click, sampled from the selected layer.
#[derive(Debug, Clone, Default)]
pub struct BucketTool;

impl BucketTool {
    pub(super) fn pointer_up(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint) -> Vec<Action> {
        let Some(layer_id) = ctx.target_layer() else {
            return vec![Action::Warn("Please select a layer to fill".into())];
        };
        vec![Action::FloodFill {
            layer_id: layer_id.to_string(),
            seed: point,
            color: ctx.options.paint_color(),
            tolerance: ctx.options.tolerance,
        }]
    }
}

// =============================================================================
// GRADIENT
// =============================================================================

/// Drag from the opaque end to the transparent end.
#[derive(Debug, Clone, Default)]
pub struct GradientTool {
    start: Option<NormalizedPoint>,
    end: Option<NormalizedPoint>,
}

impl GradientTool {
    pub(super) fn pointer_down(&mut self, point: NormalizedPoint) -> Vec<Action> {
        self.start = Some(point);
        self.end = Some(point);
        Vec::new()
    }

    pub(super) fn pointer_move(&mut self, point: NormalizedPoint) -> Vec<Action> {
        if self.start.is_some() {
            self.end = Some(point);
        }
        Vec::new()
    }

    /// Render the gradient into a new full-surface layer.
    pub(super) fn pointer_up(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint) -> Vec<Action> {
        let Some(start) = self.start.take() else {
            return Vec::new();
        };
        self.end = None;
        let mut surface = Surface::new(ctx.surface.width, ctx.surface.height);
        surface.fill_linear_gradient(
            ctx.surface.to_pixels(start),
            ctx.surface.to_pixels(point),
            ctx.options.paint_color(),
        );
        match surface.to_png() {
            Ok(bytes) => vec![Action::CreateLayer {
                bytes,
                name: "Gradient".into(),
                bounds: ctx.surface.bounds(),
                layer_type: LayerType::Filled,
                history_action: "fill",
            }],
            Err(err) => {
                warn!(error = %err, "tools: gradient encode failed");
                Vec::new()
            }
        }
    }

    pub(super) fn reset(&mut self) {
        self.start = None;
        self.end = None;
    }

    pub(super) fn overlay(&self) -> Overlay {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Overlay::Line { start, end },
            _ => Overlay::None,
        }
    }
}
