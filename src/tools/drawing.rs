//! Drawing tools: brush and eraser.
//!
//! The stroke is rendered live onto a surface-sized edit raster. On release
//! the touched region, padded by the brush radius, is cropped out and
//! emitted: a brush stroke merges into the selected layer or becomes a new
//! layer, an eraser stroke is composited destination-out into the selected
//! layer with a blur derived from the hardness option.

use image::Rgba;
use tracing::{debug, warn};

use super::{Action, ToolContext};
use crate::consts::STROKE_PADDING_PX;
use crate::geometry::{Bounds, NormalizedPoint, Point};
use crate::layers::{LayerId, LayerType};
use crate::raster::{CompositeMode, Surface};

#[cfg(test)]
#[path = "drawing_test.rs"]
mod tests;

const ERASER_INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeMode {
    Brush,
    Eraser,
}

/// Pixel extent touched by stroke centres.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Extent {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Extent {
    fn at(p: Point) -> Self {
        Self { min_x: p.x, min_y: p.y, max_x: p.x, max_y: p.y }
    }

    fn include(&mut self, p: Point) {
        self.min_x = self.min_x.min(p.x);
        self.min_y = self.min_y.min(p.y);
        self.max_x = self.max_x.max(p.x);
        self.max_y = self.max_y.max(p.y);
    }
}

#[derive(Debug, Clone)]
pub struct StrokeTool {
    mode: StrokeMode,
    canvas: Option<Surface>,
    last: Option<Point>,
    extent: Option<Extent>,
    target: Option<LayerId>,
    radius: f64,
    ink: Rgba<u8>,
}

impl StrokeTool {
    #[must_use]
    pub fn brush() -> Self {
        Self::new(StrokeMode::Brush)
    }

    #[must_use]
    pub fn eraser() -> Self {
        Self::new(StrokeMode::Eraser)
    }

    fn new(mode: StrokeMode) -> Self {
        Self { mode, canvas: None, last: None, extent: None, target: None, radius: 0.0, ink: ERASER_INK }
    }

    #[must_use]
    pub fn mode(&self) -> StrokeMode {
        self.mode
    }

    #[must_use]
    pub fn is_drawing(&self) -> bool {
        self.canvas.is_some()
    }

    pub(super) fn activate(&mut self, ctx: &ToolContext<'_>) {
        self.target = ctx.target_layer().map(String::from);
    }

    pub(super) fn pointer_down(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint) -> Vec<Action> {
        self.target = ctx.target_layer().map(String::from);
        if self.mode == StrokeMode::Eraser && self.target.is_none() {
            return vec![Action::Warn("Please select a layer to erase".into())];
        }
        let p = ctx.surface.to_pixels(point);
        self.radius = ctx.options.size.max(1.0) / 2.0;
        self.ink = match self.mode {
            StrokeMode::Brush => ctx.options.paint_color(),
            StrokeMode::Eraser => ERASER_INK,
        };
        let mut canvas = Surface::new(ctx.surface.width, ctx.surface.height);
        canvas.stamp_disc(p, self.radius, self.ink);
        self.canvas = Some(canvas);
        self.last = Some(p);
        self.extent = Some(Extent::at(p));
        Vec::new()
    }

    pub(super) fn pointer_move(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint) -> Vec<Action> {
        self.extend_to(ctx.surface.to_pixels(point));
        Vec::new()
    }

    pub(super) fn pointer_up(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint) -> Vec<Action> {
        self.extend_to(ctx.surface.to_pixels(point));
        let (Some(canvas), Some(extent)) = (self.canvas.take(), self.extent.take()) else {
            self.reset();
            return Vec::new();
        };
        let target = self.target.take();
        self.last = None;

        let Some(bounds) = self.stroke_bounds(extent, canvas.width(), canvas.height()) else {
            return Vec::new();
        };
        let bytes = match canvas.crop(bounds).and_then(|region| region.to_png()) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, ?bounds, "tools: stroke encode failed");
                return Vec::new();
            }
        };
        debug!(mode = ?self.mode, ?bounds, "tools: stroke finished");

        match (self.mode, target) {
            (StrokeMode::Brush, Some(layer_id)) => {
                vec![Action::MergeStroke { layer_id, bytes, bounds, mode: CompositeMode::SourceOver, blur: 0.0 }]
            }
            (StrokeMode::Brush, None) => vec![Action::CreateLayer {
                bytes,
                name: "Drawing".into(),
                bounds,
                layer_type: LayerType::Drawing,
                history_action: "draw",
            }],
            (StrokeMode::Eraser, Some(layer_id)) => vec![Action::MergeStroke {
                layer_id,
                bytes,
                bounds,
                mode: CompositeMode::DestinationOut,
                blur: ctx.options.eraser_blur(),
            }],
            (StrokeMode::Eraser, None) => Vec::new(),
        }
    }

    fn extend_to(&mut self, p: Point) {
        let (Some(canvas), Some(last), Some(extent)) = (self.canvas.as_mut(), self.last, self.extent.as_mut()) else {
            return;
        };
        canvas.stroke_segment(last, p, self.radius, self.ink);
        extent.include(p);
        self.last = Some(p);
    }

    /// Stroke extent padded by the radius, clipped to the surface.
    fn stroke_bounds(&self, extent: Extent, width: u32, height: u32) -> Option<Bounds> {
        let pad = self.radius.ceil() + f64::from(STROKE_PADDING_PX);
        let x = (extent.min_x - pad).floor().max(0.0);
        let y = (extent.min_y - pad).floor().max(0.0);
        let right = (extent.max_x + pad).ceil().min(f64::from(width));
        let bottom = (extent.max_y + pad).ceil().min(f64::from(height));
        if right <= x || bottom <= y {
            return None;
        }
        Some(Bounds::new(x as i32, y as i32, (right - x) as u32, (bottom - y) as u32))
    }

    pub(super) fn reset(&mut self) {
        self.canvas = None;
        self.last = None;
        self.extent = None;
        self.target = None;
    }
}
