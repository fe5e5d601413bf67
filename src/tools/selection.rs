//! Selection tools: lasso, rectangle and ellipse.
//!
//! All three produce a polygon of normalized points. The lasso adds one
//! vertex per click and closes on a click near its first vertex; the shape
//! tools derive the polygon from a drag.

use std::f64::consts::TAU;

use tracing::debug;

use super::{Action, Modifiers, Overlay, ToolContext};
use crate::consts::{CLICK_THRESHOLD, ELLIPSE_SEGMENTS, LASSO_CLOSE_FRACTION, LASSO_MIN_POINTS, MIN_SHAPE_FRACTION};
use crate::geometry::{Bounds, NormalizedPoint, Point, SurfaceSize};

#[cfg(test)]
#[path = "selection_test.rs"]
mod tests;

// =============================================================================
// LASSO
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct LassoTool {
    points: Vec<NormalizedPoint>,
    closed: bool,
    press: Option<NormalizedPoint>,
}

impl LassoTool {
    #[must_use]
    pub fn points(&self) -> &[NormalizedPoint] {
        &self.points
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Pixel bounding box of the current points.
    #[must_use]
    pub fn bounds(&self, surface: SurfaceSize) -> Option<Bounds> {
        Bounds::from_normalized_points(&self.points, surface)
    }

    pub(super) fn pointer_down(&mut self, point: NormalizedPoint) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.closed {
            self.points.clear();
            self.closed = false;
            actions.push(Action::SelectionCleared);
        }
        self.press = Some(point);
        actions
    }

    /// A press and release closer than the click threshold adds a vertex;
    /// drags are ignored.
    pub(super) fn pointer_up(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint) -> Vec<Action> {
        let Some(press) = self.press.take() else {
            return Vec::new();
        };
        if press.distance(point) >= CLICK_THRESHOLD {
            return Vec::new();
        }
        self.add_point(ctx.surface, point)
    }

    fn add_point(&mut self, surface: SurfaceSize, point: NormalizedPoint) -> Vec<Action> {
        if self.closed {
            return Vec::new();
        }
        if self.points.len() >= LASSO_MIN_POINTS {
            if let Some(first) = self.points.first() {
                let gap = surface.to_pixels(*first).distance(surface.to_pixels(point));
                if gap < LASSO_CLOSE_FRACTION * surface.diagonal() {
                    self.closed = true;
                    debug!(points = self.points.len(), "tools: lasso closed");
                    return vec![Action::SelectionChanged { points: self.points.clone(), closed: true }];
                }
            }
        }
        self.points.push(point);
        vec![Action::SelectionChanged { points: self.points.clone(), closed: false }]
    }

    pub(super) fn reset(&mut self) -> Vec<Action> {
        self.points.clear();
        self.closed = false;
        self.press = None;
        vec![Action::SelectionCleared]
    }

    pub(super) fn overlay(&self) -> Overlay {
        if self.points.is_empty() {
            Overlay::None
        } else {
            Overlay::Polygon { points: self.points.clone(), closed: self.closed }
        }
    }
}

// =============================================================================
// RECTANGLE / ELLIPSE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Rectangle,
    Ellipse,
}

/// Drag-to-bound selection. Shift constrains to a square or circle.
#[derive(Debug, Clone)]
pub struct ShapeSelectTool {
    shape: ShapeKind,
    anchor: Option<NormalizedPoint>,
    current: Option<NormalizedPoint>,
    points: Vec<NormalizedPoint>,
    closed: bool,
}

impl ShapeSelectTool {
    #[must_use]
    pub fn new(shape: ShapeKind) -> Self {
        Self { shape, anchor: None, current: None, points: Vec::new(), closed: false }
    }

    #[must_use]
    pub fn shape(&self) -> ShapeKind {
        self.shape
    }

    #[must_use]
    pub fn points(&self) -> &[NormalizedPoint] {
        &self.points
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn bounds(&self, surface: SurfaceSize) -> Option<Bounds> {
        Bounds::from_normalized_points(&self.points, surface)
    }

    pub(super) fn pointer_down(&mut self, point: NormalizedPoint) -> Vec<Action> {
        let had_selection = !self.points.is_empty();
        self.points.clear();
        self.closed = false;
        self.anchor = Some(point);
        self.current = Some(point);
        if had_selection { vec![Action::SelectionCleared] } else { Vec::new() }
    }

    pub(super) fn pointer_move(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint, modifiers: Modifiers) -> Vec<Action> {
        if let Some(anchor) = self.anchor {
            self.current = Some(constrain(anchor, point, modifiers.shift, ctx.surface));
        }
        Vec::new()
    }

    /// Finalize the drag. Shapes not larger than the minimum fraction of the
    /// surface in both dimensions are discarded.
    pub(super) fn pointer_up(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint, modifiers: Modifiers) -> Vec<Action> {
        let Some(anchor) = self.anchor.take() else {
            return Vec::new();
        };
        self.current = None;
        let end = constrain(anchor, point, modifiers.shift, ctx.surface);
        let (w, h) = ((end.x - anchor.x).abs(), (end.y - anchor.y).abs());
        if w <= MIN_SHAPE_FRACTION || h <= MIN_SHAPE_FRACTION {
            debug!(?self.shape, w, h, "tools: shape selection too small");
            self.points.clear();
            return vec![Action::SelectionCleared];
        }
        self.points = shape_polygon(self.shape, anchor, end);
        self.closed = true;
        vec![Action::SelectionChanged { points: self.points.clone(), closed: true }]
    }

    pub(super) fn reset(&mut self) -> Vec<Action> {
        self.anchor = None;
        self.current = None;
        self.points.clear();
        self.closed = false;
        vec![Action::SelectionCleared]
    }

    pub(super) fn overlay(&self) -> Overlay {
        match (self.anchor, self.current) {
            (Some(anchor), Some(current)) => {
                Overlay::Polygon { points: shape_polygon(self.shape, anchor, current), closed: false }
            }
            _ if !self.points.is_empty() => Overlay::Polygon { points: self.points.clone(), closed: self.closed },
            _ => Overlay::None,
        }
    }
}

/// With `square`, make the drag extent equal in pixels along both axes.
fn constrain(anchor: NormalizedPoint, point: NormalizedPoint, square: bool, surface: SurfaceSize) -> NormalizedPoint {
    if !square {
        return point;
    }
    let a = surface.to_pixels(anchor);
    let p = surface.to_pixels(point);
    let (dx, dy) = (p.x - a.x, p.y - a.y);
    let side = dx.abs().max(dy.abs());
    let end = Point::new(a.x + side.copysign(dx), a.y + side.copysign(dy));
    surface.to_normalized(end).clamped()
}

/// Polygon for the box spanned by `a` and `b`: four corners, or an inscribed
/// ellipse of [`ELLIPSE_SEGMENTS`] vertices.
#[must_use]
pub fn shape_polygon(shape: ShapeKind, a: NormalizedPoint, b: NormalizedPoint) -> Vec<NormalizedPoint> {
    let (x0, x1) = (a.x.min(b.x), a.x.max(b.x));
    let (y0, y1) = (a.y.min(b.y), a.y.max(b.y));
    match shape {
        ShapeKind::Rectangle => vec![
            NormalizedPoint::new(x0, y0),
            NormalizedPoint::new(x1, y0),
            NormalizedPoint::new(x1, y1),
            NormalizedPoint::new(x0, y1),
        ],
        ShapeKind::Ellipse => {
            let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);
            let (rx, ry) = ((x1 - x0) / 2.0, (y1 - y0) / 2.0);
            (0..ELLIPSE_SEGMENTS)
                .map(|i| {
                    let theta = TAU * i as f64 / ELLIPSE_SEGMENTS as f64;
                    NormalizedPoint::new(cx + rx * theta.cos(), cy + ry * theta.sin())
                })
                .collect()
        }
    }
}
