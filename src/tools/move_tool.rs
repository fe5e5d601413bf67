//! Move tool: drags the selected layer's bounds.

use super::{Action, Overlay, ToolContext};
use crate::geometry::{Bounds, NormalizedPoint, Point};
use crate::layers::{LayerId, background_layer_id};

#[cfg(test)]
#[path = "move_tool_test.rs"]
mod tests;

#[derive(Debug, Clone)]
struct Drag {
    layer_id: LayerId,
    start: Point,
    original: Bounds,
    current: Bounds,
}

#[derive(Debug, Clone, Default)]
pub struct MoveTool {
    drag: Option<Drag>,
}

impl MoveTool {
    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub(super) fn activate(&mut self, _ctx: &ToolContext<'_>) {
        self.drag = None;
    }

    /// Start dragging the selected layer. The side's background never moves.
    pub(super) fn pointer_down(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint) -> Vec<Action> {
        let Some(id) = ctx.target_layer() else {
            return Vec::new();
        };
        if id == background_layer_id(ctx.layers.active_side()) {
            return Vec::new();
        }
        let Some(layer) = ctx.layers.layer(id) else {
            return Vec::new();
        };
        self.drag = Some(Drag {
            layer_id: id.to_string(),
            start: ctx.surface.to_pixels(point),
            original: layer.bounds,
            current: layer.bounds,
        });
        Vec::new()
    }

    pub(super) fn pointer_move(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint) -> Vec<Action> {
        let Some(drag) = self.drag.as_mut() else {
            return Vec::new();
        };
        let p = ctx.surface.to_pixels(point);
        let bounds = Bounds::new(
            (f64::from(drag.original.x) + p.x - drag.start.x).round() as i32,
            (f64::from(drag.original.y) + p.y - drag.start.y).round() as i32,
            drag.original.width,
            drag.original.height,
        );
        if bounds == drag.current {
            return Vec::new();
        }
        drag.current = bounds;
        vec![Action::MoveLayer { layer_id: drag.layer_id.clone(), bounds }]
    }

    /// Finish the drag; a changed position is committed.
    pub(super) fn pointer_up(&mut self, _ctx: &ToolContext<'_>) -> Vec<Action> {
        let Some(drag) = self.drag.take() else {
            return Vec::new();
        };
        let moved = drag.current.x != drag.original.x || drag.current.y != drag.original.y;
        if !moved {
            return Vec::new();
        }
        vec![Action::CommitMove { layer_id: drag.layer_id, from: drag.original, to: drag.current }]
    }

    pub(super) fn reset(&mut self) {
        self.drag = None;
    }

    pub(super) fn overlay(&self) -> Overlay {
        self.drag.as_ref().map_or(Overlay::None, |d| Overlay::Outline(d.current))
    }
}
