//! Tool hierarchy: pointer and key state machines that emit editor actions.
//!
//! DESIGN
//! ======
//! `Tool` is a closed enum over the eight editing tools. Every handler
//! receives a read-only [`ToolContext`] (the layer manager, the surface size,
//! the selected layer and the current options) and returns the [`Action`]s
//! the gesture produced. Tools never mutate layers themselves;
//! `services::actions` applies the actions against the editor state, which
//! keeps tools synchronous and testable without a runtime.
//!
//! Selection tools (lasso, rectangle, ellipse) accumulate normalized points.
//! Drawing tools (brush, eraser) render the in-progress stroke onto their
//! own edit surface and emit the cropped stroke on release.

pub mod drawing;
pub mod fill;
pub mod move_tool;
pub mod selection;

use image::Rgba;

use crate::consts::{DEFAULT_BRUSH_SIZE, DEFAULT_FILL_TOLERANCE};
use crate::geometry::{Bounds, NormalizedPoint, SurfaceSize};
use crate::layers::{LayerId, LayerManager, LayerType};
use crate::raster::CompositeMode;

pub use drawing::StrokeTool;
pub use fill::{BucketTool, FillRegion, GradientTool, flood_fill};
pub use move_tool::MoveTool;
pub use selection::{LassoTool, ShapeKind, ShapeSelectTool};

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

// =============================================================================
// TOOL KINDS
// =============================================================================

/// Identifies a tool without its gesture state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Move,
    Lasso,
    Rectangle,
    Ellipse,
    Brush,
    Eraser,
    Bucket,
    Gradient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Selection,
    Drawing,
    Fill,
    Utility,
}

/// Static description of a tool for toolbars and cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolMetadata {
    pub kind: ToolKind,
    pub label: &'static str,
    pub shortcut: char,
    pub category: ToolCategory,
    pub cursor: &'static str,
    /// Whether the tool does nothing without a selected layer.
    pub requires_layer: bool,
}

impl ToolKind {
    pub const ALL: [ToolKind; 8] = [
        Self::Move,
        Self::Lasso,
        Self::Rectangle,
        Self::Ellipse,
        Self::Brush,
        Self::Eraser,
        Self::Bucket,
        Self::Gradient,
    ];

    #[must_use]
    pub fn metadata(self) -> ToolMetadata {
        let (label, shortcut, category, cursor, requires_layer) = match self {
            Self::Move => ("Move", 'v', ToolCategory::Utility, "move", true),
            Self::Lasso => ("Lasso Select", 'l', ToolCategory::Selection, "crosshair", false),
            Self::Rectangle => ("Rectangle Select", 'm', ToolCategory::Selection, "crosshair", false),
            Self::Ellipse => ("Ellipse Select", 'o', ToolCategory::Selection, "crosshair", false),
            Self::Brush => ("Brush", 'b', ToolCategory::Drawing, "crosshair", false),
            Self::Eraser => ("Eraser", 'e', ToolCategory::Drawing, "crosshair", true),
            Self::Bucket => ("Paint Bucket", 'g', ToolCategory::Fill, "crosshair", true),
            Self::Gradient => ("Gradient", 'x', ToolCategory::Fill, "crosshair", false),
        };
        ToolMetadata { kind: self, label, shortcut, category, cursor, requires_layer }
    }

    /// Tool bound to a keyboard shortcut (case-insensitive).
    #[must_use]
    pub fn from_shortcut(key: char) -> Option<Self> {
        let key = key.to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.metadata().shortcut == key)
    }

    #[must_use]
    pub fn is_selection(self) -> bool {
        self.metadata().category == ToolCategory::Selection
    }

    #[must_use]
    pub fn is_drawing(self) -> bool {
        self.metadata().category == ToolCategory::Drawing
    }

    #[must_use]
    pub fn is_fill(self) -> bool {
        self.metadata().category == ToolCategory::Fill
    }
}

// =============================================================================
// INPUT
// =============================================================================

/// Modifier keys held during an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
}

/// A keyboard key by name (`"Escape"`, `"Enter"`, `"l"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key(pub String);

impl Key {
    #[must_use]
    pub fn is_escape(&self) -> bool {
        self.0 == "Escape"
    }
}

/// User-adjustable painting options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolOptions {
    /// Brush and eraser diameter in surface pixels.
    pub size: f64,
    /// 0 is fully feathered, 100 is a hard edge.
    pub hardness: f64,
    /// 0..=100, applied to the paint colour's alpha.
    pub opacity: f64,
    pub color: Rgba<u8>,
    /// Per-channel bucket tolerance.
    pub tolerance: u8,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_BRUSH_SIZE,
            hardness: 100.0,
            opacity: 100.0,
            color: Rgba([0, 0, 0, 255]),
            tolerance: DEFAULT_FILL_TOLERANCE,
        }
    }
}

impl ToolOptions {
    /// Paint colour with the opacity option folded into alpha.
    #[must_use]
    pub fn paint_color(&self) -> Rgba<u8> {
        let alpha = f64::from(self.color.0[3]) * (self.opacity.clamp(0.0, 100.0) / 100.0);
        Rgba([self.color.0[0], self.color.0[1], self.color.0[2], alpha.round() as u8])
    }

    /// Gaussian sigma for soft eraser edges: `size * (1 - hardness/100) / 4`.
    #[must_use]
    pub fn eraser_blur(&self) -> f32 {
        (self.size * (1.0 - self.hardness.clamp(0.0, 100.0) / 100.0) / 4.0) as f32
    }
}

/// What a tool may read while handling an event.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub layers: &'a LayerManager,
    pub surface: SurfaceSize,
    pub selected_layer: Option<&'a str>,
    pub options: &'a ToolOptions,
}

impl ToolContext<'_> {
    /// The selected layer, if it exists on the active side.
    #[must_use]
    pub fn target_layer(&self) -> Option<&str> {
        let id = self.selected_layer?;
        self.layers.layers().iter().any(|l| l.id == id).then_some(id)
    }
}

// =============================================================================
// ACTIONS
// =============================================================================

/// A change a tool wants applied to the editor.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// The working selection polygon changed.
    SelectionChanged { points: Vec<NormalizedPoint>, closed: bool },
    /// The working selection was discarded.
    SelectionCleared,
    /// Add a new local layer on the active side.
    CreateLayer { bytes: Vec<u8>, name: String, bounds: Bounds, layer_type: LayerType, history_action: &'static str },
    /// Composite a stroke into an existing layer.
    MergeStroke { layer_id: LayerId, bytes: Vec<u8>, bounds: Bounds, mode: CompositeMode, blur: f32 },
    /// Bucket fill sampled from a layer.
    FloodFill { layer_id: LayerId, seed: NormalizedPoint, color: Rgba<u8>, tolerance: u8 },
    /// Live bounds update while dragging.
    MoveLayer { layer_id: LayerId, bounds: Bounds },
    /// Drag finished with a changed position.
    CommitMove { layer_id: LayerId, from: Bounds, to: Bounds },
    /// Something the user should be told.
    Warn(String),
}

/// What a tool wants drawn over the canvas.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    None,
    Polygon { points: Vec<NormalizedPoint>, closed: bool },
    Line { start: NormalizedPoint, end: NormalizedPoint },
    Outline(Bounds),
}

// =============================================================================
// TOOL
// =============================================================================

/// The active tool and its gesture state.
#[derive(Debug, Clone)]
pub enum Tool {
    Move(MoveTool),
    Lasso(LassoTool),
    Rectangle(ShapeSelectTool),
    Ellipse(ShapeSelectTool),
    Brush(StrokeTool),
    Eraser(StrokeTool),
    Bucket(BucketTool),
    Gradient(GradientTool),
}

impl Tool {
    #[must_use]
    pub fn new(kind: ToolKind) -> Self {
        match kind {
            ToolKind::Move => Self::Move(MoveTool::default()),
            ToolKind::Lasso => Self::Lasso(LassoTool::default()),
            ToolKind::Rectangle => Self::Rectangle(ShapeSelectTool::new(ShapeKind::Rectangle)),
            ToolKind::Ellipse => Self::Ellipse(ShapeSelectTool::new(ShapeKind::Ellipse)),
            ToolKind::Brush => Self::Brush(StrokeTool::brush()),
            ToolKind::Eraser => Self::Eraser(StrokeTool::eraser()),
            ToolKind::Bucket => Self::Bucket(BucketTool::default()),
            ToolKind::Gradient => Self::Gradient(GradientTool::default()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::Move(_) => ToolKind::Move,
            Self::Lasso(_) => ToolKind::Lasso,
            Self::Rectangle(_) => ToolKind::Rectangle,
            Self::Ellipse(_) => ToolKind::Ellipse,
            Self::Brush(_) => ToolKind::Brush,
            Self::Eraser(_) => ToolKind::Eraser,
            Self::Bucket(_) => ToolKind::Bucket,
            Self::Gradient(_) => ToolKind::Gradient,
        }
    }

    #[must_use]
    pub fn cursor(&self) -> &'static str {
        self.kind().metadata().cursor
    }

    pub fn activate(&mut self, ctx: &ToolContext<'_>) {
        match self {
            Self::Move(t) => t.activate(ctx),
            Self::Brush(t) | Self::Eraser(t) => t.activate(ctx),
            Self::Lasso(_) | Self::Rectangle(_) | Self::Ellipse(_) | Self::Bucket(_) | Self::Gradient(_) => {}
        }
    }

    pub fn deactivate(&mut self) -> Vec<Action> {
        self.reset()
    }

    pub fn pointer_down(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint) -> Vec<Action> {
        let point = point.clamped();
        match self {
            Self::Move(t) => t.pointer_down(ctx, point),
            Self::Lasso(t) => t.pointer_down(point),
            Self::Rectangle(t) | Self::Ellipse(t) => t.pointer_down(point),
            Self::Brush(t) | Self::Eraser(t) => t.pointer_down(ctx, point),
            Self::Bucket(_) => Vec::new(),
            Self::Gradient(t) => t.pointer_down(point),
        }
    }

    pub fn pointer_move(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint, modifiers: Modifiers) -> Vec<Action> {
        let point = point.clamped();
        match self {
            Self::Move(t) => t.pointer_move(ctx, point),
            Self::Lasso(_) | Self::Bucket(_) => Vec::new(),
            Self::Rectangle(t) | Self::Ellipse(t) => t.pointer_move(ctx, point, modifiers),
            Self::Brush(t) | Self::Eraser(t) => t.pointer_move(ctx, point),
            Self::Gradient(t) => t.pointer_move(point),
        }
    }

    pub fn pointer_up(&mut self, ctx: &ToolContext<'_>, point: NormalizedPoint, modifiers: Modifiers) -> Vec<Action> {
        let point = point.clamped();
        match self {
            Self::Move(t) => t.pointer_up(ctx),
            Self::Lasso(t) => t.pointer_up(ctx, point),
            Self::Rectangle(t) | Self::Ellipse(t) => t.pointer_up(ctx, point, modifiers),
            Self::Brush(t) | Self::Eraser(t) => t.pointer_up(ctx, point),
            Self::Bucket(t) => t.pointer_up(ctx, point),
            Self::Gradient(t) => t.pointer_up(ctx, point),
        }
    }

    /// Escape resets the tool; other keys are ignored.
    pub fn key_down(&mut self, key: &Key) -> Vec<Action> {
        if key.is_escape() { self.reset() } else { Vec::new() }
    }

    /// Drop any gesture in progress.
    pub fn reset(&mut self) -> Vec<Action> {
        match self {
            Self::Move(t) => t.reset(),
            Self::Lasso(t) => return t.reset(),
            Self::Rectangle(t) | Self::Ellipse(t) => return t.reset(),
            Self::Brush(t) | Self::Eraser(t) => t.reset(),
            Self::Bucket(_) => {}
            Self::Gradient(t) => t.reset(),
        }
        Vec::new()
    }

    #[must_use]
    pub fn overlay(&self) -> Overlay {
        match self {
            Self::Move(t) => t.overlay(),
            Self::Lasso(t) => t.overlay(),
            Self::Rectangle(t) | Self::Ellipse(t) => t.overlay(),
            Self::Gradient(t) => t.overlay(),
            Self::Brush(_) | Self::Eraser(_) | Self::Bucket(_) => Overlay::None,
        }
    }

    /// Points of the working selection, for selection tools.
    #[must_use]
    pub fn selection_points(&self) -> Option<Vec<NormalizedPoint>> {
        match self {
            Self::Lasso(t) => Some(t.points().to_vec()),
            Self::Rectangle(t) | Self::Ellipse(t) => Some(t.points().to_vec()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_selection_closed(&self) -> bool {
        match self {
            Self::Lasso(t) => t.is_closed(),
            Self::Rectangle(t) | Self::Ellipse(t) => t.is_closed(),
            _ => false,
        }
    }
}
