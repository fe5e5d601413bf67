//! Shared numeric constants for the editor.

// ── Selection tools ─────────────────────────────────────────────

/// Lasso closes when a click lands within this fraction of the surface
/// diagonal from the first point.
pub const LASSO_CLOSE_FRACTION: f64 = 0.03;

/// Pointer travel (normalized units) below which a press/release pair counts
/// as a click rather than a drag.
pub const CLICK_THRESHOLD: f64 = 0.01;

/// Minimum points before a lasso may close.
pub const LASSO_MIN_POINTS: usize = 3;

/// Rectangle/ellipse selections smaller than this fraction of the surface in
/// either dimension are discarded.
pub const MIN_SHAPE_FRACTION: f64 = 0.01;

/// Polygon segments used to approximate an ellipse selection.
pub const ELLIPSE_SEGMENTS: usize = 36;

// ── Hit-testing ─────────────────────────────────────────────────

/// Pixels with alpha strictly above this value count as opaque.
pub const HIT_ALPHA_THRESHOLD: u8 = 10;

// ── Painting ────────────────────────────────────────────────────

/// Extra pixels kept around a committed brush stroke.
pub const STROKE_PADDING_PX: u32 = 2;

/// Default colour tolerance for the bucket tool (per channel, 0..=255).
pub const DEFAULT_FILL_TOLERANCE: u8 = 32;

/// Default brush diameter in surface pixels.
pub const DEFAULT_BRUSH_SIZE: f64 = 10.0;

// ── Layers ──────────────────────────────────────────────────────

/// Pixel of the 1x1 raster substituted for a dead ephemeral binary on load.
pub const PLACEHOLDER_RGBA: [u8; 4] = [0, 0, 0, 0];

/// Prefix of optimistic history item ids.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Random suffix length of optimistic history item ids.
pub const TEMP_ID_SUFFIX_LEN: usize = 9;
