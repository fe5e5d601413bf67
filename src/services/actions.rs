//! Action executor: applies tool [`Action`]s to the editor state.
//!
//! DESIGN
//! ======
//! Tools are synchronous and only describe what should change. This module
//! is where those descriptions meet the document: layer creation with an
//! undo entry and a local history entry, serialized stroke merges, bucket
//! fills sampled from a layer, live and committed moves, and user warnings.
//!
//! One failing action is logged and reported without stopping the ones
//! after it.

use std::sync::Arc;

use image::Rgba;
use tracing::{debug, info, warn};

use crate::error::{EditorError, LayerError};
use crate::geometry::{Bounds, NormalizedPoint};
use crate::layers::{LayerId, LayerType};
use crate::raster::{self, CompositeMode, Surface};
use crate::remote::{RemoteApi, StaticElementPositionRequest};
use crate::services::compose::{load_image_source, merge_drawing_to_layer};
use crate::state::EditorState;
use crate::tools::{Action, flood_fill};
use crate::undo::{UndoEntry, UndoManager};

#[cfg(test)]
#[path = "actions_test.rs"]
mod tests;

/// The working selection after a batch of actions.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    Cleared,
    Open(Vec<NormalizedPoint>),
    Closed(Vec<NormalizedPoint>),
}

/// What a batch of actions did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// Layers created, in order.
    pub created: Vec<LayerId>,
    /// Last selection change, if any action touched the selection.
    pub selection: Option<SelectionState>,
    /// Actions that failed.
    pub failed: usize,
}

/// Apply `actions` in order.
pub async fn apply_actions(state: &EditorState, actions: Vec<Action>) -> Applied {
    let mut applied = Applied::default();
    for action in actions {
        match action {
            Action::SelectionChanged { points, closed } => {
                applied.selection =
                    Some(if closed { SelectionState::Closed(points) } else { SelectionState::Open(points) });
            }
            Action::SelectionCleared => applied.selection = Some(SelectionState::Cleared),
            Action::Warn(message) => state.notifier.warning(message),
            Action::CreateLayer { bytes, name, bounds, layer_type, history_action } => {
                match create_layer(state, bytes, &name, bounds, layer_type, history_action).await {
                    Ok(id) => applied.created.push(id),
                    Err(err) => {
                        warn!(%name, error = %err, "actions: create layer failed");
                        applied.failed += 1;
                    }
                }
            }
            Action::MergeStroke { layer_id, bytes, bounds, mode, blur } => {
                if let Err(err) = merge_stroke(state, &layer_id, bytes, bounds, mode, blur).await {
                    warn!(%layer_id, error = %err, "actions: stroke merge failed");
                    state.notifier.error("Failed to apply stroke");
                    applied.failed += 1;
                }
            }
            Action::FloodFill { layer_id, seed, color, tolerance } => {
                match bucket_fill(state, &layer_id, seed, color, tolerance).await {
                    Ok(Some(id)) => applied.created.push(id),
                    Ok(None) => debug!(%layer_id, "actions: fill region empty"),
                    Err(err) => {
                        warn!(%layer_id, error = %err, "actions: fill failed");
                        state.notifier.error("Fill failed");
                        applied.failed += 1;
                    }
                }
            }
            Action::MoveLayer { layer_id, bounds } => {
                if !state.doc.write().await.layers.update_layer_bounds(&layer_id, bounds) {
                    applied.failed += 1;
                }
            }
            Action::CommitMove { layer_id, from, to } => {
                if let Err(err) = commit_move(state, &layer_id, from, to).await {
                    warn!(%layer_id, error = %err, "actions: move commit failed");
                    applied.failed += 1;
                }
            }
        }
    }
    applied
}

// =============================================================================
// LAYERS
// =============================================================================

async fn create_layer(
    state: &EditorState,
    bytes: Vec<u8>,
    name: &str,
    bounds: Bounds,
    layer_type: LayerType,
    history_action: &str,
) -> Result<LayerId, EditorError> {
    let (id, side) = {
        let mut guard = state.doc.write().await;
        let doc = &mut *guard;
        let id = doc.layers.create_drawing_layer(bytes, name, bounds, layer_type)?;
        if let Some(snapshot) = UndoManager::capture_snapshot(&doc.layers, &id) {
            doc.undo.push(UndoEntry::add(snapshot));
        }
        (id, doc.layers.active_side())
    };
    state.history.add_local_entry(history_action, &id, side);
    info!(layer_id = %id, %name, "actions: layer created");
    Ok(id)
}

async fn merge_stroke(
    state: &EditorState,
    layer_id: &str,
    bytes: Vec<u8>,
    bounds: Bounds,
    mode: CompositeMode,
    blur: f32,
) -> Result<(), EditorError> {
    merge_drawing_to_layer(state, layer_id, Arc::from(bytes), bounds, mode, blur).await?;
    let action = match mode {
        CompositeMode::SourceOver => "draw",
        CompositeMode::DestinationOut => "erase",
    };
    let side = state.doc.read().await.layers.active_side();
    state.history.add_local_entry(action, layer_id, side);
    Ok(())
}

/// Flood fill the layer's pixels as placed on the surface; the filled
/// pixels become a new full-surface layer.
async fn bucket_fill(
    state: &EditorState,
    layer_id: &str,
    seed: NormalizedPoint,
    color: Rgba<u8>,
    tolerance: u8,
) -> Result<Option<LayerId>, EditorError> {
    let (source, bounds) = {
        let doc = state.doc.read().await;
        let layer = doc.layers.layer(layer_id).ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
        (layer.source(), layer.bounds)
    };
    let surface = state.asset.surface;
    let pixels = load_image_source(state.remote.as_ref(), &source).await?;
    let mut sample = Surface::new(surface.width, surface.height);
    sample.draw_image(pixels.pixels(), bounds, CompositeMode::SourceOver, 0.0);

    let at = surface.to_pixels(seed);
    let seed_x = (at.x.floor().max(0.0) as u32).min(surface.width.saturating_sub(1));
    let seed_y = (at.y.floor().max(0.0) as u32).min(surface.height.saturating_sub(1));
    let region = flood_fill(sample.pixels(), seed_x, seed_y, tolerance);
    if region.is_empty() {
        return Ok(None);
    }
    debug!(%layer_id, filled = region.len(), "actions: flood fill");

    let bytes = raster::encode_png(region.paint(color)).await?;
    create_layer(state, bytes, "Fill Layer", surface.bounds(), LayerType::Filled, "fill").await.map(Some)
}

// =============================================================================
// MOVE
// =============================================================================

/// Record a finished drag for undo and history, and move any paired static
/// element along with it.
async fn commit_move(state: &EditorState, layer_id: &str, from: Bounds, to: Bounds) -> Result<(), EditorError> {
    let (side, paired) = {
        let mut guard = state.doc.write().await;
        let doc = &mut *guard;
        doc.layers.update_layer_bounds(layer_id, to);
        let after = doc.layers.snapshot(layer_id).ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
        let before = crate::layers::LayerSnapshot { bounds: from, ..after.clone() };
        doc.undo.push(UndoEntry::modify(before, after));
        (doc.layers.active_side(), doc.layers.paired_element_id(layer_id).map(String::from))
    };
    state.history.add_local_entry("move", layer_id, side);
    info!(%layer_id, ?from, ?to, "actions: layer moved");

    if let (Some(element_id), Some(template_id)) = (paired, state.asset.template_id.clone()) {
        let request = StaticElementPositionRequest { template_id, element_id, bounds: to };
        sync_position_fire_and_forget(Arc::clone(&state.remote), request);
    }
    Ok(())
}

/// Spawn a best-effort position sync for a paired static element.
fn sync_position_fire_and_forget(remote: Arc<dyn RemoteApi>, request: StaticElementPositionRequest) {
    tokio::spawn(async move {
        match remote.sync_static_element_position(&request).await {
            Ok(response) if response.success => {
                debug!(element_id = %request.element_id, "actions: element position synced");
            }
            Ok(response) => {
                warn!(element_id = %request.element_id, error = ?response.error, "actions: element sync rejected");
            }
            Err(err) => warn!(element_id = %request.element_id, error = %err, "actions: element sync failed"),
        }
    });
}
