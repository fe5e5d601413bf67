//! Compose service: raster work that reads layers, computes off the lock,
//! and commits back.
//!
//! DESIGN
//! ======
//! Every function here follows the same three steps. Under the document lock
//! it captures an owned [`ImageSource`] plus the layer revision. With no lock
//! held it decodes, composites and encodes, awaiting between steps. Then it
//! takes the lock again and commits only if the revision and bounds still
//! match.
//!
//! Stroke merges into one layer additionally hold that layer's merge queue
//! for the whole read-modify-write, so a second merge reads the raster the
//! first one committed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{EditorError, LayerError};
use crate::geometry::Bounds;
use crate::hit::HitTestEntry;
use crate::layers::{ImageSource, LayerId};
use crate::raster::{self, CompositeMode, Surface};
use crate::remote::RemoteApi;
use crate::state::EditorState;
use crate::undo::UndoEntry;

#[cfg(test)]
#[path = "compose_test.rs"]
mod tests;

/// Decode a layer's pixels from its local bytes or its remote URL.
pub async fn load_image_source(remote: &dyn RemoteApi, source: &ImageSource) -> Result<Surface, EditorError> {
    let bytes: Arc<[u8]> = match source {
        ImageSource::Binary(bytes) => Arc::clone(bytes),
        ImageSource::Remote(url) => Arc::from(remote.fetch_image(url).await?),
    };
    Ok(raster::decode(bytes).await?)
}

/// Recompose limit for a stroke whose layer moves or changes mid-merge.
const MERGE_ATTEMPTS: usize = 3;

/// Place `bounds` relative to the origin of `frame`.
fn relative_to(bounds: Bounds, frame: Bounds) -> Bounds {
    Bounds::new(bounds.x - frame.x, bounds.y - frame.y, bounds.width, bounds.height)
}

// =============================================================================
// STROKE MERGE
// =============================================================================

/// Composite an encoded stroke raster onto a layer's accumulated pixels.
///
/// `SourceOver` grows the layer to the union of its bounds and the stroke's;
/// `DestinationOut` erases within the current bounds. Calls for the same
/// layer apply in arrival order. The change is pushed as one undo entry.
/// A layer moved or replaced while the stroke was composited is re-read and
/// the stroke recomposed against its new position.
pub async fn merge_drawing_to_layer(
    state: &EditorState,
    layer_id: &str,
    stroke: Arc<[u8]>,
    stroke_bounds: Bounds,
    mode: CompositeMode,
    blur: f32,
) -> Result<(), EditorError> {
    let queue = state.merge_queue(layer_id);
    let _turn = queue.lock().await;
    let stroke = raster::decode(stroke).await?;

    for attempt in 1..=MERGE_ATTEMPTS {
        let (source, bounds, revision) = {
            let doc = state.doc.read().await;
            let layer = doc.layers.layer(layer_id).ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
            (layer.source(), layer.bounds, layer.revision())
        };

        let base = load_image_source(state.remote.as_ref(), &source).await?;
        let target = match mode {
            CompositeMode::SourceOver => bounds.union(&stroke_bounds),
            CompositeMode::DestinationOut => bounds,
        };
        let mut canvas = Surface::new(target.width, target.height);
        canvas.draw_image(base.pixels(), relative_to(bounds, target), CompositeMode::SourceOver, 0.0);
        canvas.draw_image(stroke.pixels(), relative_to(stroke_bounds, target), mode, blur);
        let bytes = raster::encode_png(canvas).await?;

        let mut guard = state.doc.write().await;
        let doc = &mut *guard;
        let current = doc.layers.layer(layer_id).ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
        if current.revision() != revision || current.bounds != bounds {
            debug!(%layer_id, attempt, "compose: layer changed during stroke merge, recomposing");
            continue;
        }
        let before = doc.layers.snapshot(layer_id);
        doc.layers.replace_layer_raster(layer_id, bytes, target)?;
        if let (Some(before), Some(after)) = (before, doc.layers.snapshot(layer_id)) {
            doc.undo.push(UndoEntry::modify(before, after));
        }
        debug!(%layer_id, ?mode, ?target, "compose: stroke merged");
        return Ok(());
    }

    warn!(%layer_id, attempts = MERGE_ATTEMPTS, "compose: layer kept changing during stroke merge");
    Err(LayerError::Invalid(format!("layer {layer_id} changed during merge")).into())
}

// =============================================================================
// LAYER MERGE
// =============================================================================

/// Flatten `ids` (at least two, on the active side) into one new layer at
/// the topmost source's position.
pub async fn merge_layers(state: &EditorState, ids: &[LayerId]) -> Result<LayerId, EditorError> {
    let plan = state.doc.read().await.layers.plan_merge(ids)?;

    let mut canvas = Surface::new(plan.bounds.width, plan.bounds.height);
    for source in &plan.sources {
        let surface = load_image_source(state.remote.as_ref(), &source.source).await?;
        canvas.draw_image(surface.pixels(), relative_to(source.bounds, plan.bounds), CompositeMode::SourceOver, 0.0);
    }
    let bytes = raster::encode_png(canvas).await?;

    let id = state.doc.write().await.layers.commit_merge(&plan, bytes)?;
    info!(layer_id = %id, sources = plan.sources.len(), "compose: layers merged");
    Ok(id)
}

// =============================================================================
// HIT-TEST CACHE
// =============================================================================

/// Build alpha maps for every stale layer. A layer whose image cannot be
/// loaded keeps bounding-box hit testing. Returns how many were stored.
pub async fn rebuild_stale_hit_tests(state: &EditorState) -> usize {
    let jobs = state.doc.write().await.layers.take_stale_hit_tests();
    let mut stored = 0;
    for job in jobs {
        match load_image_source(state.remote.as_ref(), &job.source).await {
            Ok(surface) => {
                let entry = HitTestEntry::from_surface(&surface);
                if state.doc.write().await.layers.store_hit_test(&job.layer_id, job.revision, entry) {
                    stored += 1;
                }
            }
            Err(err) => warn!(layer_id = %job.layer_id, error = %err, "compose: hit-test build failed"),
        }
    }
    stored
}

/// Spawn the background hit-test builder. Returns a handle for shutdown.
pub fn spawn_hit_test_task(state: EditorState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(state.config.hit_test_interval_ms.max(1)));
        loop {
            interval.tick().await;
            let pending = state.doc.read().await.layers.has_stale_hit_tests();
            if pending {
                rebuild_stale_hit_tests(&state).await;
            }
        }
    })
}
