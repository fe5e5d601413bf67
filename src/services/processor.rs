//! Image Processor: multi-step editing workflows.
//!
//! DESIGN
//! ======
//! Each workflow composes Layer Manager mutations with remote calls and
//! reports back the way the editor UI expects: failures become a user
//! notification and a `false` (or `None`) return, never an error that
//! escapes to the caller. The inner `try_*` functions carry the `?` chain;
//! the public wrappers own the notification.
//!
//! Remote jobs (decompose, upscale, remove-element) follow the History
//! Manager's optimistic flow: an item is recorded before submission, its
//! temporary id is swapped for the job id on success, and it is marked
//! failed if the submission is rejected. Local workflows (merge, cut, fill,
//! delete, crop) and the synchronous background workflows (remove-bg, set as
//! background) finish before they return.
//!
//! At most one workflow runs at a time (`EditorState::try_begin_processing`).
//! Crop is the exception: it has no remote processing step, so it is not
//! gated.

use std::sync::Arc;

use image::Rgba;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{EditorError, LayerError};
use crate::geometry::{Bounds, NormalizedPoint, Point};
use crate::layers::{ImageRef, ImageSource, LayerId, LayerType, Side, background_layer_id};
use crate::raster::{self, CompositeMode, Surface};
use crate::remote::{
    BackgroundRequest, DecomposeRequest, JobSubmission, PNG_MIME, RemoteError, RemoveBackgroundRequest,
    RemoveElementRequest, SaveHistoryRequest, UpscaleRequest, encode_payload, require_background_urls, require_url,
};
use crate::services::compose::{load_image_source, merge_layers};
use crate::services::upload::{ensure_layer_uploaded, upload_bytes};
use crate::state::{BusyGuard, EditorState};
use crate::undo::{UndoEntry, UndoManager};
use crate::watermark::{ScrubStrength, remove_watermark};

#[cfg(test)]
#[path = "processor_test.rs"]
mod tests;

const DECOMPOSE_PROVIDER: &str = "fal-ai-decompose";
const DECOMPOSE_MODEL: &str = "Qwen-Image-Layered";
const REMOVE_PROVIDER: &str = "fal-ai-remove";
const REMOVE_MODEL: &str = "qwen-image-edit";

/// Parameters of a decomposition request.
#[derive(Debug, Clone, PartialEq)]
pub struct DecomposeParams {
    pub image_url: String,
    pub num_layers: u32,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    /// Provider-specific settings, forwarded untouched.
    pub settings: serde_json::Value,
}

// =============================================================================
// SHARED
// =============================================================================

/// Take the processing slot, or warn the user and refuse with `Busy`.
fn claim(state: &EditorState) -> Result<BusyGuard, EditorError> {
    state.try_begin_processing().ok_or_else(|| {
        let err = EditorError::Busy;
        state.notifier.warning(err.to_string());
        err
    })
}

/// Turn a submission envelope into its job id.
fn job_id(submission: JobSubmission, fallback: &str) -> Result<String, RemoteError> {
    match (submission.success, submission.job_id) {
        (true, Some(id)) if !id.is_empty() => Ok(id),
        _ => Err(RemoteError::Rejected(submission.error.unwrap_or_else(|| fallback.to_string()))),
    }
}

/// Finish the optimistic flow for a submitted job.
fn settle_submission(
    state: &EditorState,
    temp_id: &str,
    result: Result<String, EditorError>,
    queued: &str,
) -> bool {
    match result {
        Ok(job_id) => {
            state.history.update_optimistic_id(temp_id, &job_id);
            state.notifier.success(queued);
            true
        }
        Err(err) => {
            state.history.mark_failed(temp_id, &err.to_string());
            state.notifier.error(err.to_string());
            false
        }
    }
}

/// Raw bytes of an image source, fetched if remote.
async fn source_bytes(state: &EditorState, source: &ImageSource) -> Result<Arc<[u8]>, EditorError> {
    match source {
        ImageSource::Binary(bytes) => Ok(Arc::clone(bytes)),
        ImageSource::Remote(url) => Ok(Arc::from(state.remote.fetch_image(url).await?)),
    }
}

/// Pixel points of a normalized polygon, shifted so `origin` is (0, 0).
fn local_polygon(state: &EditorState, points: &[NormalizedPoint], origin: Bounds) -> Vec<Point> {
    points
        .iter()
        .map(|p| {
            let px = state.asset.surface.to_pixels(*p);
            Point::new(px.x - f64::from(origin.x), px.y - f64::from(origin.y))
        })
        .collect()
}

/// Add a layer and record it for undo.
async fn add_undoable_layer(
    state: &EditorState,
    image: ImageRef,
    name: &str,
    bounds: Bounds,
    layer_type: LayerType,
) -> Result<LayerId, EditorError> {
    let mut guard = state.doc.write().await;
    let doc = &mut *guard;
    let side = doc.layers.active_side();
    let (layer, selection) = doc.layers.create_layer(image, name, bounds, side, layer_type);
    let id = layer.id.clone();
    doc.layers.add_layer(layer, selection)?;
    if let Some(snapshot) = UndoManager::capture_snapshot(&doc.layers, &id) {
        doc.undo.push(UndoEntry::add(snapshot));
    }
    Ok(id)
}

// =============================================================================
// REMOTE JOBS
// =============================================================================

/// Queue a decomposition of `params.image_url` into layers.
pub async fn decompose(state: &EditorState, params: DecomposeParams) -> bool {
    let Ok(_busy) = claim(state) else {
        return false;
    };
    let side = state.doc.read().await.layers.active_side();
    let temp_id = state.history.add_optimistic_item(DECOMPOSE_PROVIDER, DECOMPOSE_MODEL, &params.image_url, Some(side));

    let request = DecomposeRequest {
        image_url: params.image_url.clone(),
        num_layers: params.num_layers,
        prompt: params.prompt,
        negative_prompt: params.negative_prompt,
        side,
        template_id: state.asset.template_id.clone(),
        settings: params.settings,
    };
    let result = match state.remote.submit_decompose(&request).await {
        Ok(submission) => job_id(submission, "Failed to queue decomposition").map_err(EditorError::from),
        Err(err) => Err(err.into()),
    };
    let ok = settle_submission(state, &temp_id, result, "Decomposition queued! Processing in background...");
    if ok && params.image_url.contains("original") {
        state.doc.write().await.layers.set_show_original(false);
    }
    info!(%temp_id, ok, "processor: decompose submitted");
    ok
}

/// Queue an upscale of a layer, optionally scrubbing watermarks first.
pub async fn upscale_layer(state: &EditorState, layer_id: &str, model: &str, scrub_watermark: bool) -> bool {
    let Ok(_busy) = claim(state) else {
        return false;
    };
    let (source_url, side) = match layer_url(state, layer_id).await {
        Ok(found) => found,
        Err(err) => {
            warn!(%layer_id, error = %err, "processor: upscale input unavailable");
            state.notifier.error(err.to_string());
            return false;
        }
    };

    let target_url = if scrub_watermark {
        match scrubbed_url(state, layer_id).await {
            Ok(url) => url,
            Err(err) => {
                warn!(%layer_id, error = %err, "processor: watermark removal failed, using original");
                source_url.clone()
            }
        }
    } else {
        source_url.clone()
    };

    let provider = format!("fal-ai-upscale-{model}");
    let temp_id = state.history.add_optimistic_item(&provider, model, &source_url, Some(side));
    let request = UpscaleRequest {
        image_url: target_url,
        model: model.to_string(),
        side,
        template_id: state.asset.template_id.clone(),
    };
    let result = match state.remote.submit_upscale(&request).await {
        Ok(submission) => job_id(submission, "Failed to queue upscale").map_err(EditorError::from),
        Err(err) => Err(err.into()),
    };
    settle_submission(state, &temp_id, result, "Upscale queued! Processing in background...")
}

/// Queue removal of whatever `prompt` describes from a layer.
pub async fn remove_element(state: &EditorState, layer_id: &str, prompt: &str) -> bool {
    let Ok(_busy) = claim(state) else {
        return false;
    };
    let (url, side) = match layer_url(state, layer_id).await {
        Ok(found) => found,
        Err(err) => {
            state.notifier.error(err.to_string());
            return false;
        }
    };

    let temp_id = state.history.add_optimistic_item(REMOVE_PROVIDER, REMOVE_MODEL, &url, Some(side));
    let request = RemoveElementRequest {
        image_url: url,
        prompt: prompt.to_string(),
        width: state.asset.surface.width,
        height: state.asset.surface.height,
        side,
        template_id: state.asset.template_id.clone(),
    };
    let result = match state.remote.submit_remove_element(&request).await {
        Ok(submission) => job_id(submission, "Failed to queue removal").map_err(EditorError::from),
        Err(err) => Err(err.into()),
    };
    settle_submission(state, &temp_id, result, &format!("Removal of \"{prompt}\" queued! Processing in background..."))
}

/// Durable URL and side of a layer, uploading it first if it is local.
async fn layer_url(state: &EditorState, layer_id: &str) -> Result<(String, Side), EditorError> {
    let side = state
        .doc
        .read()
        .await
        .layers
        .layer(layer_id)
        .map(|l| l.side)
        .ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
    let url = ensure_layer_uploaded(state, layer_id).await?;
    Ok((url, side))
}

/// Upload a watermark-scrubbed copy of a layer and return its URL.
async fn scrubbed_url(state: &EditorState, layer_id: &str) -> Result<String, EditorError> {
    let source = state
        .doc
        .read()
        .await
        .layers
        .layer(layer_id)
        .map(|l| l.source())
        .ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
    let bytes = source_bytes(state, &source).await?;
    let scrubbed = remove_watermark(bytes, ScrubStrength::High).await?;
    Ok(upload_bytes(state.remote.as_ref(), &scrubbed).await?)
}

// =============================================================================
// LOCAL WORKFLOWS
// =============================================================================

/// Flatten the merge selection into one layer and leave merge mode.
pub async fn merge_selected_layers(state: &EditorState) -> bool {
    let ids = state.doc.read().await.layers.merge_selection().to_vec();
    if ids.len() < 2 {
        state.notifier.warning("Select at least two layers to merge");
        return false;
    }
    let Ok(_busy) = claim(state) else {
        return false;
    };

    match merge_layers(state, &ids).await {
        Ok(id) => {
            state.doc.write().await.layers.set_merge_mode(false);
            if let Err(err) = ensure_layer_uploaded(state, &id).await {
                // The entry stays in the upload cache for the next drain.
                warn!(layer_id = %id, error = %err, "processor: merged layer upload deferred");
            }
            state.notifier.success("Layers merged");
            true
        }
        Err(err) => {
            warn!(error = %err, "processor: merge failed");
            state.notifier.error("Merge failed");
            false
        }
    }
}

/// Copy the part of a layer inside a polygon into a new "(Copy)" layer.
pub async fn cut_polygon(state: &EditorState, layer_id: &str, points: &[NormalizedPoint]) -> Option<LayerId> {
    if points.len() < 3 {
        debug!(%layer_id, points = points.len(), "processor: cut needs a polygon");
        return None;
    }
    let Ok(_busy) = claim(state) else {
        return None;
    };
    match try_cut_polygon(state, layer_id, points).await {
        Ok(id) => {
            state.notifier.success("Copied selection to new layer");
            Some(id)
        }
        Err(err) => {
            warn!(%layer_id, error = %err, "processor: cut failed");
            state.notifier.error(format!("Cut failed: {err}"));
            None
        }
    }
}

async fn try_cut_polygon(state: &EditorState, layer_id: &str, points: &[NormalizedPoint]) -> Result<LayerId, EditorError> {
    let (source, bounds, name, side) = {
        let doc = state.doc.read().await;
        let layer = doc.layers.layer(layer_id).ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
        (layer.source(), layer.bounds, layer.name.clone(), layer.side)
    };
    let cut = Bounds::from_normalized_points(points, state.asset.surface)
        .filter(Bounds::is_positive_area)
        .ok_or_else(|| LayerError::Invalid("invalid selection dimensions".into()))?;

    let pixels = load_image_source(state.remote.as_ref(), &source).await?;
    let mut canvas = Surface::new(cut.width, cut.height);
    canvas.draw_image(
        pixels.pixels(),
        Bounds::new(bounds.x - cut.x, bounds.y - cut.y, bounds.width, bounds.height),
        CompositeMode::SourceOver,
        0.0,
    );
    canvas.retain_polygon(&local_polygon(state, points, cut));
    let bytes = raster::encode_png(canvas).await?;

    let original_url = ensure_layer_uploaded(state, layer_id).await?;
    let result_url = upload_bytes(state.remote.as_ref(), &bytes).await?;
    let id =
        add_undoable_layer(state, ImageRef::Remote(result_url.clone()), &format!("{name} (Copy)"), cut, LayerType::Copied)
            .await?;

    save_history(state, original_url, result_url, "lasso-copy", side).await;
    info!(source = %layer_id, layer_id = %id, ?cut, "processor: polygon copied");
    Ok(id)
}

/// Fill a polygon with `color` into a new full-surface layer.
pub async fn fill_selection(state: &EditorState, points: &[NormalizedPoint], color: Rgba<u8>) -> Option<LayerId> {
    if points.len() < 3 {
        return None;
    }
    let Ok(_busy) = claim(state) else {
        return None;
    };
    match try_fill_selection(state, points, color).await {
        Ok(id) => {
            let side = state.doc.read().await.layers.active_side();
            state.history.add_local_entry("fill", &id, side);
            state.notifier.success("Filled selection created");
            Some(id)
        }
        Err(err) => {
            warn!(error = %err, "processor: fill failed");
            state.notifier.error(format!("Fill failed: {err}"));
            None
        }
    }
}

async fn try_fill_selection(state: &EditorState, points: &[NormalizedPoint], color: Rgba<u8>) -> Result<LayerId, EditorError> {
    let surface = state.asset.surface;
    let mut canvas = Surface::new(surface.width, surface.height);
    canvas.fill_polygon(&local_polygon(state, points, surface.bounds()), color);
    let bytes = raster::encode_png(canvas).await?;
    let blob = state.blobs.insert(bytes);
    add_undoable_layer(state, ImageRef::Local(blob), "Fill Layer", surface.bounds(), LayerType::Filled).await
}

/// Erase a polygon from a layer non-destructively, through its mask.
pub async fn delete_selection(state: &EditorState, layer_id: &str, points: &[NormalizedPoint]) -> bool {
    if points.len() < 3 {
        return false;
    }
    let Ok(_busy) = claim(state) else {
        return false;
    };
    match try_delete_selection(state, layer_id, points).await {
        Ok(()) => {
            let side = state.doc.read().await.layers.active_side();
            state.history.add_local_entry("erase", layer_id, side);
            state.notifier.success("Area erased");
            true
        }
        Err(err) => {
            warn!(%layer_id, error = %err, "processor: delete failed");
            state.notifier.error(format!("Delete failed: {err}"));
            false
        }
    }
}

async fn try_delete_selection(state: &EditorState, layer_id: &str, points: &[NormalizedPoint]) -> Result<(), EditorError> {
    let (bounds, existing) = {
        let doc = state.doc.read().await;
        let layer = doc.layers.layer(layer_id).ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
        (layer.bounds, doc.layers.mask(layer_id).map(|m| Arc::clone(&m.payload)))
    };
    if !bounds.is_positive_area() {
        return Err(LayerError::Invalid(format!("layer {layer_id} has no area")).into());
    }

    // The mask lives in layer-local pixels, stretched over the layer bounds.
    let mut mask = Surface::solid(bounds.width, bounds.height, [255, 255, 255, 255]);
    if let Some(payload) = existing {
        let previous = raster::decode(payload).await?;
        mask.clear();
        mask.draw_image(previous.pixels(), Bounds::new(0, 0, bounds.width, bounds.height), CompositeMode::SourceOver, 0.0);
    }
    mask.fill_polygon(&local_polygon(state, points, bounds), Rgba([0, 0, 0, 0]));
    let bytes = raster::encode_png(mask).await?;

    state.doc.write().await.layers.set_mask(layer_id, Arc::from(bytes), bounds)?;
    debug!(%layer_id, "processor: selection erased into mask");
    Ok(())
}

/// Crop a layer to `region` (surface pixels) and append the result as a new
/// layer at that position. Recorded directly in history.
pub async fn crop_layer(state: &EditorState, layer_id: &str, region: Bounds) -> Option<LayerId> {
    match try_crop_layer(state, layer_id, region).await {
        Ok(id) => {
            state.notifier.success("Crop applied");
            Some(id)
        }
        Err(err) => {
            warn!(%layer_id, error = %err, "processor: crop failed");
            state.notifier.error(format!("Failed to apply crop: {err}"));
            None
        }
    }
}

async fn try_crop_layer(state: &EditorState, layer_id: &str, region: Bounds) -> Result<LayerId, EditorError> {
    let (source, bounds, name, side) = {
        let doc = state.doc.read().await;
        let layer = doc.layers.layer(layer_id).ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
        (layer.source(), layer.bounds, layer.name.clone(), layer.side)
    };
    let region = state
        .asset
        .surface
        .bounds()
        .intersect(&region)
        .filter(Bounds::is_positive_area)
        .ok_or_else(|| LayerError::Invalid("crop region is empty".into()))?;

    let pixels = load_image_source(state.remote.as_ref(), &source).await?;
    let mut canvas = Surface::new(region.width, region.height);
    canvas.draw_image(
        pixels.pixels(),
        Bounds::new(bounds.x - region.x, bounds.y - region.y, bounds.width, bounds.height),
        CompositeMode::SourceOver,
        0.0,
    );
    let bytes = raster::encode_png(canvas).await?;

    let original_url = ensure_layer_uploaded(state, layer_id).await?;
    let result_url = upload_bytes(state.remote.as_ref(), &bytes).await?;
    save_history(state, original_url, result_url.clone(), "crop", side).await;

    let layer_name = if layer_id == background_layer_id(side) { "Cropped Original".to_string() } else { format!("Cropped {name}") };
    let id = add_undoable_layer(state, ImageRef::Remote(result_url), &layer_name, region, LayerType::Copied).await?;
    info!(source = %layer_id, layer_id = %id, ?region, "processor: cropped");
    Ok(id)
}

/// Record a finished local operation in the remote history and refresh it.
/// Failures only cost the history entry.
async fn save_history(state: &EditorState, original_url: String, result_url: String, action: &str, side: Side) {
    let request = SaveHistoryRequest {
        original_url,
        result_url,
        action: action.to_string(),
        side,
        template_id: state.asset.template_id.clone(),
    };
    if let Err(err) = state.remote.save_history_item(&request).await {
        warn!(%action, error = %err, "processor: history save failed");
        return;
    }
    if let Err(err) = state.history.load().await {
        warn!(%action, error = %err, "processor: history refresh failed");
    }
}

// =============================================================================
// BACKGROUND
// =============================================================================

/// Replace a layer's image with a cut-out of its foreground.
pub async fn remove_background(state: &EditorState, layer_id: &str) -> bool {
    let Ok(_busy) = claim(state) else {
        return false;
    };
    match try_remove_background(state, layer_id).await {
        Ok(_) => {
            state.notifier.success("Background removed");
            true
        }
        Err(err) => {
            warn!(%layer_id, error = %err, "processor: background removal failed");
            state.notifier.error(format!("BG removal failed: {err}"));
            false
        }
    }
}

async fn try_remove_background(state: &EditorState, layer_id: &str) -> Result<String, EditorError> {
    let (source, side) = {
        let doc = state.doc.read().await;
        let layer = doc.layers.layer(layer_id).ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
        (layer.source(), layer.side)
    };
    let bytes = source_bytes(state, &source).await?;
    let request = RemoveBackgroundRequest { image_base64: encode_payload(&bytes) };
    let cutout_url = require_url(state.remote.remove_background(&request).await?)?;
    let cutout = state.remote.fetch_image(&cutout_url).await?;

    let original_url = ensure_layer_uploaded(state, layer_id).await?;
    let result_url = upload_bytes(state.remote.as_ref(), &cutout).await?;
    {
        let mut guard = state.doc.write().await;
        let doc = &mut *guard;
        let before = doc.layers.snapshot(layer_id);
        if !doc.layers.update_layer_image(layer_id, ImageRef::Remote(result_url.clone())) {
            return Err(LayerError::NotFound(layer_id.to_string()).into());
        }
        if let (Some(before), Some(after)) = (before, doc.layers.snapshot(layer_id)) {
            doc.undo.push(UndoEntry::modify(before, after));
        }
    }
    info!(%layer_id, url = %result_url, "processor: background removed");
    save_history(state, original_url, result_url.clone(), "remove-bg", side).await;
    Ok(result_url)
}

/// Persist a layer's image as the active side's background, together with
/// its thumbnail and preview variants. Returns the full-size URL.
pub async fn set_layer_as_background(state: &EditorState, layer_id: &str) -> Option<String> {
    let Ok(_busy) = claim(state) else {
        return None;
    };
    match try_set_background(state, layer_id).await {
        Ok(url) => {
            state.notifier.success("Background updated");
            Some(url)
        }
        Err(err) => {
            warn!(%layer_id, error = %err, "processor: set background failed");
            state.notifier.error(format!("Failed to set background: {err}"));
            None
        }
    }
}

/// MIME type of an encoded image; anything not JPEG is sent as PNG.
fn content_type_of(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        _ => PNG_MIME,
    }
}

async fn try_set_background(state: &EditorState, layer_id: &str) -> Result<String, EditorError> {
    let (source, side) = {
        let doc = state.doc.read().await;
        let layer = doc.layers.layer(layer_id).ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
        (layer.source(), layer.side)
    };
    let bytes = source_bytes(state, &source).await?;
    let variants = raster::encode_scaled_variants(raster::decode(Arc::clone(&bytes)).await?).await?;
    let request = BackgroundRequest {
        asset_id: state.asset.id.clone(),
        side,
        full_base64: encode_payload(&bytes),
        thumb_base64: encode_payload(&variants.thumb),
        preview_base64: encode_payload(&variants.preview),
        content_type: content_type_of(&bytes).to_string(),
    };
    let urls = require_background_urls(state.remote.update_background(&request).await?)?;
    info!(%layer_id, %side, url = %urls.full_url, thumb = %urls.thumb_url, "processor: background updated");
    Ok(urls.full_url)
}

// =============================================================================
// COMPLETIONS
// =============================================================================

/// Append each completed job's result layers to the editor. Results for
/// the side not being edited stay in history for an explicit restore.
pub fn spawn_completion_listener(state: EditorState) -> JoinHandle<()> {
    let mut completions = state.history.subscribe_completions();
    tokio::spawn(async move {
        while let Some(item) = completions.recv().await {
            if item.layers.is_empty() {
                continue;
            }
            let mut doc = state.doc.write().await;
            let active = doc.layers.active_side();
            if item.side.is_some_and(|side| side != active) {
                info!(item_id = %item.id, "processor: completed job belongs to the other side");
                continue;
            }
            let added = doc.layers.add_from_history(&item.layers);
            info!(item_id = %item.id, layers = added.len(), "processor: job results added");
        }
    })
}
