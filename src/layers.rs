//! Layer Manager: the owned aggregate every edit goes through.
//!
//! DESIGN
//! ======
//! Each card side keeps its layers in a `Vec` ordered bottom to top, and a
//! layer's `z_index` is always its position in that `Vec`; every structural
//! change ends with `reindex` so z-indices stay a dense `0..count`.
//!
//! Everything attached to a layer (selection metadata, mask, opacity,
//! hit-test alpha map, upload cache entry) lives in a separate table keyed by
//! layer id. Nothing holds a pointer back to the layer, so removing a layer
//! is a matter of dropping its row from each table.
//!
//! Callers only ever get `&Layer`; all mutation goes through the methods
//! here. Local images are owned through [`BlobHandle`], so reassigning or
//! removing a layer's image releases the previous blob exactly once.
//!
//! Async work (hit-test builds, merges, uploads) reads an owned
//! [`ImageSource`] plus the layer's `revision`, does its work without holding
//! the manager, and commits only if the revision still matches.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob::{BlobHandle, BlobId, BlobStore};
use crate::consts::PLACEHOLDER_RGBA;
use crate::error::LayerError;
use crate::geometry::{Bounds, NormalizedPoint, SurfaceSize};
use crate::hit::{HitTestEntry, layer_hit};
use crate::notify::Notifier;
use crate::raster::{RasterError, Surface};
use crate::remote::HistoryLayer;
use crate::session::{LayerRecord, MaskRecord, SessionRecord};

#[cfg(test)]
#[path = "layers_test.rs"]
mod tests;

/// Layer ids are UUID strings, except the fixed background ids.
pub type LayerId = String;

/// Size used for history layers that arrive without bounds.
const DEFAULT_HISTORY_LAYER_SIZE: u32 = 100;

// =============================================================================
// ENUMS
// =============================================================================

/// Face of the card being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Front,
    Back,
}

impl Side {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Back => "back",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front" => Ok(Self::Front),
            "back" => Ok(Self::Back),
            other => Err(LayerError::Invalid(format!("unknown side '{other}'"))),
        }
    }
}

/// How a layer came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    /// Produced by remote decomposition (or the background image).
    #[default]
    Decomposed,
    /// Painted with the brush, or the result of a merge.
    Drawing,
    /// Cut or copied out of another layer.
    Copied,
    /// Bucket, gradient or selection fill.
    Filled,
}

/// What the layer becomes when the card template is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    #[default]
    Image,
    Text,
    Photo,
    Qr,
    Signature,
    Graphic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward the viewer (higher z).
    Up,
    /// Toward the background (lower z).
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveState {
    #[default]
    Saved,
    Saving,
    Unsaved,
}

// =============================================================================
// IMAGES
// =============================================================================

/// Where a layer's pixels live.
#[derive(Debug)]
pub enum ImageRef {
    /// Durable remote URL.
    Remote(String),
    /// Ephemeral local binary, owned by this layer.
    Local(BlobHandle),
}

impl ImageRef {
    /// String form: the URL, or `blob:<id>` for local binaries.
    #[must_use]
    pub fn reference(&self) -> String {
        match self {
            Self::Remote(url) => url.clone(),
            Self::Local(handle) => handle.id().to_string(),
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    #[must_use]
    pub fn local_bytes(&self) -> Option<&Arc<[u8]>> {
        match self {
            Self::Local(handle) => Some(handle.bytes()),
            Self::Remote(_) => None,
        }
    }
}

/// Owned description of how to obtain a layer's bytes, safe to carry across
/// await points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Remote(String),
    Binary(Arc<[u8]>),
}

// =============================================================================
// LAYER / SELECTION / MASK
// =============================================================================

/// A positioned, z-ordered raster unit of one card side.
#[derive(Debug)]
pub struct Layer {
    /// Unique identifier (UUID string, or a fixed background id).
    pub id: LayerId,
    /// Display name, unique per side for duplicates.
    pub name: String,
    /// Remote URL or owned local binary.
    pub image: ImageRef,
    /// Position in the side's stack; 0 is the bottom.
    pub z_index: usize,
    /// Card side this layer belongs to.
    pub side: Side,
    /// Placement on the rendering surface, in pixels.
    pub bounds: Bounds,
    /// Origin of the layer.
    pub layer_type: LayerType,
    /// Linked static template element, if any.
    pub paired_element_id: Option<String>,
    /// Bytes kept after a local image was uploaded, to avoid refetching.
    pub cached_binary: Option<Arc<[u8]>>,
    revision: u64,
}

impl Layer {
    #[must_use]
    pub fn new(
        id: impl Into<LayerId>,
        name: impl Into<String>,
        image: ImageRef,
        side: Side,
        bounds: Bounds,
        layer_type: LayerType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image,
            z_index: 0,
            side,
            bounds,
            layer_type,
            paired_element_id: None,
            cached_binary: None,
            revision: 0,
        }
    }

    #[must_use]
    pub fn with_paired_element(mut self, element_id: impl Into<String>) -> Self {
        self.paired_element_id = Some(element_id.into());
        self
    }

    /// Bumped on every image change; async work compares it before commit.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn source(&self) -> ImageSource {
        match (&self.image, &self.cached_binary) {
            (ImageRef::Local(handle), _) => ImageSource::Binary(Arc::clone(handle.bytes())),
            (ImageRef::Remote(_), Some(bytes)) => ImageSource::Binary(Arc::clone(bytes)),
            (ImageRef::Remote(url), None) => ImageSource::Remote(url.clone()),
        }
    }
}

/// Editing metadata for a layer, not needed for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub layer_id: LayerId,
    pub included: bool,
    pub element_type: ElementType,
    /// Template variable name, `layer_<sanitized name>` by default.
    pub variable_name: String,
    pub bounds: Bounds,
    pub side: Side,
    pub paired_element_id: Option<String>,
    pub layer_image_ref: String,
}

impl Selection {
    /// Default selection metadata for a layer.
    #[must_use]
    pub fn for_layer(layer: &Layer) -> Self {
        Self {
            layer_id: layer.id.clone(),
            included: true,
            element_type: ElementType::Image,
            variable_name: variable_name_for(&layer.name),
            bounds: layer.bounds,
            side: layer.side,
            paired_element_id: layer.paired_element_id.clone(),
            layer_image_ref: layer.image.reference(),
        }
    }
}

/// Sparse selection update. Only present fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionUpdate {
    pub included: Option<bool>,
    pub element_type: Option<ElementType>,
    pub variable_name: Option<String>,
    pub paired_element_id: Option<String>,
}

/// Non-destructive erase data for a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub layer_id: LayerId,
    pub payload: Arc<[u8]>,
    pub bounds: Bounds,
}

/// Derive a template variable name: non `[A-Za-z0-9_]` become `_`, lowercased.
#[must_use]
pub fn variable_name_for(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("layer_{safe}")
}

/// Fixed id of a side's background layer.
#[must_use]
pub fn background_layer_id(side: Side) -> LayerId {
    format!("background-{side}")
}

// =============================================================================
// CACHES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

/// A local layer binary waiting for a durable URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub layer_id: LayerId,
    pub binary: Arc<[u8]>,
    pub side: Side,
    pub created_at: OffsetDateTime,
    pub upload_status: UploadStatus,
    pub retry_count: u32,
    pub error: Option<String>,
}

/// Result of applying an upload response to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Entry removed; the layer now points at the URL.
    Uploaded(String),
    /// Entry marked failed with its new retry count.
    Failed { retry_count: u32 },
    /// The layer or its binary changed while the upload was in flight.
    Superseded,
}

/// A stale hit-test entry to rebuild off the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitTestJob {
    pub layer_id: LayerId,
    pub source: ImageSource,
    pub revision: u64,
}

/// Inputs for compositing several layers into one, captured up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub side: Side,
    /// Sources bottom to top.
    pub sources: Vec<MergeSource>,
    /// Union of all source bounds.
    pub bounds: Bounds,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSource {
    pub layer_id: LayerId,
    pub source: ImageSource,
    pub bounds: Bounds,
    pub revision: u64,
}

/// Independent copy of a layer's state, as held by undo entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSnapshot {
    pub id: LayerId,
    /// URL, or `blob:<id>` when the image was local.
    pub image_ref: String,
    /// The layer's bytes when they were held locally.
    pub binary: Option<Arc<[u8]>>,
    pub bounds: Bounds,
    pub side: Side,
    pub name: String,
    pub layer_type: LayerType,
    pub z_index: usize,
    pub paired_element_id: Option<String>,
    pub selection: Option<Selection>,
    pub mask: Option<Mask>,
}

// =============================================================================
// LAYER MANAGER
// =============================================================================

pub struct LayerManager {
    active_side: Side,
    front: Vec<Layer>,
    back: Vec<Layer>,
    selections: HashMap<LayerId, Selection>,
    masks: HashMap<LayerId, Mask>,
    opacity: HashMap<LayerId, f32>,
    hit_cache: HashMap<LayerId, HitTestEntry>,
    stale_hit_tests: HashSet<LayerId>,
    upload_cache: Vec<CacheEntry>,
    merge_mode: bool,
    merge_selection: Vec<LayerId>,
    show_original: bool,
    save_state: SaveState,
    next_revision: u64,
    /// Woken by every structural mutation.
    changed: Arc<Notify>,
    blobs: BlobStore,
    notifier: Notifier,
}

impl LayerManager {
    #[must_use]
    pub fn new(blobs: BlobStore, notifier: Notifier) -> Self {
        Self {
            active_side: Side::Front,
            front: Vec::new(),
            back: Vec::new(),
            selections: HashMap::new(),
            masks: HashMap::new(),
            opacity: HashMap::new(),
            hit_cache: HashMap::new(),
            stale_hit_tests: HashSet::new(),
            upload_cache: Vec::new(),
            merge_mode: false,
            merge_selection: Vec::new(),
            show_original: false,
            save_state: SaveState::Saved,
            next_revision: 0,
            changed: Arc::new(Notify::new()),
            blobs,
            notifier,
        }
    }

    #[must_use]
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    // ── Side and queries ────────────────────────────────────────

    #[must_use]
    pub fn active_side(&self) -> Side {
        self.active_side
    }

    pub fn set_side(&mut self, side: Side) {
        if self.active_side != side {
            info!(from = %self.active_side, to = %side, "layers: switched side");
            self.active_side = side;
        }
    }

    /// Active side's layers, bottom to top.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        self.side_ref(self.active_side)
    }

    #[must_use]
    pub fn layers_on(&self, side: Side) -> &[Layer] {
        self.side_ref(side)
    }

    /// Look a layer up on either side.
    #[must_use]
    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.find(id).map(|(side, idx)| &self.side_ref(side)[idx])
    }

    #[must_use]
    pub fn selection(&self, id: &str) -> Option<&Selection> {
        self.selections.get(id)
    }

    #[must_use]
    pub fn paired_element_id(&self, id: &str) -> Option<&str> {
        self.layer(id).and_then(|l| l.paired_element_id.as_deref())
    }

    #[must_use]
    pub fn save_state(&self) -> SaveState {
        self.save_state
    }

    pub fn mark_saving(&mut self) {
        self.save_state = SaveState::Saving;
    }

    /// Record a completed save, unless something changed while saving.
    pub fn mark_saved(&mut self) {
        if self.save_state == SaveState::Saving {
            self.save_state = SaveState::Saved;
        }
    }

    /// A save attempt failed; the document still needs saving.
    pub fn mark_save_failed(&mut self) {
        self.save_state = SaveState::Unsaved;
    }

    fn mark_unsaved(&mut self) {
        self.save_state = SaveState::Unsaved;
        self.changed.notify_one();
    }

    /// Signal woken whenever the document becomes unsaved. Wakeups
    /// coalesce: a burst of edits leaves one pending notification.
    #[must_use]
    pub fn change_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.changed)
    }

    #[must_use]
    pub fn show_original(&self) -> bool {
        self.show_original
    }

    pub fn set_show_original(&mut self, show: bool) {
        self.show_original = show;
        self.mark_unsaved();
    }

    // ── Add / remove ────────────────────────────────────────────

    /// Build a layer with a fresh id and its default selection metadata.
    #[must_use]
    pub fn create_layer(
        &self,
        image: ImageRef,
        name: &str,
        bounds: Bounds,
        side: Side,
        layer_type: LayerType,
    ) -> (Layer, Selection) {
        let layer = Layer::new(Uuid::new_v4().to_string(), name, image, side, bounds, layer_type);
        let selection = Selection::for_layer(&layer);
        (layer, selection)
    }

    /// Store `bytes` as a local blob and add it as a new top layer on the
    /// active side.
    pub fn create_drawing_layer(
        &mut self,
        bytes: Vec<u8>,
        name: &str,
        bounds: Bounds,
        layer_type: LayerType,
    ) -> Result<LayerId, LayerError> {
        let image = ImageRef::Local(self.blobs.insert(bytes));
        let (layer, selection) = self.create_layer(image, name, bounds, self.active_side, layer_type);
        let id = layer.id.clone();
        self.add_layer(layer, selection)?;
        Ok(id)
    }

    /// Append a layer on top of its side. Malformed input is rejected with a
    /// notification and leaves the manager untouched.
    pub fn add_layer(&mut self, mut layer: Layer, mut selection: Selection) -> Result<(), LayerError> {
        if let Err(err) = self.validate_new_layer(&layer) {
            warn!(layer_id = %layer.id, error = %err, "layers: rejected layer");
            self.notifier.error(format!("Cannot add layer: {err}"));
            return Err(err);
        }

        layer.revision = self.bump_revision();
        let id = layer.id.clone();
        let side = layer.side;

        selection.layer_id.clone_from(&id);
        selection.side = side;
        selection.bounds = layer.bounds;
        selection.layer_image_ref = layer.image.reference();
        if selection.paired_element_id.is_none() {
            selection.paired_element_id.clone_from(&layer.paired_element_id);
        }

        if let Some(bytes) = layer.image.local_bytes() {
            let bytes = Arc::clone(bytes);
            self.add_to_cache(&id, bytes, side);
        }

        self.side_mut(side).push(layer);
        self.reindex(side);
        self.selections.insert(id.clone(), selection);
        self.stale_hit_tests.insert(id.clone());
        self.mark_unsaved();
        info!(layer_id = %id, %side, "layers: added");
        Ok(())
    }

    fn validate_new_layer(&self, layer: &Layer) -> Result<(), LayerError> {
        if layer.id.trim().is_empty() {
            return Err(LayerError::Invalid("missing id".into()));
        }
        if layer.name.trim().is_empty() {
            return Err(LayerError::Invalid(format!("layer {} has no name", layer.id)));
        }
        if let ImageRef::Remote(url) = &layer.image {
            if url.trim().is_empty() {
                return Err(LayerError::Invalid(format!("layer {} has no image", layer.id)));
            }
        }
        if self.find(&layer.id).is_some() {
            return Err(LayerError::DuplicateId(layer.id.clone()));
        }
        Ok(())
    }

    /// Remove a layer and everything keyed by it. Returns false when absent.
    pub fn remove_layer(&mut self, id: &str) -> bool {
        let Some((side, idx)) = self.find(id) else {
            return false;
        };
        let layer = self.side_mut(side).remove(idx);
        self.forget(&layer.id);
        self.reindex(side);
        self.mark_unsaved();
        info!(layer_id = %layer.id, %side, "layers: removed");
        // Dropping the layer releases its local blob, if any.
        drop(layer);
        true
    }

    /// Remove every layer of the active side.
    pub fn clear_current_side(&mut self) {
        let side = self.active_side;
        let removed: Vec<Layer> = std::mem::take(self.side_mut(side));
        for layer in &removed {
            self.forget(&layer.id);
        }
        self.mark_unsaved();
        info!(%side, count = removed.len(), "layers: cleared side");
    }

    fn forget(&mut self, id: &str) {
        self.selections.remove(id);
        self.masks.remove(id);
        self.opacity.remove(id);
        self.hit_cache.remove(id);
        self.stale_hit_tests.remove(id);
        self.upload_cache.retain(|e| e.layer_id != id);
        self.merge_selection.retain(|m| m != id);
    }

    // ── Ordering ────────────────────────────────────────────────

    /// Swap a layer of the active side with its neighbour.
    pub fn move_layer(&mut self, id: &str, direction: Direction) -> bool {
        let side = self.active_side;
        let Some(idx) = self.index_on(side, id) else {
            return false;
        };
        let len = self.side_ref(side).len();
        let target = match direction {
            Direction::Up if idx + 1 < len => idx + 1,
            Direction::Down if idx > 0 => idx - 1,
            Direction::Up | Direction::Down => return false,
        };
        self.side_mut(side).swap(idx, target);
        self.reindex(side);
        self.mark_unsaved();
        debug!(layer_id = %id, from = idx, to = target, "layers: moved");
        true
    }

    /// Relocate the layer at `from` to `to` on the active side.
    pub fn reorder_layer(&mut self, from: usize, to: usize) -> bool {
        self.reorder_within(self.active_side, from, to)
    }

    /// Relocate within an explicit side. Out-of-range indices are rejected.
    pub fn reorder_within(&mut self, side: Side, from: usize, to: usize) -> bool {
        let list = self.side_mut(side);
        if from >= list.len() || to >= list.len() {
            return false;
        }
        let layer = list.remove(from);
        list.insert(to, layer);
        self.reindex(side);
        self.mark_unsaved();
        true
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.find(id).map(|(_, idx)| idx)
    }

    // ── Duplicate ───────────────────────────────────────────────

    /// Copy a layer with its selection, mask, opacity and cache entry under a
    /// fresh id, directly above the original.
    pub fn duplicate_layer(&mut self, id: &str) -> Option<LayerId> {
        let (side, idx) = self.find(id)?;
        let (name, bounds, layer_type, cached_binary, image) = {
            let source = &self.side_ref(side)[idx];
            let image = match &source.image {
                ImageRef::Remote(url) => ImageRef::Remote(url.clone()),
                ImageRef::Local(handle) => ImageRef::Local(handle.duplicate()),
            };
            (source.name.clone(), source.bounds, source.layer_type, source.cached_binary.clone(), image)
        };

        let new_id = Uuid::new_v4().to_string();
        let copy_name = self.unique_copy_name(&name);
        let mut copy = Layer::new(new_id.clone(), copy_name, image, side, bounds, layer_type);
        copy.cached_binary = cached_binary;
        copy.revision = self.bump_revision();

        let mut selection = self.selections.get(id).cloned().unwrap_or_else(|| Selection::for_layer(&copy));
        selection.layer_id.clone_from(&new_id);
        selection.variable_name = variable_name_for(&copy.name);
        selection.layer_image_ref = copy.image.reference();
        selection.paired_element_id = None;

        if let Some(mask) = self.masks.get(id).cloned() {
            self.masks.insert(new_id.clone(), Mask { layer_id: new_id.clone(), ..mask });
        }
        if let Some(opacity) = self.opacity.get(id).copied() {
            self.opacity.insert(new_id.clone(), opacity);
        }
        if let Some(entry) = self.cache_entry(id).cloned() {
            self.upload_cache.push(CacheEntry {
                layer_id: new_id.clone(),
                upload_status: UploadStatus::Pending,
                retry_count: 0,
                error: None,
                created_at: OffsetDateTime::now_utc(),
                ..entry
            });
        } else if let Some(bytes) = copy.image.local_bytes() {
            let bytes = Arc::clone(bytes);
            self.add_to_cache(&new_id, bytes, side);
        }

        info!(source = %id, layer_id = %new_id, name = %copy.name, "layers: duplicated");
        self.side_mut(side).insert(idx + 1, copy);
        self.reindex(side);
        self.selections.insert(new_id.clone(), selection);
        self.stale_hit_tests.insert(new_id.clone());
        self.mark_unsaved();
        Some(new_id)
    }

    fn unique_copy_name(&self, name: &str) -> String {
        let taken: HashSet<&str> = self.layers().iter().map(|l| l.name.as_str()).collect();
        let base = copy_base(name);
        let first = format!("{base} (Copy)");
        if !taken.contains(first.as_str()) {
            return first;
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{base} (Copy {n})");
            if !taken.contains(candidate.as_str()) {
                return candidate;
            }
            n += 1;
        }
    }

    // ── Hit testing ─────────────────────────────────────────────

    /// Layer ids of the active side under a normalized point, topmost first.
    #[must_use]
    pub fn layers_at_position(&self, point: NormalizedPoint, surface: SurfaceSize) -> Vec<LayerId> {
        let p = surface.to_pixels(point);
        self.layers()
            .iter()
            .rev()
            .filter(|layer| layer_hit(&layer.bounds, self.hit_cache.get(&layer.id), p))
            .map(|layer| layer.id.clone())
            .collect()
    }

    #[must_use]
    pub fn hit_test_entry(&self, id: &str) -> Option<&HitTestEntry> {
        self.hit_cache.get(id)
    }

    #[must_use]
    pub fn has_stale_hit_tests(&self) -> bool {
        !self.stale_hit_tests.is_empty()
    }

    /// Drain the stale set into owned jobs.
    pub fn take_stale_hit_tests(&mut self) -> Vec<HitTestJob> {
        let ids: Vec<LayerId> = self.stale_hit_tests.drain().collect();
        ids.into_iter()
            .filter_map(|id| {
                let layer = self.layer(&id)?;
                Some(HitTestJob { source: layer.source(), revision: layer.revision, layer_id: id })
            })
            .collect()
    }

    /// Store a built alpha map if the layer's image has not changed since.
    pub fn store_hit_test(&mut self, id: &str, revision: u64, entry: HitTestEntry) -> bool {
        match self.layer(id) {
            Some(layer) if layer.revision == revision => {
                self.hit_cache.insert(id.to_string(), entry);
                true
            }
            _ => false,
        }
    }

    // ── Selection metadata ──────────────────────────────────────

    pub fn update_selection(&mut self, id: &str, update: SelectionUpdate) -> bool {
        let Some(selection) = self.selections.get_mut(id) else {
            return false;
        };
        if let Some(included) = update.included {
            selection.included = included;
        }
        if let Some(element_type) = update.element_type {
            selection.element_type = element_type;
        }
        if let Some(variable_name) = update.variable_name {
            selection.variable_name = variable_name;
        }
        if let Some(paired) = update.paired_element_id {
            selection.paired_element_id = Some(paired);
        }
        self.mark_unsaved();
        true
    }

    /// Opacity in `0.0..=1.0`; layers without an explicit value are opaque.
    #[must_use]
    pub fn opacity(&self, id: &str) -> f32 {
        self.opacity.get(id).copied().unwrap_or(1.0)
    }

    pub fn set_opacity(&mut self, id: &str, value: f32) -> bool {
        if self.find(id).is_none() {
            return false;
        }
        self.opacity.insert(id.to_string(), value.clamp(0.0, 1.0));
        self.mark_unsaved();
        true
    }

    // ── Merge selection ─────────────────────────────────────────

    #[must_use]
    pub fn merge_mode(&self) -> bool {
        self.merge_mode
    }

    /// Turning merge mode off clears the picked layers.
    pub fn set_merge_mode(&mut self, enabled: bool) {
        self.merge_mode = enabled;
        if !enabled {
            self.merge_selection.clear();
        }
    }

    /// Flip a layer in or out of the merge selection. Returns whether it is
    /// selected afterwards.
    pub fn toggle_merge_selection(&mut self, id: &str) -> bool {
        if self.find(id).is_none() {
            return false;
        }
        if let Some(pos) = self.merge_selection.iter().position(|m| m == id) {
            self.merge_selection.remove(pos);
            false
        } else {
            self.merge_selection.push(id.to_string());
            true
        }
    }

    #[must_use]
    pub fn merge_selection(&self) -> &[LayerId] {
        &self.merge_selection
    }

    // ── Masks ───────────────────────────────────────────────────

    /// Attach a mask. The payload must decode as an image and the bounds
    /// must have positive area.
    pub fn set_mask(&mut self, id: &str, payload: Arc<[u8]>, bounds: Bounds) -> Result<(), LayerError> {
        if self.find(id).is_none() {
            return Err(LayerError::NotFound(id.to_string()));
        }
        if !bounds.is_positive_area() || Surface::from_bytes(&payload).is_err() {
            warn!(layer_id = %id, ?bounds, "layers: rejected mask");
            self.notifier.error("Invalid mask data");
            return Err(LayerError::InvalidMask(id.to_string()));
        }
        self.masks.insert(id.to_string(), Mask { layer_id: id.to_string(), payload, bounds });
        self.mark_unsaved();
        Ok(())
    }

    #[must_use]
    pub fn mask(&self, id: &str) -> Option<&Mask> {
        self.masks.get(id)
    }

    pub fn clear_mask(&mut self, id: &str) -> bool {
        let removed = self.masks.remove(id).is_some();
        if removed {
            self.mark_unsaved();
        }
        removed
    }

    // ── Image and geometry updates ──────────────────────────────

    /// Reassign a layer's image. The previous local blob, if any, is released.
    pub fn update_layer_image(&mut self, id: &str, image: ImageRef) -> bool {
        let Some((side, idx)) = self.find(id) else {
            return false;
        };
        let revision = self.bump_revision();
        let reference = image.reference();
        let local = image.local_bytes().map(Arc::clone);
        let previous = {
            let layer = &mut self.side_mut(side)[idx];
            layer.cached_binary = None;
            layer.revision = revision;
            std::mem::replace(&mut layer.image, image)
        };
        drop(previous);

        if let Some(selection) = self.selections.get_mut(id) {
            selection.layer_image_ref = reference;
        }
        match local {
            Some(bytes) => self.add_to_cache(id, bytes, side),
            None => self.upload_cache.retain(|e| e.layer_id != id),
        }
        self.hit_cache.remove(id);
        self.stale_hit_tests.insert(id.to_string());
        self.mark_unsaved();
        true
    }

    /// Replace a layer's pixels with a new local binary at `bounds`.
    pub fn replace_layer_raster(&mut self, id: &str, bytes: Vec<u8>, bounds: Bounds) -> Result<(), LayerError> {
        if self.find(id).is_none() {
            return Err(LayerError::NotFound(id.to_string()));
        }
        let handle = self.blobs.insert(bytes);
        self.update_layer_image(id, ImageRef::Local(handle));
        self.update_layer_bounds(id, bounds);
        Ok(())
    }

    pub fn update_layer_bounds(&mut self, id: &str, bounds: Bounds) -> bool {
        let Some((side, idx)) = self.find(id) else {
            return false;
        };
        self.side_mut(side)[idx].bounds = bounds;
        if let Some(selection) = self.selections.get_mut(id) {
            selection.bounds = bounds;
        }
        self.mark_unsaved();
        true
    }

    pub fn rename_layer(&mut self, id: &str, name: &str) -> bool {
        if name.trim().is_empty() {
            return false;
        }
        let Some((side, idx)) = self.find(id) else {
            return false;
        };
        self.side_mut(side)[idx].name = name.to_string();
        self.mark_unsaved();
        true
    }

    // ── Background ──────────────────────────────────────────────

    /// Insert the active side's background at z=0, sized to the rendering
    /// surface rather than the image's native resolution.
    pub fn create_background_layer(&mut self, image: ImageRef, surface: SurfaceSize) -> Result<LayerId, LayerError> {
        let side = self.active_side;
        let id = background_layer_id(side);
        let layer = Layer::new(id.clone(), "Background", image, side, surface.bounds(), LayerType::Decomposed);
        let mut selection = Selection::for_layer(&layer);
        selection.included = false;
        self.add_layer(layer, selection)?;
        let last = self.side_ref(side).len() - 1;
        self.reorder_within(side, last, 0);
        Ok(id)
    }

    /// Create the background unless the active side already has one.
    pub fn ensure_background_layer(&mut self, image: ImageRef, surface: SurfaceSize) -> Result<bool, LayerError> {
        if self.index_on(self.active_side, &background_layer_id(self.active_side)).is_some() {
            return Ok(false);
        }
        self.create_background_layer(image, surface)?;
        Ok(true)
    }

    // ── History restore ─────────────────────────────────────────

    /// Append remote result layers to the active side.
    pub fn add_from_history(&mut self, layers: &[HistoryLayer]) -> Vec<LayerId> {
        let side = self.active_side;
        let mut added = Vec::with_capacity(layers.len());
        for (i, item) in layers.iter().enumerate() {
            let name = item.name.clone().unwrap_or_else(|| format!("History Layer {i}"));
            let bounds = item.bounds.unwrap_or(Bounds::new(
                0,
                0,
                DEFAULT_HISTORY_LAYER_SIZE,
                DEFAULT_HISTORY_LAYER_SIZE,
            ));
            let (layer, selection) =
                self.create_layer(ImageRef::Remote(item.image_url.clone()), &name, bounds, side, LayerType::Decomposed);
            let id = layer.id.clone();
            if self.add_layer(layer, selection).is_ok() {
                added.push(id);
            }
        }
        added
    }

    // ── Layer merge ─────────────────────────────────────────────

    /// Capture everything needed to composite `ids` into one layer.
    pub fn plan_merge(&self, ids: &[LayerId]) -> Result<MergePlan, LayerError> {
        let mut unique: Vec<&LayerId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.len() < 2 {
            return Err(LayerError::TooFewLayers(unique.len()));
        }

        let side = self.active_side;
        let mut sources = Vec::with_capacity(unique.len());
        for id in unique {
            let idx = self.index_on(side, id).ok_or_else(|| LayerError::NotFound(id.clone()))?;
            let layer = &self.side_ref(side)[idx];
            sources.push((
                idx,
                MergeSource {
                    layer_id: layer.id.clone(),
                    source: layer.source(),
                    bounds: layer.bounds,
                    revision: layer.revision,
                },
            ));
        }
        sources.sort_by_key(|(idx, _)| *idx);
        let sources: Vec<MergeSource> = sources.into_iter().map(|(_, s)| s).collect();
        let bounds = Bounds::union_all(sources.iter().map(|s| &s.bounds))
            .ok_or(LayerError::TooFewLayers(0))?;
        let name = format!("Merged ({})", sources.len());
        Ok(MergePlan { side, sources, bounds, name })
    }

    /// Replace the planned layers with one local layer holding `bytes`, at
    /// the topmost source's position. Fails if any source changed meanwhile.
    pub fn commit_merge(&mut self, plan: &MergePlan, bytes: Vec<u8>) -> Result<LayerId, LayerError> {
        let mut top = 0usize;
        for source in &plan.sources {
            let idx = self
                .index_on(plan.side, &source.layer_id)
                .ok_or_else(|| LayerError::NotFound(source.layer_id.clone()))?;
            let layer = &self.side_ref(plan.side)[idx];
            if layer.revision != source.revision || layer.bounds != source.bounds {
                return Err(LayerError::Invalid(format!("layer {} changed during merge", source.layer_id)));
            }
            top = top.max(idx);
        }

        for source in &plan.sources {
            self.remove_layer(&source.layer_id);
        }
        let target = (top + 1).saturating_sub(plan.sources.len());

        let handle = self.blobs.insert(bytes);
        let (layer, selection) =
            self.create_layer(ImageRef::Local(handle), &plan.name, plan.bounds, plan.side, LayerType::Drawing);
        let id = layer.id.clone();
        self.add_layer(layer, selection)?;
        let last = self.side_ref(plan.side).len() - 1;
        self.reorder_within(plan.side, last, target);
        info!(layer_id = %id, merged = plan.sources.len(), z = target, "layers: merged");
        Ok(id)
    }

    // ── Upload cache ────────────────────────────────────────────

    /// Queue a local binary for upload, superseding any earlier entry.
    pub fn add_to_cache(&mut self, id: &str, binary: Arc<[u8]>, side: Side) {
        self.upload_cache.retain(|e| e.layer_id != id);
        self.upload_cache.push(CacheEntry {
            layer_id: id.to_string(),
            binary,
            side,
            created_at: OffsetDateTime::now_utc(),
            upload_status: UploadStatus::Pending,
            retry_count: 0,
            error: None,
        });
    }

    #[must_use]
    pub fn cache_entry(&self, id: &str) -> Option<&CacheEntry> {
        self.upload_cache.iter().find(|e| e.layer_id == id)
    }

    #[must_use]
    pub fn cache_entries(&self) -> &[CacheEntry] {
        &self.upload_cache
    }

    /// Mark up to `limit` eligible entries as uploading and hand out their
    /// bytes. Pending entries are eligible, and so are failed entries still
    /// under `max_retries`.
    pub fn begin_uploads(&mut self, limit: usize, max_retries: u32) -> Vec<(LayerId, Arc<[u8]>)> {
        self.upload_cache
            .iter_mut()
            .filter(|e| match e.upload_status {
                UploadStatus::Pending => true,
                UploadStatus::Failed => e.retry_count < max_retries,
                UploadStatus::Uploading | UploadStatus::Uploaded => false,
            })
            .take(limit)
            .map(|e| {
                e.upload_status = UploadStatus::Uploading;
                (e.layer_id.clone(), Arc::clone(&e.binary))
            })
            .collect()
    }

    /// Mark a single layer's entry as uploading regardless of its state.
    pub fn begin_upload(&mut self, id: &str) -> Option<Arc<[u8]>> {
        let entry = self.upload_cache.iter_mut().find(|e| e.layer_id == id)?;
        entry.upload_status = UploadStatus::Uploading;
        Some(Arc::clone(&entry.binary))
    }

    /// Apply an upload response. On success the entry is dropped and the
    /// layer switches to the durable URL, keeping the bytes as its cached
    /// binary.
    pub fn complete_upload(&mut self, id: &str, binary: &Arc<[u8]>, result: Result<String, String>) -> UploadOutcome {
        let Some(pos) = self.upload_cache.iter().position(|e| e.layer_id == id && Arc::ptr_eq(&e.binary, binary))
        else {
            return UploadOutcome::Superseded;
        };

        match result {
            Ok(url) => {
                self.upload_cache.remove(pos);
                if let Some((side, idx)) = self.find(id) {
                    let layer = &mut self.side_mut(side)[idx];
                    if layer.image.local_bytes().is_some_and(|b| Arc::ptr_eq(b, binary)) {
                        let previous = std::mem::replace(&mut layer.image, ImageRef::Remote(url.clone()));
                        layer.cached_binary = Some(Arc::clone(binary));
                        drop(previous);
                        if let Some(selection) = self.selections.get_mut(id) {
                            selection.layer_image_ref.clone_from(&url);
                        }
                        self.mark_unsaved();
                    }
                }
                debug!(layer_id = %id, %url, "layers: upload applied");
                UploadOutcome::Uploaded(url)
            }
            Err(message) => {
                let entry = &mut self.upload_cache[pos];
                entry.upload_status = UploadStatus::Failed;
                entry.retry_count += 1;
                entry.error = Some(message);
                UploadOutcome::Failed { retry_count: entry.retry_count }
            }
        }
    }

    /// Hand an upload that never reported back to the retry path. Only an
    /// entry still `Uploading` the same binary is touched; its retry count
    /// is kept.
    pub fn abandon_upload(&mut self, id: &str, binary: &Arc<[u8]>) -> bool {
        let Some(entry) = self
            .upload_cache
            .iter_mut()
            .find(|e| e.layer_id == id && Arc::ptr_eq(&e.binary, binary) && e.upload_status == UploadStatus::Uploading)
        else {
            return false;
        };
        entry.upload_status = UploadStatus::Failed;
        entry.error = Some("upload interrupted".into());
        true
    }

    /// Re-arm every failed entry with a fresh retry budget.
    pub fn reset_failed_uploads(&mut self) -> usize {
        let mut count = 0;
        for entry in &mut self.upload_cache {
            if entry.upload_status == UploadStatus::Failed {
                entry.upload_status = UploadStatus::Pending;
                entry.retry_count = 0;
                entry.error = None;
                count += 1;
            }
        }
        count
    }

    // ── Snapshots ───────────────────────────────────────────────

    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<LayerSnapshot> {
        let layer = self.layer(id)?;
        let binary = layer.image.local_bytes().or(layer.cached_binary.as_ref()).map(Arc::clone);
        Some(LayerSnapshot {
            id: layer.id.clone(),
            image_ref: layer.image.reference(),
            binary,
            bounds: layer.bounds,
            side: layer.side,
            name: layer.name.clone(),
            layer_type: layer.layer_type,
            z_index: layer.z_index,
            paired_element_id: layer.paired_element_id.clone(),
            selection: self.selections.get(id).cloned(),
            mask: self.masks.get(id).cloned(),
        })
    }

    /// Restore an existing layer's image, geometry, name and metadata.
    pub fn apply_snapshot(&mut self, snapshot: &LayerSnapshot) -> bool {
        let Some((side, idx)) = self.find(&snapshot.id) else {
            return false;
        };
        let unchanged = {
            let layer = &self.side_ref(side)[idx];
            image_matches(layer, snapshot)
        };
        if !unchanged {
            let Some((image, cached)) = self.image_from_snapshot(snapshot) else {
                warn!(layer_id = %snapshot.id, "layers: snapshot image unavailable");
                return false;
            };
            self.update_layer_image(&snapshot.id, image);
            if let Some((side, idx)) = self.find(&snapshot.id) {
                self.side_mut(side)[idx].cached_binary = cached;
            }
        }
        {
            let layer = &mut self.side_mut(side)[idx];
            layer.name.clone_from(&snapshot.name);
            layer.layer_type = snapshot.layer_type;
            layer.paired_element_id.clone_from(&snapshot.paired_element_id);
        }
        self.update_layer_bounds(&snapshot.id, snapshot.bounds);
        self.restore_side_tables(snapshot);
        self.mark_unsaved();
        true
    }

    /// Re-create a removed layer at its recorded z-position, keeping its id.
    pub fn recreate_from_snapshot(&mut self, snapshot: &LayerSnapshot) -> bool {
        if self.find(&snapshot.id).is_some() {
            return false;
        }
        let Some((image, cached)) = self.image_from_snapshot(snapshot) else {
            warn!(layer_id = %snapshot.id, "layers: snapshot image unavailable");
            return false;
        };
        let mut layer =
            Layer::new(snapshot.id.clone(), snapshot.name.clone(), image, snapshot.side, snapshot.bounds, snapshot.layer_type);
        layer.paired_element_id.clone_from(&snapshot.paired_element_id);
        layer.cached_binary = cached;
        let selection = snapshot.selection.clone().unwrap_or_else(|| Selection::for_layer(&layer));
        if self.add_layer(layer, selection).is_err() {
            return false;
        }
        let last = self.side_ref(snapshot.side).len() - 1;
        self.reorder_within(snapshot.side, last, snapshot.z_index.min(last));
        self.restore_side_tables(snapshot);
        true
    }

    fn image_from_snapshot(&self, snapshot: &LayerSnapshot) -> Option<(ImageRef, Option<Arc<[u8]>>)> {
        if BlobId::parse_ref(&snapshot.image_ref).is_some() {
            let bytes = snapshot.binary.clone()?;
            Some((ImageRef::Local(self.blobs.insert(bytes)), None))
        } else {
            Some((ImageRef::Remote(snapshot.image_ref.clone()), snapshot.binary.clone()))
        }
    }

    fn restore_side_tables(&mut self, snapshot: &LayerSnapshot) {
        let reference = self.layer(&snapshot.id).map(|l| l.image.reference());
        if let Some(mut selection) = snapshot.selection.clone() {
            selection.bounds = snapshot.bounds;
            if let Some(reference) = reference {
                selection.layer_image_ref = reference;
            }
            self.selections.insert(snapshot.id.clone(), selection);
        }
        match &snapshot.mask {
            Some(mask) => {
                self.masks.insert(snapshot.id.clone(), mask.clone());
            }
            None => {
                self.masks.remove(&snapshot.id);
            }
        }
    }

    // ── Session records ─────────────────────────────────────────

    /// Serializable view of both sides.
    #[must_use]
    pub fn export_session(&self, asset_id: &str) -> SessionRecord {
        let record_of = |layer: &Layer| LayerRecord {
            id: layer.id.clone(),
            name: layer.name.clone(),
            image_ref: layer.image.reference(),
            z_index: layer.z_index,
            side: layer.side,
            bounds: layer.bounds,
            layer_type: layer.layer_type,
            paired_element_id: layer.paired_element_id.clone(),
        };
        let mut selections: Vec<Selection> = self.selections.values().cloned().collect();
        selections.sort_by(|a, b| a.layer_id.cmp(&b.layer_id));
        let mut masks: Vec<MaskRecord> = self
            .masks
            .values()
            .map(|m| MaskRecord {
                layer_id: m.layer_id.clone(),
                payload_base64: Base64::encode_string(&m.payload),
                bounds: m.bounds,
            })
            .collect();
        masks.sort_by(|a, b| a.layer_id.cmp(&b.layer_id));

        SessionRecord {
            asset_id: asset_id.to_string(),
            front: self.front.iter().map(record_of).collect(),
            back: self.back.iter().map(record_of).collect(),
            selections,
            opacity: self.opacity.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            masks,
            active_side: self.active_side,
            show_original: self.show_original,
            saved_at: OffsetDateTime::now_utc(),
        }
    }

    /// Replace all state with a session record. Local references whose blob
    /// is gone become a transparent placeholder; returns how many.
    pub fn import_session(&mut self, record: &SessionRecord) -> Result<usize, RasterError> {
        let placeholder: Arc<[u8]> = Arc::from(Surface::solid(1, 1, PLACEHOLDER_RGBA).to_png()?);

        let old_front = std::mem::take(&mut self.front);
        let old_back = std::mem::take(&mut self.back);
        for layer in old_front.iter().chain(old_back.iter()) {
            self.forget(&layer.id);
        }
        // Copy live blobs before the old handles are dropped.
        let live: HashMap<String, Arc<[u8]>> = record
            .front
            .iter()
            .chain(record.back.iter())
            .filter_map(|r| {
                let id = BlobId::parse_ref(&r.image_ref)?;
                Some((r.image_ref.clone(), self.blobs.get(id)?))
            })
            .collect();
        drop(old_front);
        drop(old_back);
        self.selections.clear();
        self.masks.clear();
        self.opacity.clear();
        self.hit_cache.clear();
        self.stale_hit_tests.clear();
        self.upload_cache.clear();
        self.merge_selection.clear();

        let mut placeholders = 0usize;
        for side_records in [&record.front, &record.back] {
            let mut ordered: Vec<&LayerRecord> = side_records.iter().collect();
            ordered.sort_by_key(|r| r.z_index);
            for r in ordered {
                let image = if BlobId::parse_ref(&r.image_ref).is_some() {
                    if let Some(bytes) = live.get(&r.image_ref) {
                        ImageRef::Local(self.blobs.insert(Arc::clone(bytes)))
                    } else {
                        placeholders += 1;
                        warn!(layer_id = %r.id, image_ref = %r.image_ref, "layers: dead local image, using placeholder");
                        ImageRef::Local(self.blobs.insert(Arc::clone(&placeholder)))
                    }
                } else {
                    ImageRef::Remote(r.image_ref.clone())
                };
                let is_placeholder = image.local_bytes().is_some_and(|b| Arc::ptr_eq(b, &placeholder));
                let mut layer = Layer::new(r.id.clone(), r.name.clone(), image, r.side, r.bounds, r.layer_type);
                layer.paired_element_id.clone_from(&r.paired_element_id);
                layer.revision = self.bump_revision();
                if !is_placeholder {
                    if let Some(bytes) = layer.image.local_bytes() {
                        let bytes = Arc::clone(bytes);
                        self.add_to_cache(&r.id, bytes, r.side);
                    }
                }
                self.stale_hit_tests.insert(r.id.clone());
                self.side_mut(r.side).push(layer);
            }
        }
        self.reindex(Side::Front);
        self.reindex(Side::Back);

        for selection in &record.selections {
            let Some(layer) = self.layer(&selection.layer_id) else {
                continue;
            };
            let mut selection = selection.clone();
            selection.layer_image_ref = layer.image.reference();
            self.selections.insert(selection.layer_id.clone(), selection);
        }
        let missing: Vec<(LayerId, Selection)> = self
            .front
            .iter()
            .chain(self.back.iter())
            .filter(|l| !self.selections.contains_key(&l.id))
            .map(|l| (l.id.clone(), Selection::for_layer(l)))
            .collect();
        self.selections.extend(missing);

        for (id, value) in &record.opacity {
            if self.find(id).is_some() {
                self.opacity.insert(id.clone(), value.clamp(0.0, 1.0));
            }
        }
        for mask in &record.masks {
            match Base64::decode_vec(&mask.payload_base64) {
                Ok(payload) if self.find(&mask.layer_id).is_some() => {
                    self.masks.insert(
                        mask.layer_id.clone(),
                        Mask { layer_id: mask.layer_id.clone(), payload: Arc::from(payload), bounds: mask.bounds },
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(layer_id = %mask.layer_id, error = %err, "layers: undecodable mask in session"),
            }
        }

        self.active_side = record.active_side;
        self.show_original = record.show_original;
        self.save_state = SaveState::Saved;
        if placeholders > 0 {
            self.notifier.warning(format!("{placeholders} layer image(s) were no longer available and were cleared"));
        }
        info!(
            asset_id = %record.asset_id,
            front = self.front.len(),
            back = self.back.len(),
            placeholders,
            "layers: session restored"
        );
        Ok(placeholders)
    }

    // ── Internals ───────────────────────────────────────────────

    fn side_ref(&self, side: Side) -> &Vec<Layer> {
        match side {
            Side::Front => &self.front,
            Side::Back => &self.back,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Vec<Layer> {
        match side {
            Side::Front => &mut self.front,
            Side::Back => &mut self.back,
        }
    }

    fn find(&self, id: &str) -> Option<(Side, usize)> {
        [Side::Front, Side::Back]
            .into_iter()
            .find_map(|side| self.index_on(side, id).map(|idx| (side, idx)))
    }

    fn index_on(&self, side: Side, id: &str) -> Option<usize> {
        self.side_ref(side).iter().position(|l| l.id == id)
    }

    fn reindex(&mut self, side: Side) {
        for (i, layer) in self.side_mut(side).iter_mut().enumerate() {
            layer.z_index = i;
        }
    }

    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

fn image_matches(layer: &Layer, snapshot: &LayerSnapshot) -> bool {
    match &layer.image {
        ImageRef::Local(handle) => snapshot.binary.as_ref().is_some_and(|b| Arc::ptr_eq(b, handle.bytes())),
        ImageRef::Remote(url) => *url == snapshot.image_ref,
    }
}

/// Strip a trailing ` (Copy)` or ` (Copy N)` so copies of copies stay flat.
fn copy_base(name: &str) -> &str {
    if let Some(base) = name.strip_suffix(" (Copy)") {
        return base;
    }
    if let Some(rest) = name.strip_suffix(')') {
        if let Some(pos) = rest.rfind(" (Copy ") {
            let digits = &rest[pos + " (Copy ".len()..];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return &rest[..pos];
            }
        }
    }
    name
}
