//! Shared editor state.
//!
//! DESIGN
//! ======
//! `EditorState` is the handle every service receives. Cloning it is cheap:
//! every field is `Arc`-wrapped or itself a cloneable handle.
//!
//! The Layer Manager and Undo Manager live together in one [`Document`]
//! behind a tokio `RwLock`. Mutations take the write lock, do their
//! synchronous work and release it before any await, so no partial state is
//! ever observable.
//!
//! Per-layer raster merges serialize on a per-layer tokio `Mutex` from
//! `merge_queues`. tokio mutexes are FIFO, so waiters acquire in arrival
//! order. Upload drains and image-processor workflows each have a flag that
//! admits one runner at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, RwLock};

use crate::blob::BlobStore;
use crate::config::EditorConfig;
use crate::geometry::SurfaceSize;
use crate::layers::{LayerId, LayerManager};
use crate::notify::Notifier;
use crate::remote::RemoteApi;
use crate::services::history::HistoryManager;
use crate::session::SessionStore;
use crate::undo::UndoManager;

// =============================================================================
// DOCUMENT
// =============================================================================

/// Layers plus their undo history, mutated together under one lock.
pub struct Document {
    pub layers: LayerManager,
    pub undo: UndoManager,
}

// =============================================================================
// ASSET
// =============================================================================

/// The card asset being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub id: String,
    pub template_id: Option<String>,
    /// Rendering surface every layer's bounds are expressed in.
    pub surface: SurfaceSize,
}

// =============================================================================
// BUSY FLAGS
// =============================================================================

/// Clears its flag when dropped.
pub struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

fn try_claim(flag: &Arc<AtomicBool>) -> Option<BusyGuard> {
    flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
        .then(|| BusyGuard { flag: Arc::clone(flag) })
}

// =============================================================================
// EDITOR STATE
// =============================================================================

#[derive(Clone)]
pub struct EditorState {
    pub doc: Arc<RwLock<Document>>,
    pub blobs: BlobStore,
    pub remote: Arc<dyn RemoteApi>,
    pub history: HistoryManager,
    pub notifier: Notifier,
    pub sessions: Arc<dyn SessionStore>,
    pub config: Arc<EditorConfig>,
    pub asset: AssetInfo,
    merge_queues: Arc<std::sync::Mutex<HashMap<LayerId, Arc<Mutex<()>>>>>,
    uploading: Arc<AtomicBool>,
    processing: Arc<AtomicBool>,
}

impl EditorState {
    #[must_use]
    pub fn new(
        config: EditorConfig,
        remote: Arc<dyn RemoteApi>,
        sessions: Arc<dyn SessionStore>,
        asset: AssetInfo,
    ) -> Self {
        let blobs = BlobStore::new();
        let notifier = Notifier::new();
        let history = HistoryManager::new(Arc::clone(&remote), notifier.clone(), &config, asset.template_id.clone());
        let doc = Document {
            layers: LayerManager::new(blobs.clone(), notifier.clone()),
            undo: UndoManager::new(config.undo_capacity),
        };
        Self {
            doc: Arc::new(RwLock::new(doc)),
            blobs,
            remote,
            history,
            notifier,
            sessions,
            config: Arc::new(config),
            asset,
            merge_queues: Arc::new(std::sync::Mutex::new(HashMap::new())),
            uploading: Arc::new(AtomicBool::new(false)),
            processing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The serialization queue for merges into one layer. Queues nobody
    /// holds or waits on are pruned as a side effect.
    #[must_use]
    pub fn merge_queue(&self, id: &str) -> Arc<Mutex<()>> {
        let mut queues = self.merge_queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.retain(|key, queue| key == id || Arc::strong_count(queue) > 1);
        Arc::clone(queues.entry(id.to_string()).or_default())
    }

    /// Admit one upload-queue drain at a time.
    #[must_use]
    pub fn try_begin_upload_drain(&self) -> Option<BusyGuard> {
        try_claim(&self.uploading)
    }

    #[must_use]
    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::Acquire)
    }

    /// Admit one image-processor workflow at a time.
    #[must_use]
    pub fn try_begin_processing(&self) -> Option<BusyGuard> {
        try_claim(&self.processing)
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
