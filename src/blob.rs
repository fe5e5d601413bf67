//! Ephemeral binary handles.
//!
//! DESIGN
//! ======
//! Images produced locally (strokes, fills, merges, crops) live in a
//! process-local [`BlobStore`] until they are uploaded. A [`BlobHandle`] is
//! the only way to keep a blob alive: it is not `Clone`, and dropping it
//! releases the blob. Ownership of a layer's image therefore moves with the
//! handle, and replacing or removing the layer releases the old blob exactly
//! once. Copies (duplicate, undo restore) insert the bytes again under a new
//! id.
//!
//! The bytes themselves are `Arc<[u8]>` so readers (merges, uploads,
//! snapshots) can hold them across await points without keeping the handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

#[cfg(test)]
#[path = "blob_test.rs"]
mod tests;

/// URL-like prefix used when a handle is rendered as an image reference.
pub const BLOB_REF_PREFIX: &str = "blob:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(u64);

impl BlobId {
    /// Parse a `blob:<n>` image reference.
    #[must_use]
    pub fn parse_ref(raw: &str) -> Option<Self> {
        match raw.strip_prefix(BLOB_REF_PREFIX)?.parse::<u64>() {
            Ok(n) => Some(Self(n)),
            Err(_) => None,
        }
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BLOB_REF_PREFIX}{}", self.0)
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    live: HashMap<BlobId, Arc<[u8]>>,
    released: u64,
}

/// Shared registry of live blobs. Cheap to clone.
#[derive(Clone, Default)]
pub struct BlobStore {
    inner: Arc<Mutex<Inner>>,
}

impl BlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register bytes and return the owning handle.
    #[must_use]
    pub fn insert(&self, bytes: impl Into<Arc<[u8]>>) -> BlobHandle {
        let bytes = bytes.into();
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = BlobId(inner.next_id);
        inner.live.insert(id, Arc::clone(&bytes));
        debug!(%id, len = bytes.len(), "blob: acquired");
        BlobHandle { id, bytes, store: self.clone() }
    }

    /// Bytes of a live blob.
    #[must_use]
    pub fn get(&self, id: BlobId) -> Option<Arc<[u8]>> {
        self.lock().live.get(&id).cloned()
    }

    #[must_use]
    pub fn is_live(&self, id: BlobId) -> bool {
        self.lock().live.contains_key(&id)
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Total releases since the store was created.
    #[must_use]
    pub fn released_count(&self) -> u64 {
        self.lock().released
    }

    fn release(&self, id: BlobId) {
        let mut inner = self.lock();
        if inner.live.remove(&id).is_some() {
            inner.released += 1;
            debug!(%id, "blob: released");
        }
    }
}

/// Sole owner of one live blob. Dropping it releases the blob.
pub struct BlobHandle {
    id: BlobId,
    bytes: Arc<[u8]>,
    store: BlobStore,
}

impl BlobHandle {
    #[must_use]
    pub fn id(&self) -> BlobId {
        self.id
    }

    #[must_use]
    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    /// Insert a copy of these bytes under a fresh id.
    #[must_use]
    pub fn duplicate(&self) -> BlobHandle {
        self.store.insert(Arc::clone(&self.bytes))
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle").field("id", &self.id).field("len", &self.bytes.len()).finish()
    }
}

impl Drop for BlobHandle {
    fn drop(&mut self) {
        self.store.release(self.id);
    }
}
