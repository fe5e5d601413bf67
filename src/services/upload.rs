//! Upload service: moves local layer binaries to durable remote URLs.
//!
//! DESIGN
//! ======
//! The queue itself is the Layer Manager's upload cache; this module only
//! drains it. A drain repeatedly takes a batch of up to
//! `upload.concurrency` eligible entries, uploads them concurrently, and
//! applies each response through `complete_upload`. A failed entry becomes
//! eligible again until it has failed `upload.max_retries` times; each retry
//! waits `retry_base_ms * retry_count` first. Only one drain runs at a time.
//!
//! An upload future dropped before its response is applied would leave its
//! entry `Uploading` and out of every later batch. Each in-flight upload is
//! covered by an [`InFlight`] guard that hands such entries back as
//! `Failed`, keeping their retry count.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EditorError, LayerError};
use crate::layers::{ImageRef, LayerId, LayerManager, UploadOutcome};
use crate::remote::{PNG_MIME, RemoteApi, RemoteError, encode_payload, require_url};
use crate::state::{Document, EditorState};

#[cfg(test)]
#[path = "upload_test.rs"]
mod tests;

// ── In-flight guard ─────────────────────────────────────────

/// Cache entries this task marked `Uploading`. Whatever is still listed
/// when the guard drops goes back to `Failed`.
struct InFlight {
    doc: Arc<RwLock<Document>>,
    entries: Vec<(LayerId, Arc<[u8]>)>,
}

impl InFlight {
    fn new(state: &EditorState, entries: Vec<(LayerId, Arc<[u8]>)>) -> Self {
        Self { doc: Arc::clone(&state.doc), entries }
    }

    /// Every response has been applied through `complete_upload`.
    fn settle(&mut self) {
        self.entries.clear();
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.entries);
        if let Ok(mut doc) = self.doc.try_write() {
            release_interrupted(&mut doc.layers, &entries);
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(count = entries.len(), "upload: no runtime to release interrupted uploads");
            return;
        };
        let doc = Arc::clone(&self.doc);
        runtime.spawn(async move {
            release_interrupted(&mut doc.write().await.layers, &entries);
        });
    }
}

fn release_interrupted(layers: &mut LayerManager, entries: &[(LayerId, Arc<[u8]>)]) {
    for (id, bytes) in entries {
        if layers.abandon_upload(id, bytes) {
            warn!(layer_id = %id, "upload: interrupted, marked failed");
        }
    }
}

/// Upload raw bytes and return the durable URL.
pub async fn upload_bytes(remote: &dyn RemoteApi, bytes: &[u8]) -> Result<String, RemoteError> {
    let response = remote.upload_binary(&encode_payload(bytes), PNG_MIME).await?;
    require_url(response)
}

/// Drain the upload cache. Returns how many entries were uploaded, or 0 if
/// another drain is already running.
pub async fn process_upload_queue(state: &EditorState) -> usize {
    let Some(_drain) = state.try_begin_upload_drain() else {
        debug!("upload: drain already running");
        return 0;
    };
    let policy = state.config.upload;
    let mut uploaded = 0;

    loop {
        let batch: Vec<(LayerId, Arc<[u8]>, u32)> = {
            let mut doc = state.doc.write().await;
            let picked = doc.layers.begin_uploads(policy.concurrency.max(1), policy.max_retries);
            picked
                .into_iter()
                .map(|(id, bytes)| {
                    let retries = doc.layers.cache_entry(&id).map_or(0, |e| e.retry_count);
                    (id, bytes, retries)
                })
                .collect()
        };
        if batch.is_empty() {
            break;
        }
        let mut in_flight =
            InFlight::new(state, batch.iter().map(|(id, bytes, _)| (id.clone(), Arc::clone(bytes))).collect());

        let remote = state.remote.as_ref();
        let results = join_all(batch.into_iter().map(|(id, bytes, retries)| async move {
            if retries > 0 {
                tokio::time::sleep(Duration::from_millis(policy.retry_base_ms * u64::from(retries))).await;
            }
            let result = upload_bytes(remote, &bytes).await.map_err(|e| e.to_string());
            (id, bytes, result)
        }))
        .await;

        let mut doc = state.doc.write().await;
        for (id, bytes, result) in results {
            match doc.layers.complete_upload(&id, &bytes, result) {
                UploadOutcome::Uploaded(url) => {
                    uploaded += 1;
                    debug!(layer_id = %id, %url, "upload: uploaded");
                }
                UploadOutcome::Failed { retry_count } if retry_count >= policy.max_retries => {
                    warn!(layer_id = %id, retry_count, "upload: giving up");
                    state.notifier.error("A layer image failed to upload");
                }
                UploadOutcome::Failed { retry_count } => {
                    warn!(layer_id = %id, retry_count, "upload: failed, will retry");
                }
                UploadOutcome::Superseded => debug!(layer_id = %id, "upload: superseded"),
            }
        }
        in_flight.settle();
    }

    if uploaded > 0 {
        info!(uploaded, "upload: drain finished");
    }
    uploaded
}

/// Re-arm every failed entry and drain again. Returns how many were re-armed.
pub async fn retry_failed_uploads(state: &EditorState) -> usize {
    let rearmed = state.doc.write().await.layers.reset_failed_uploads();
    if rearmed > 0 {
        info!(rearmed, "upload: retrying failed uploads");
        process_upload_queue(state).await;
    }
    rearmed
}

/// Make sure a layer has a durable URL now, uploading its local binary if
/// needed.
pub async fn ensure_layer_uploaded(state: &EditorState, layer_id: &str) -> Result<String, EditorError> {
    let bytes = {
        let mut doc = state.doc.write().await;
        let layer = doc.layers.layer(layer_id).ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?;
        let (local, side) = match &layer.image {
            ImageRef::Remote(url) => return Ok(url.clone()),
            ImageRef::Local(handle) => (Arc::clone(handle.bytes()), layer.side),
        };
        match doc.layers.begin_upload(layer_id) {
            Some(bytes) => bytes,
            None => {
                doc.layers.add_to_cache(layer_id, local, side);
                doc.layers
                    .begin_upload(layer_id)
                    .ok_or_else(|| LayerError::NotFound(layer_id.to_string()))?
            }
        }
    };

    let mut in_flight = InFlight::new(state, vec![(layer_id.to_string(), Arc::clone(&bytes))]);

    let result = upload_bytes(state.remote.as_ref(), &bytes).await;
    let failure = result.as_ref().err().cloned();
    let mut doc = state.doc.write().await;
    let outcome = doc.layers.complete_upload(layer_id, &bytes, result.map_err(|e| e.to_string()));
    in_flight.settle();
    match outcome {
        UploadOutcome::Uploaded(url) => Ok(url),
        UploadOutcome::Failed { .. } => match failure {
            Some(err) => Err(err.into()),
            None => Err(LayerError::Invalid(format!("upload of {layer_id} failed")).into()),
        },
        UploadOutcome::Superseded => match doc.layers.layer(layer_id).map(|l| &l.image) {
            Some(ImageRef::Remote(url)) => Ok(url.clone()),
            _ => Err(LayerError::Invalid(format!("layer {layer_id} changed during upload")).into()),
        },
    }
}
