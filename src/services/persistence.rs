//! Persistence service: session save/restore and the autosave loop.
//!
//! DESIGN
//! ======
//! A background task wakes on every structural mutation (the Layer
//! Manager's change signal) and, as a sweep, every `autosave_interval_ms`.
//! It first drains the upload queue, so saved records reference durable
//! URLs wherever possible, then writes a session record if the document is
//! unsaved. A burst of edits made during one save coalesces into one more.
//! Record export happens under the document lock; the store write runs on
//! the blocking pool with no lock held.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::EditorError;
use crate::layers::{SaveState, UploadStatus};
use crate::session::{SessionError, SessionRecord, SessionStore};
use crate::state::EditorState;

use super::upload::process_upload_queue;

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;

async fn store_blocking<T, F>(store: Arc<dyn SessionStore>, op: F) -> Result<T, SessionError>
where
    T: Send + 'static,
    F: FnOnce(&dyn SessionStore) -> Result<T, SessionError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| SessionError::Io(std::io::Error::other(e.to_string())))?
}

/// Write the current document as this asset's session record.
pub async fn save_session(state: &EditorState) -> Result<(), EditorError> {
    let record: SessionRecord = {
        let mut doc = state.doc.write().await;
        doc.layers.mark_saving();
        doc.layers.export_session(&state.asset.id)
    };
    let layer_count = record.front.len() + record.back.len();

    let result = store_blocking(Arc::clone(&state.sessions), move |store| store.save(&record)).await;
    let mut doc = state.doc.write().await;
    match result {
        Ok(()) => {
            doc.layers.mark_saved();
            info!(asset_id = %state.asset.id, layers = layer_count, "persistence: session saved");
            Ok(())
        }
        Err(err) => {
            doc.layers.mark_save_failed();
            Err(err.into())
        }
    }
}

/// Restore this asset's session record, if one exists. Undo history does
/// not survive a restore.
pub async fn load_session(state: &EditorState) -> Result<bool, EditorError> {
    let asset_id = state.asset.id.clone();
    let Some(record) = store_blocking(Arc::clone(&state.sessions), move |store| store.load(&asset_id)).await? else {
        return Ok(false);
    };
    let mut doc = state.doc.write().await;
    doc.layers.import_session(&record)?;
    doc.undo.clear();
    Ok(true)
}

/// Forget this asset's session record.
pub async fn clear_session(state: &EditorState) -> Result<(), EditorError> {
    let asset_id = state.asset.id.clone();
    store_blocking(Arc::clone(&state.sessions), move |store| store.clear(&asset_id)).await?;
    Ok(())
}

/// Spawn the background autosave task. Returns a handle for shutdown.
pub fn spawn_autosave_task(state: EditorState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let changed = state.doc.read().await.layers.change_signal();
        let mut interval = tokio::time::interval(Duration::from_millis(state.config.autosave_interval_ms.max(1)));
        loop {
            tokio::select! {
                () = changed.notified() => debug!("persistence: document changed"),
                _ = interval.tick() => {}
            }
            autosave_once(&state).await;
        }
    })
}

async fn autosave_once(state: &EditorState) {
    let (pending_uploads, save_state) = {
        let doc = state.doc.read().await;
        let pending = doc.layers.cache_entries().iter().any(|e| e.upload_status == UploadStatus::Pending);
        (pending, doc.layers.save_state())
    };
    if pending_uploads {
        process_upload_queue(state).await;
    }
    if save_state == SaveState::Unsaved || pending_uploads {
        if let Err(e) = save_session(state).await {
            error!(error = %e, asset_id = %state.asset.id, "persistence: autosave failed");
        }
    }
}
