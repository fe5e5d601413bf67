use super::*;
use std::sync::atomic::Ordering;

use crate::geometry::Bounds;
use crate::session::{LayerRecord, MemorySessionStore};
use crate::config::EditorConfig;
use crate::state::test_helpers::{
    MockRemote, seed_local_layer, seed_remote_layer, test_asset, test_config, test_state, test_state_with_config,
};

/// Store whose writes always fail.
struct BrokenStore;

impl SessionStore for BrokenStore {
    fn save(&self, _record: &SessionRecord) -> Result<(), SessionError> {
        Err(SessionError::Io(std::io::Error::other("disk full")))
    }

    fn load(&self, _asset_id: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(None)
    }

    fn clear(&self, _asset_id: &str) -> Result<(), SessionError> {
        Ok(())
    }
}

#[tokio::test]
async fn save_then_load_restores_layers() {
    let remote = Arc::new(MockRemote::new());
    let state = test_state(Arc::clone(&remote));
    let photo =
        seed_remote_layer(&state, &remote, "Photo", "https://cdn.test/p.png", Bounds::new(0, 0, 10, 10), [1, 1, 1, 255]).await;
    seed_local_layer(&state, "Sketch", Bounds::new(5, 5, 10, 10), [2, 2, 2, 255]).await;

    save_session(&state).await.unwrap();
    assert_eq!(state.doc.read().await.layers.save_state(), SaveState::Saved);

    state.doc.write().await.layers.clear_current_side();
    assert!(load_session(&state).await.unwrap());

    let doc = state.doc.read().await;
    let names: Vec<&str> = doc.layers.layers().iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["Photo", "Sketch"]);
    assert_eq!(doc.layers.layer(&photo).unwrap().bounds, Bounds::new(0, 0, 10, 10));
    assert_eq!(doc.undo.undo_len(), 0);
}

#[tokio::test]
async fn load_without_record_is_false() {
    let state = test_state(Arc::new(MockRemote::new()));
    assert!(!load_session(&state).await.unwrap());
}

#[tokio::test]
async fn load_replaces_dead_local_images_with_placeholder() {
    let sessions = Arc::new(MemorySessionStore::new());
    let record = SessionRecord {
        asset_id: "asset-1".into(),
        front: vec![LayerRecord {
            id: "l1".into(),
            name: "Stale".into(),
            image_ref: "blob:999".into(),
            z_index: 0,
            side: crate::layers::Side::Front,
            bounds: Bounds::new(0, 0, 10, 10),
            layer_type: crate::layers::LayerType::Drawing,
            paired_element_id: None,
        }],
        back: Vec::new(),
        selections: Vec::new(),
        opacity: std::collections::BTreeMap::new(),
        masks: Vec::new(),
        active_side: crate::layers::Side::Front,
        show_original: false,
        saved_at: time::OffsetDateTime::UNIX_EPOCH,
    };
    sessions.save(&record).unwrap();
    let state = EditorState::new(test_config(), Arc::new(MockRemote::new()), sessions, test_asset());
    let mut notices = state.notifier.subscribe();

    assert!(load_session(&state).await.unwrap());
    let doc = state.doc.read().await;
    let layer = doc.layers.layer("l1").unwrap();
    assert!(layer.image.is_local());
    assert!(doc.layers.cache_entry("l1").is_none());
    assert!(notices.try_recv().is_ok());
}

#[tokio::test]
async fn failed_save_leaves_document_unsaved() {
    let state = EditorState::new(test_config(), Arc::new(MockRemote::new()), Arc::new(BrokenStore), test_asset());
    seed_local_layer(&state, "A", Bounds::new(0, 0, 4, 4), [1, 1, 1, 255]).await;

    assert!(matches!(save_session(&state).await, Err(EditorError::Session(_))));
    assert_eq!(state.doc.read().await.layers.save_state(), SaveState::Unsaved);
}

#[tokio::test]
async fn clear_forgets_the_record() {
    let state = test_state(Arc::new(MockRemote::new()));
    seed_local_layer(&state, "A", Bounds::new(0, 0, 4, 4), [1, 1, 1, 255]).await;
    save_session(&state).await.unwrap();
    clear_session(&state).await.unwrap();
    assert!(!load_session(&state).await.unwrap());
}

#[tokio::test]
async fn autosave_uploads_then_saves_durable_urls() {
    let remote = Arc::new(MockRemote::new());
    let state = test_state(Arc::clone(&remote));
    let id = seed_local_layer(&state, "A", Bounds::new(0, 0, 4, 4), [1, 1, 1, 255]).await;

    let task = spawn_autosave_task(state.clone());
    let mut saved = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(record) = state.sessions.load("asset-1").unwrap() {
            if record.front.iter().any(|l| l.image_ref.starts_with("https://")) {
                saved = Some(record);
                break;
            }
        }
    }
    task.abort();

    let record = saved.unwrap();
    assert_eq!(record.front[0].id, id);
    assert_eq!(record.front[0].image_ref, "https://cdn.test/upload-1.png");
    assert_eq!(remote.upload_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn autosave_follows_edits_without_waiting_for_the_sweep() {
    let remote = Arc::new(MockRemote::new());
    let config = EditorConfig { autosave_interval_ms: 60_000, ..test_config() };
    let state = test_state_with_config(Arc::clone(&remote), config);

    let task = spawn_autosave_task(state.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(state.sessions.load("asset-1").unwrap().is_none());

    let id =
        seed_remote_layer(&state, &remote, "Photo", "https://cdn.test/p.png", Bounds::new(0, 0, 10, 10), [1, 1, 1, 255]).await;
    let mut saved = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(record) = state.sessions.load("asset-1").unwrap() {
            saved = Some(record);
            break;
        }
    }
    assert!(state.doc.write().await.layers.rename_layer(&id, "Renamed"));
    let mut renamed = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if state.sessions.load("asset-1").unwrap().is_some_and(|r| r.front.iter().any(|l| l.name == "Renamed")) {
            renamed = true;
            break;
        }
    }
    task.abort();

    assert_eq!(saved.unwrap().front[0].id, id);
    assert!(renamed);
}
