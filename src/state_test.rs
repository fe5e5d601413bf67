use super::*;
use super::test_helpers::{MockRemote, test_state};

#[tokio::test]
async fn merge_queue_is_shared_per_layer() {
    let state = test_state(Arc::new(MockRemote::new()));
    let a1 = state.merge_queue("a");
    let a2 = state.merge_queue("a");
    let b = state.merge_queue("b");
    assert!(Arc::ptr_eq(&a1, &a2));
    assert!(!Arc::ptr_eq(&a1, &b));
}

#[tokio::test]
async fn idle_merge_queues_are_pruned() {
    let state = test_state(Arc::new(MockRemote::new()));
    drop(state.merge_queue("a"));
    let _b = state.merge_queue("b");
    let queues = state.merge_queues.lock().unwrap();
    assert!(!queues.contains_key("a"));
    assert!(queues.contains_key("b"));
}

#[test]
fn busy_guard_admits_one_holder() {
    let state = test_state(Arc::new(MockRemote::new()));
    let guard = state.try_begin_processing();
    assert!(guard.is_some());
    assert!(state.is_processing());
    assert!(state.try_begin_processing().is_none());
    drop(guard);
    assert!(!state.is_processing());
    assert!(state.try_begin_processing().is_some());
}

#[test]
fn upload_and_processing_flags_are_independent() {
    let state = test_state(Arc::new(MockRemote::new()));
    let _processing = state.try_begin_processing();
    let upload = state.try_begin_upload_drain();
    assert!(upload.is_some());
    assert!(state.is_uploading());
}

#[tokio::test]
async fn new_state_uses_configured_undo_capacity() {
    let state = test_state(Arc::new(MockRemote::new()));
    let doc = state.doc.read().await;
    assert_eq!(doc.undo.capacity(), state.config.undo_capacity);
    assert!(doc.layers.layers().is_empty());
}
