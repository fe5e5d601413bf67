use super::*;
use crate::state::test_helpers::{MockRemote, png, seed_local_layer, seed_remote_layer, test_state};

async fn pixels_of(state: &EditorState, id: &str) -> Surface {
    let source = state.doc.read().await.layers.layer(id).unwrap().source();
    load_image_source(state.remote.as_ref(), &source).await.unwrap()
}

fn stroke(rgba: [u8; 4]) -> Arc<[u8]> {
    Arc::from(png(10, 10, rgba))
}

#[tokio::test]
async fn load_image_source_fetches_remote_urls() {
    let remote = Arc::new(MockRemote::new());
    remote.add_image("https://cdn.test/a.png", png(3, 2, [1, 2, 3, 255]));
    let surface = load_image_source(remote.as_ref(), &ImageSource::Remote("https://cdn.test/a.png".into())).await.unwrap();
    assert_eq!((surface.width(), surface.height()), (3, 2));

    let missing = load_image_source(remote.as_ref(), &ImageSource::Remote("https://cdn.test/none.png".into())).await;
    assert!(matches!(missing, Err(EditorError::Remote(_))));
}

// =============================================================================
// Stroke merge
// =============================================================================

#[tokio::test]
async fn concurrent_merges_into_one_layer_apply_in_order() {
    let state = test_state(Arc::new(MockRemote::new()));
    let id = seed_local_layer(&state, "Base", Bounds::new(0, 0, 10, 10), [255, 0, 0, 255]).await;

    let (first, second) = tokio::join!(
        merge_drawing_to_layer(&state, &id, stroke([0, 0, 255, 255]), Bounds::new(10, 0, 10, 10), CompositeMode::SourceOver, 0.0),
        merge_drawing_to_layer(&state, &id, stroke([0, 255, 0, 255]), Bounds::new(20, 0, 10, 10), CompositeMode::SourceOver, 0.0),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(state.doc.read().await.layers.layer(&id).unwrap().bounds, Bounds::new(0, 0, 30, 10));
    let pixels = pixels_of(&state, &id).await;
    assert_eq!(pixels.pixel(5, 5).map(|p| p.0), Some([255, 0, 0, 255]));
    assert_eq!(pixels.pixel(15, 5).map(|p| p.0), Some([0, 0, 255, 255]));
    assert_eq!(pixels.pixel(25, 5).map(|p| p.0), Some([0, 255, 0, 255]));
    assert_eq!(state.doc.read().await.undo.undo_len(), 2);
}

#[tokio::test]
async fn erase_keeps_bounds_and_clears_alpha() {
    let state = test_state(Arc::new(MockRemote::new()));
    let id = seed_local_layer(&state, "Base", Bounds::new(0, 0, 20, 20), [255, 0, 0, 255]).await;

    merge_drawing_to_layer(&state, &id, stroke([0, 0, 0, 255]), Bounds::new(15, 15, 10, 10), CompositeMode::DestinationOut, 0.0)
        .await
        .unwrap();

    assert_eq!(state.doc.read().await.layers.layer(&id).unwrap().bounds, Bounds::new(0, 0, 20, 20));
    let pixels = pixels_of(&state, &id).await;
    assert_eq!(pixels.pixel(17, 17).map(|p| p.0[3]), Some(0));
    assert_eq!(pixels.pixel(5, 5).map(|p| p.0[3]), Some(255));
}

#[tokio::test]
async fn merge_into_remote_layer_goes_local() {
    let remote = Arc::new(MockRemote::new());
    let state = test_state(Arc::clone(&remote));
    let id = seed_remote_layer(&state, &remote, "Photo", "https://cdn.test/p.png", Bounds::new(0, 0, 10, 10), [9, 9, 9, 255]).await;

    merge_drawing_to_layer(&state, &id, stroke([0, 0, 255, 255]), Bounds::new(0, 0, 10, 10), CompositeMode::SourceOver, 0.0)
        .await
        .unwrap();

    let doc = state.doc.read().await;
    assert!(doc.layers.layer(&id).unwrap().image.is_local());
    assert!(doc.layers.cache_entry(&id).is_some());
}

#[tokio::test]
async fn layer_moved_during_stroke_merge_keeps_new_position() {
    let remote = Arc::new(MockRemote::new());
    let state = test_state(Arc::clone(&remote));
    let id = seed_remote_layer(&state, &remote, "Photo", "https://cdn.test/p.png", Bounds::new(0, 0, 10, 10), [9, 9, 9, 255]).await;
    let gate = remote.hold_next_fetch();

    let merge = tokio::spawn({
        let (state, id) = (state.clone(), id.clone());
        async move {
            let stroke = Arc::from(png(5, 5, [0, 0, 255, 255]));
            merge_drawing_to_layer(&state, &id, stroke, Bounds::new(20, 20, 5, 5), CompositeMode::SourceOver, 0.0).await
        }
    });
    gate.started.notified().await;
    assert!(state.doc.write().await.layers.update_layer_bounds(&id, Bounds::new(20, 20, 10, 10)));
    gate.release.notify_one();
    merge.await.unwrap().unwrap();

    assert_eq!(state.doc.read().await.layers.layer(&id).unwrap().bounds, Bounds::new(20, 20, 10, 10));
    let pixels = pixels_of(&state, &id).await;
    assert_eq!(pixels.pixel(2, 2).map(|p| p.0), Some([0, 0, 255, 255]));
    assert_eq!(pixels.pixel(7, 7).map(|p| p.0), Some([9, 9, 9, 255]));
}

#[tokio::test]
async fn merge_into_missing_layer_fails() {
    let state = test_state(Arc::new(MockRemote::new()));
    let result =
        merge_drawing_to_layer(&state, "gone", stroke([0, 0, 0, 255]), Bounds::new(0, 0, 10, 10), CompositeMode::SourceOver, 0.0)
            .await;
    assert!(matches!(result, Err(EditorError::Layer(LayerError::NotFound(_)))));
}

#[tokio::test]
async fn undoing_a_merge_restores_previous_raster() {
    let state = test_state(Arc::new(MockRemote::new()));
    let id = seed_local_layer(&state, "Base", Bounds::new(0, 0, 10, 10), [255, 0, 0, 255]).await;
    merge_drawing_to_layer(&state, &id, stroke([0, 0, 255, 255]), Bounds::new(5, 0, 10, 10), CompositeMode::SourceOver, 0.0)
        .await
        .unwrap();

    {
        let mut guard = state.doc.write().await;
        let doc = &mut *guard;
        assert!(doc.undo.undo(&mut doc.layers));
        assert_eq!(doc.layers.layer(&id).unwrap().bounds, Bounds::new(0, 0, 10, 10));
    }
    let pixels = pixels_of(&state, &id).await;
    assert_eq!(pixels.width(), 10);
    assert_eq!(pixels.pixel(9, 0).map(|p| p.0), Some([255, 0, 0, 255]));
}

// =============================================================================
// Layer merge
// =============================================================================

#[tokio::test]
async fn merge_layers_composites_in_z_order() {
    let state = test_state(Arc::new(MockRemote::new()));
    let bottom = seed_local_layer(&state, "Bottom", Bounds::new(0, 0, 10, 10), [255, 0, 0, 255]).await;
    let top = seed_local_layer(&state, "Top", Bounds::new(5, 5, 10, 10), [0, 0, 255, 255]).await;

    let merged = merge_layers(&state, &[top.clone(), bottom.clone()]).await.unwrap();

    {
        let doc = state.doc.read().await;
        assert_eq!(doc.layers.layers().len(), 1);
        let layer = doc.layers.layer(&merged).unwrap();
        assert_eq!(layer.bounds, Bounds::new(0, 0, 15, 15));
        assert_eq!(layer.name, "Merged (2)");
    }
    let pixels = pixels_of(&state, &merged).await;
    assert_eq!(pixels.pixel(2, 2).map(|p| p.0), Some([255, 0, 0, 255]));
    assert_eq!(pixels.pixel(7, 7).map(|p| p.0), Some([0, 0, 255, 255]));
    assert_eq!(pixels.pixel(12, 2).map(|p| p.0[3]), Some(0));
}

// =============================================================================
// Hit-test cache
// =============================================================================

#[tokio::test]
async fn rebuild_stores_alpha_maps_for_loadable_layers() {
    let remote = Arc::new(MockRemote::new());
    let state = test_state(Arc::clone(&remote));
    let local = seed_local_layer(&state, "Local", Bounds::new(0, 0, 4, 4), [0, 0, 0, 255]).await;
    let remote_id =
        seed_remote_layer(&state, &remote, "Remote", "https://cdn.test/r.png", Bounds::new(0, 0, 4, 4), [0, 0, 0, 255]).await;
    let broken = {
        let mut doc = state.doc.write().await;
        let side = doc.layers.active_side();
        let (layer, selection) = doc.layers.create_layer(
            crate::layers::ImageRef::Remote("https://cdn.test/missing.png".into()),
            "Broken",
            Bounds::new(0, 0, 4, 4),
            side,
            crate::layers::LayerType::Decomposed,
        );
        let id = layer.id.clone();
        doc.layers.add_layer(layer, selection).unwrap();
        id
    };

    assert_eq!(rebuild_stale_hit_tests(&state).await, 2);
    let doc = state.doc.read().await;
    assert!(doc.layers.hit_test_entry(&local).is_some());
    assert!(doc.layers.hit_test_entry(&remote_id).is_some());
    assert!(doc.layers.hit_test_entry(&broken).is_none());
    assert!(!doc.layers.has_stale_hit_tests());
}

#[tokio::test]
async fn hit_test_task_picks_up_new_layers() {
    let state = test_state(Arc::new(MockRemote::new()));
    let task = spawn_hit_test_task(state.clone());
    let id = seed_local_layer(&state, "Late", Bounds::new(0, 0, 4, 4), [0, 0, 0, 255]).await;

    let mut built = false;
    for _ in 0..100 {
        if state.doc.read().await.layers.hit_test_entry(&id).is_some() {
            built = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    task.abort();
    assert!(built);
}
