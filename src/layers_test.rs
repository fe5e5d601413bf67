use super::*;

fn manager() -> LayerManager {
    LayerManager::new(BlobStore::new(), Notifier::new())
}

fn png(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
    Surface::solid(w, h, rgba).to_png().unwrap()
}

fn add_local(layers: &mut LayerManager, name: &str, bounds: Bounds) -> LayerId {
    layers.create_drawing_layer(png(bounds.width, bounds.height, [0, 0, 0, 255]), name, bounds, LayerType::Drawing).unwrap()
}

fn add_remote(layers: &mut LayerManager, name: &str, url: &str, bounds: Bounds) -> LayerId {
    let side = layers.active_side();
    let (layer, selection) = layers.create_layer(ImageRef::Remote(url.into()), name, bounds, side, LayerType::Decomposed);
    let id = layer.id.clone();
    layers.add_layer(layer, selection).unwrap();
    id
}

fn z_indices(layers: &LayerManager) -> Vec<usize> {
    layers.layers().iter().map(|l| l.z_index).collect()
}

fn names(layers: &LayerManager) -> Vec<String> {
    layers.layers().iter().map(|l| l.name.clone()).collect()
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn z_indices_stay_dense_through_edits() {
    let mut layers = manager();
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    let b = add_local(&mut layers, "B", Bounds::new(0, 0, 4, 4));
    let c = add_local(&mut layers, "C", Bounds::new(0, 0, 4, 4));
    assert_eq!(z_indices(&layers), vec![0, 1, 2]);

    assert!(layers.remove_layer(&b));
    assert_eq!(z_indices(&layers), vec![0, 1]);
    assert_eq!(layers.layer(&c).unwrap().z_index, 1);

    layers.duplicate_layer(&a);
    assert_eq!(z_indices(&layers), vec![0, 1, 2]);
    assert!(layers.move_layer(&c, Direction::Down));
    assert_eq!(z_indices(&layers), vec![0, 1, 2]);
    assert_eq!(layers.index_of(&c), Some(1));
}

#[test]
fn move_layer_stops_at_the_ends() {
    let mut layers = manager();
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    let b = add_local(&mut layers, "B", Bounds::new(0, 0, 4, 4));
    assert!(!layers.move_layer(&a, Direction::Down));
    assert!(!layers.move_layer(&b, Direction::Up));
    assert!(layers.move_layer(&a, Direction::Up));
    assert_eq!(names(&layers), vec!["B", "A"]);
}

#[test]
fn reorder_rejects_out_of_range() {
    let mut layers = manager();
    add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    add_local(&mut layers, "B", Bounds::new(0, 0, 4, 4));
    add_local(&mut layers, "C", Bounds::new(0, 0, 4, 4));
    assert!(!layers.reorder_layer(0, 3));
    assert!(layers.reorder_layer(2, 0));
    assert_eq!(names(&layers), vec!["C", "A", "B"]);
}

#[test]
fn sides_are_independent() {
    let mut layers = manager();
    let front = add_local(&mut layers, "Front", Bounds::new(0, 0, 4, 4));
    layers.set_side(Side::Back);
    assert!(layers.layers().is_empty());
    let back = add_local(&mut layers, "Back", Bounds::new(0, 0, 4, 4));
    assert_eq!(layers.layer(&back).unwrap().side, Side::Back);
    assert_eq!(layers.layer(&front).unwrap().side, Side::Front);
    layers.clear_current_side();
    assert!(layers.layers_on(Side::Back).is_empty());
    assert_eq!(layers.layers_on(Side::Front).len(), 1);
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn malformed_layers_are_rejected() {
    let mut layers = manager();
    let mut notices = layers.notifier.subscribe();
    let (layer, selection) =
        layers.create_layer(ImageRef::Remote(String::new()), "Empty", Bounds::new(0, 0, 1, 1), Side::Front, LayerType::Drawing);
    assert!(layers.add_layer(layer, selection).is_err());
    assert!(layers.layers().is_empty());
    assert!(notices.try_recv().is_ok());

    let id = add_remote(&mut layers, "Photo", "https://cdn.test/a.png", Bounds::new(0, 0, 1, 1));
    let dup = Layer::new(id.clone(), "Again", ImageRef::Remote("https://cdn.test/b.png".into()), Side::Front, Bounds::new(0, 0, 1, 1), LayerType::Drawing);
    let selection = Selection::for_layer(&dup);
    assert!(matches!(layers.add_layer(dup, selection), Err(LayerError::DuplicateId(_))));
}

// =============================================================================
// Hit testing
// =============================================================================

#[test]
fn hit_test_lists_topmost_first() {
    let mut layers = manager();
    let surface = SurfaceSize::new(100, 100);
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 50, 50));
    let b = add_local(&mut layers, "B", Bounds::new(20, 20, 50, 50));

    assert_eq!(layers.layers_at_position(NormalizedPoint::new(0.3, 0.3), surface), vec![b.clone(), a.clone()]);
    assert_eq!(layers.layers_at_position(NormalizedPoint::new(0.1, 0.1), surface), vec![a]);
    assert!(layers.layers_at_position(NormalizedPoint::new(0.9, 0.9), surface).is_empty());
}

#[test]
fn transparent_pixels_do_not_hit_once_alpha_map_is_built() {
    let mut layers = manager();
    let surface = SurfaceSize::new(100, 100);
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 50, 50));
    let b = layers
        .create_drawing_layer(png(50, 50, [0, 0, 0, 0]), "B", Bounds::new(20, 20, 50, 50), LayerType::Drawing)
        .unwrap();
    let point = NormalizedPoint::new(0.3, 0.3);
    assert_eq!(layers.layers_at_position(point, surface), vec![b.clone(), a.clone()]);

    let jobs = layers.take_stale_hit_tests();
    assert_eq!(jobs.len(), 2);
    assert!(!layers.has_stale_hit_tests());
    let job = jobs.iter().find(|j| j.layer_id == b).unwrap();
    let entry = HitTestEntry::from_surface(&Surface::solid(50, 50, [0, 0, 0, 0]));
    assert!(layers.store_hit_test(&b, job.revision, entry));

    assert_eq!(layers.layers_at_position(point, surface), vec![a]);
}

#[test]
fn stale_alpha_map_is_discarded() {
    let mut layers = manager();
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 10, 10));
    let job = layers.take_stale_hit_tests().pop().unwrap();
    layers.update_layer_image(&a, ImageRef::Remote("https://cdn.test/new.png".into()));
    let entry = HitTestEntry::from_surface(&Surface::solid(10, 10, [0, 0, 0, 255]));
    assert!(!layers.store_hit_test(&a, job.revision, entry));
    assert!(layers.hit_test_entry(&a).is_none());
    assert!(layers.has_stale_hit_tests());
}

// =============================================================================
// Duplicate
// =============================================================================

#[test]
fn duplicate_names_stay_flat() {
    let mut layers = manager();
    let a = add_local(&mut layers, "Drawing", Bounds::new(0, 0, 4, 4));
    let first = layers.duplicate_layer(&a).unwrap();
    layers.duplicate_layer(&a).unwrap();
    layers.duplicate_layer(&first).unwrap();

    let mut all = names(&layers);
    all.sort();
    assert_eq!(all, vec!["Drawing", "Drawing (Copy 2)", "Drawing (Copy 3)", "Drawing (Copy)"]);
}

#[test]
fn duplicate_copies_tables_and_sits_above() {
    let mut layers = manager();
    let a = add_local(&mut layers, "Logo", Bounds::new(5, 5, 4, 4));
    add_local(&mut layers, "Top", Bounds::new(0, 0, 4, 4));
    layers.set_opacity(&a, 0.4);
    layers.set_mask(&a, Arc::from(png(4, 4, [255, 255, 255, 255])), Bounds::new(5, 5, 4, 4)).unwrap();

    let copy = layers.duplicate_layer(&a).unwrap();
    assert_eq!(layers.index_of(&copy), Some(1));
    assert!((layers.opacity(&copy) - 0.4).abs() < f32::EPSILON);
    assert_eq!(layers.mask(&copy).unwrap().layer_id, copy);
    assert!(layers.cache_entry(&copy).is_some());
    assert_eq!(layers.selection(&copy).unwrap().variable_name, "layer_logo__copy_");
    assert_eq!(layers.layer(&copy).unwrap().bounds, Bounds::new(5, 5, 4, 4));
}

// =============================================================================
// Blobs
// =============================================================================

#[test]
fn removing_a_layer_releases_its_blob_once() {
    let blobs = BlobStore::new();
    let mut layers = LayerManager::new(blobs.clone(), Notifier::new());
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    assert_eq!(blobs.live_count(), 1);

    assert!(layers.remove_layer(&a));
    assert_eq!(blobs.live_count(), 0);
    assert_eq!(blobs.released_count(), 1);
    assert!(!layers.remove_layer(&a));
    assert_eq!(blobs.released_count(), 1);
}

#[test]
fn reassigning_image_releases_previous_blob() {
    let blobs = BlobStore::new();
    let mut layers = LayerManager::new(blobs.clone(), Notifier::new());
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    layers.replace_layer_raster(&a, png(8, 8, [1, 1, 1, 255]), Bounds::new(0, 0, 8, 8)).unwrap();
    assert_eq!(blobs.live_count(), 1);
    assert_eq!(blobs.released_count(), 1);
    assert_eq!(layers.layer(&a).unwrap().bounds, Bounds::new(0, 0, 8, 8));

    layers.update_layer_image(&a, ImageRef::Remote("https://cdn.test/a.png".into()));
    assert_eq!(blobs.live_count(), 0);
    assert!(layers.cache_entry(&a).is_none());
}

// =============================================================================
// Merge
// =============================================================================

#[test]
fn merge_replaces_sources_at_topmost_position() {
    let mut layers = manager();
    let bottom = add_local(&mut layers, "Bottom", Bounds::new(0, 0, 4, 4));
    let a = add_local(&mut layers, "A", Bounds::new(10, 10, 5, 5));
    let middle = add_local(&mut layers, "Middle", Bounds::new(0, 0, 4, 4));
    let b = add_local(&mut layers, "B", Bounds::new(20, 0, 5, 5));
    let top = add_local(&mut layers, "Top", Bounds::new(0, 0, 4, 4));

    let plan = layers.plan_merge(&[b.clone(), a.clone()]).unwrap();
    assert_eq!(plan.bounds, Bounds::new(10, 0, 15, 15));
    assert_eq!(plan.sources[0].layer_id, a);
    assert_eq!(plan.name, "Merged (2)");

    let merged = layers.commit_merge(&plan, png(15, 15, [0, 0, 0, 255])).unwrap();
    let order: Vec<LayerId> = layers.layers().iter().map(|l| l.id.clone()).collect();
    assert_eq!(order, vec![bottom, middle, merged, top]);
    assert_eq!(z_indices(&layers), vec![0, 1, 2, 3]);
}

#[test]
fn merge_needs_two_distinct_layers() {
    let mut layers = manager();
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    assert!(matches!(layers.plan_merge(&[a.clone(), a]), Err(LayerError::TooFewLayers(1))));
}

#[test]
fn merge_fails_if_a_source_changed() {
    let mut layers = manager();
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    let b = add_local(&mut layers, "B", Bounds::new(0, 0, 4, 4));
    let plan = layers.plan_merge(&[a.clone(), b]).unwrap();
    layers.update_layer_image(&a, ImageRef::Remote("https://cdn.test/x.png".into()));
    assert!(layers.commit_merge(&plan, png(4, 4, [0, 0, 0, 255])).is_err());
    assert_eq!(layers.layers().len(), 2);
}

#[test]
fn merge_fails_if_a_source_moved() {
    let mut layers = manager();
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    let b = add_local(&mut layers, "B", Bounds::new(0, 0, 4, 4));
    let plan = layers.plan_merge(&[a.clone(), b]).unwrap();
    assert!(layers.update_layer_bounds(&a, Bounds::new(30, 30, 4, 4)));
    assert!(layers.commit_merge(&plan, png(4, 4, [0, 0, 0, 255])).is_err());
    assert_eq!(layers.layer(&a).unwrap().bounds, Bounds::new(30, 30, 4, 4));
    assert_eq!(layers.layers().len(), 2);
}

// =============================================================================
// Upload cache
// =============================================================================

#[test]
fn upload_cache_tracks_retries_and_success() {
    let mut layers = manager();
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    assert_eq!(layers.cache_entry(&a).unwrap().upload_status, UploadStatus::Pending);

    for attempt in 1..=3 {
        let batch = layers.begin_uploads(3, 3);
        assert_eq!(batch.len(), 1, "attempt {attempt}");
        let (id, bytes) = &batch[0];
        let outcome = layers.complete_upload(id, bytes, Err("offline".into()));
        assert_eq!(outcome, UploadOutcome::Failed { retry_count: attempt });
    }
    assert!(layers.begin_uploads(3, 3).is_empty());
    assert_eq!(layers.cache_entry(&a).unwrap().retry_count, 3);

    assert_eq!(layers.reset_failed_uploads(), 1);
    let batch = layers.begin_uploads(3, 3);
    let (id, bytes) = &batch[0];
    let outcome = layers.complete_upload(id, bytes, Ok("https://cdn.test/a.png".into()));
    assert_eq!(outcome, UploadOutcome::Uploaded("https://cdn.test/a.png".into()));
    assert!(layers.cache_entry(&a).is_none());

    let layer = layers.layer(&a).unwrap();
    assert!(matches!(&layer.image, ImageRef::Remote(url) if url == "https://cdn.test/a.png"));
    assert!(layer.cached_binary.is_some());
    assert_eq!(layers.selection(&a).unwrap().layer_image_ref, "https://cdn.test/a.png");
}

#[test]
fn upload_of_replaced_binary_is_superseded() {
    let mut layers = manager();
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    let (_, old) = layers.begin_uploads(1, 3).pop().unwrap();
    layers.replace_layer_raster(&a, png(4, 4, [9, 9, 9, 255]), Bounds::new(0, 0, 4, 4)).unwrap();

    let outcome = layers.complete_upload(&a, &old, Ok("https://cdn.test/stale.png".into()));
    assert_eq!(outcome, UploadOutcome::Superseded);
    assert!(layers.layer(&a).unwrap().image.is_local());
    assert_eq!(layers.cache_entry(&a).unwrap().upload_status, UploadStatus::Pending);
}

// =============================================================================
// Masks and background
// =============================================================================

#[test]
fn invalid_mask_is_rejected() {
    let mut layers = manager();
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    let garbage: Arc<[u8]> = Arc::from(b"nope".to_vec());
    assert!(matches!(layers.set_mask(&a, garbage, Bounds::new(0, 0, 4, 4)), Err(LayerError::InvalidMask(_))));
    let valid: Arc<[u8]> = Arc::from(png(4, 4, [0, 0, 0, 0]));
    assert!(layers.set_mask(&a, Arc::clone(&valid), Bounds::new(0, 0, 0, 4)).is_err());
    assert!(layers.set_mask(&a, valid, Bounds::new(0, 0, 4, 4)).is_ok());
    assert!(layers.clear_mask(&a));
    assert!(!layers.clear_mask(&a));
}

#[test]
fn background_sits_at_bottom_and_spans_surface() {
    let mut layers = manager();
    let surface = SurfaceSize::new(100, 60);
    add_local(&mut layers, "Logo", Bounds::new(0, 0, 4, 4));
    let bg = layers.create_background_layer(ImageRef::Remote("https://cdn.test/bg.png".into()), surface).unwrap();

    assert_eq!(bg, "background-front");
    let layer = layers.layer(&bg).unwrap();
    assert_eq!(layer.z_index, 0);
    assert_eq!(layer.bounds, Bounds::new(0, 0, 100, 60));
    assert!(!layers.selection(&bg).unwrap().included);
    assert!(!layers.ensure_background_layer(ImageRef::Remote("https://cdn.test/bg2.png".into()), surface).unwrap());
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn snapshot_round_trip_restores_removed_layer() {
    let mut layers = manager();
    add_local(&mut layers, "Bottom", Bounds::new(0, 0, 4, 4));
    let a = add_local(&mut layers, "A", Bounds::new(3, 3, 4, 4));
    add_local(&mut layers, "Top", Bounds::new(0, 0, 4, 4));
    let snapshot = layers.snapshot(&a).unwrap();

    layers.remove_layer(&a);
    assert!(layers.recreate_from_snapshot(&snapshot));
    let restored = layers.layer(&a).unwrap();
    assert_eq!(restored.z_index, 1);
    assert_eq!(restored.bounds, Bounds::new(3, 3, 4, 4));
    assert!(restored.image.is_local());
    assert!(!layers.recreate_from_snapshot(&snapshot));
}

// =============================================================================
// Session records
// =============================================================================

#[test]
fn session_round_trip_keeps_live_blobs() {
    let mut layers = manager();
    let a = add_local(&mut layers, "A", Bounds::new(1, 2, 4, 4));
    let r = add_remote(&mut layers, "Remote", "https://cdn.test/r.png", Bounds::new(0, 0, 10, 10));
    layers.set_opacity(&r, 0.5);
    layers.set_side(Side::Back);
    add_remote(&mut layers, "Back", "https://cdn.test/back.png", Bounds::new(0, 0, 10, 10));
    let record = layers.export_session("asset-1");

    let placeholders = layers.import_session(&record).unwrap();
    assert_eq!(placeholders, 0);
    assert_eq!(layers.active_side(), Side::Back);
    assert_eq!(layers.save_state(), SaveState::Saved);
    assert_eq!(layers.layers_on(Side::Front).len(), 2);
    assert_eq!(layers.layers_on(Side::Back).len(), 1);
    assert!(layers.layer(&a).unwrap().image.is_local());
    assert!(layers.cache_entry(&a).is_some());
    assert!((layers.opacity(&r) - 0.5).abs() < f32::EPSILON);
    assert_eq!(layers.blobs().live_count(), 1);
}

#[test]
fn session_with_dead_blob_uses_placeholder() {
    let mut source = manager();
    add_local(&mut source, "Gone", Bounds::new(0, 0, 4, 4));
    add_remote(&mut source, "Kept", "https://cdn.test/k.png", Bounds::new(0, 0, 4, 4));
    let record = source.export_session("asset-1");

    let mut layers = manager();
    let mut notices = layers.notifier.subscribe();
    assert_eq!(layers.import_session(&record).unwrap(), 1);

    let gone = &layers.layers()[0];
    assert_eq!(gone.name, "Gone");
    let pixels = Surface::from_bytes(gone.image.local_bytes().unwrap()).unwrap();
    assert_eq!((pixels.width(), pixels.height()), (1, 1));
    assert_eq!(pixels.pixel(0, 0).map(|p| p.0), Some(PLACEHOLDER_RGBA));
    assert!(layers.cache_entry(&gone.id).is_none());
    assert!(notices.try_recv().is_ok());
}

#[test]
fn save_state_follows_edits() {
    let mut layers = manager();
    assert_eq!(layers.save_state(), SaveState::Saved);
    let a = add_local(&mut layers, "A", Bounds::new(0, 0, 4, 4));
    assert_eq!(layers.save_state(), SaveState::Unsaved);
    layers.mark_saving();
    layers.rename_layer(&a, "Renamed");
    layers.mark_saved();
    assert_eq!(layers.save_state(), SaveState::Unsaved);
    layers.mark_saving();
    layers.mark_saved();
    assert_eq!(layers.save_state(), SaveState::Saved);
}

#[test]
fn variable_names_are_sanitized() {
    assert_eq!(variable_name_for("First Name"), "layer_first_name");
    assert_eq!(variable_name_for("QR-2"), "layer_qr_2");
}
