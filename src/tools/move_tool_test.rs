use super::*;
use crate::blob::BlobStore;
use crate::geometry::SurfaceSize;
use crate::layers::{ImageRef, LayerManager, LayerType};
use crate::notify::Notifier;
use crate::raster::Surface;
use crate::tools::ToolOptions;

fn pt(x: f64, y: f64) -> NormalizedPoint {
    NormalizedPoint::new(x, y)
}

fn manager_with_layer() -> (LayerManager, LayerId) {
    let mut layers = LayerManager::new(BlobStore::new(), Notifier::new());
    let png = Surface::solid(20, 20, [0, 0, 255, 255]).to_png().unwrap();
    let id = layers.create_drawing_layer(png, "Logo", Bounds::new(10, 10, 20, 20), LayerType::Drawing).unwrap();
    (layers, id)
}

#[test]
fn drag_emits_live_moves_then_commit() {
    let (layers, id) = manager_with_layer();
    let options = ToolOptions::default();
    let ctx = ToolContext { layers: &layers, surface: SurfaceSize::new(100, 100), selected_layer: Some(&id), options: &options };
    let mut tool = MoveTool::default();

    assert!(tool.pointer_down(&ctx, pt(0.2, 0.2)).is_empty());
    assert!(tool.is_dragging());

    let moved = tool.pointer_move(&ctx, pt(0.25, 0.3));
    assert_eq!(moved, vec![Action::MoveLayer { layer_id: id.clone(), bounds: Bounds::new(15, 20, 20, 20) }]);
    assert_eq!(tool.overlay(), Overlay::Outline(Bounds::new(15, 20, 20, 20)));

    let committed = tool.pointer_up(&ctx);
    assert_eq!(
        committed,
        vec![Action::CommitMove { layer_id: id, from: Bounds::new(10, 10, 20, 20), to: Bounds::new(15, 20, 20, 20) }]
    );
    assert!(!tool.is_dragging());
}

#[test]
fn release_in_place_commits_nothing() {
    let (layers, id) = manager_with_layer();
    let options = ToolOptions::default();
    let ctx = ToolContext { layers: &layers, surface: SurfaceSize::new(100, 100), selected_layer: Some(&id), options: &options };
    let mut tool = MoveTool::default();

    tool.pointer_down(&ctx, pt(0.2, 0.2));
    assert!(tool.pointer_move(&ctx, pt(0.2, 0.2)).is_empty());
    assert!(tool.pointer_up(&ctx).is_empty());
}

#[test]
fn nothing_selected_does_not_drag() {
    let (layers, _) = manager_with_layer();
    let options = ToolOptions::default();
    let ctx = ToolContext { layers: &layers, surface: SurfaceSize::new(100, 100), selected_layer: None, options: &options };
    let mut tool = MoveTool::default();

    tool.pointer_down(&ctx, pt(0.2, 0.2));
    assert!(!tool.is_dragging());
    assert!(tool.pointer_move(&ctx, pt(0.5, 0.5)).is_empty());
}

#[test]
fn background_layer_is_pinned() {
    let mut layers = LayerManager::new(BlobStore::new(), Notifier::new());
    let surface = SurfaceSize::new(100, 100);
    let id = layers.create_background_layer(ImageRef::Remote("https://cdn.test/bg.png".into()), surface).unwrap();
    let options = ToolOptions::default();
    let ctx = ToolContext { layers: &layers, surface, selected_layer: Some(&id), options: &options };
    let mut tool = MoveTool::default();

    tool.pointer_down(&ctx, pt(0.5, 0.5));
    assert!(!tool.is_dragging());
}

#[test]
fn reset_abandons_drag() {
    let (layers, id) = manager_with_layer();
    let options = ToolOptions::default();
    let ctx = ToolContext { layers: &layers, surface: SurfaceSize::new(100, 100), selected_layer: Some(&id), options: &options };
    let mut tool = MoveTool::default();

    tool.pointer_down(&ctx, pt(0.2, 0.2));
    tool.pointer_move(&ctx, pt(0.4, 0.4));
    tool.reset();
    assert!(tool.pointer_up(&ctx).is_empty());
    assert_eq!(tool.overlay(), Overlay::None);
}
