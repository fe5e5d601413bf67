use super::*;
use crate::blob::BlobStore;
use crate::geometry::SurfaceSize;
use crate::layers::LayerManager;
use crate::notify::Notifier;
use crate::tools::ToolOptions;

fn pt(x: f64, y: f64) -> NormalizedPoint {
    NormalizedPoint::new(x, y)
}

fn manager_with_layer() -> (LayerManager, LayerId) {
    let mut layers = LayerManager::new(BlobStore::new(), Notifier::new());
    let png = Surface::solid(10, 10, [0, 255, 0, 255]).to_png().unwrap();
    let id = layers.create_drawing_layer(png, "Base", Bounds::new(0, 0, 10, 10), LayerType::Drawing).unwrap();
    (layers, id)
}

fn ctx<'a>(layers: &'a LayerManager, selected: Option<&'a str>, options: &'a ToolOptions) -> ToolContext<'a> {
    ToolContext { layers, surface: SurfaceSize::new(100, 100), selected_layer: selected, options }
}

#[test]
fn brush_without_selection_creates_drawing_layer() {
    let layers = LayerManager::new(BlobStore::new(), Notifier::new());
    let options = ToolOptions { size: 10.0, ..ToolOptions::default() };
    let ctx = ctx(&layers, None, &options);
    let mut brush = StrokeTool::brush();

    brush.pointer_down(&ctx, pt(0.5, 0.5));
    assert!(brush.is_drawing());
    brush.pointer_move(&ctx, pt(0.6, 0.5));
    let actions = brush.pointer_up(&ctx, pt(0.6, 0.5));
    assert!(!brush.is_drawing());

    let [Action::CreateLayer { name, bounds, layer_type, history_action, bytes }] = actions.as_slice() else {
        panic!("expected one CreateLayer, got {actions:?}");
    };
    assert_eq!(name, "Drawing");
    assert_eq!(*layer_type, LayerType::Drawing);
    assert_eq!(*history_action, "draw");
    // Extent 50..60 x 50..50, padded by ceil(5) + 2.
    assert_eq!(*bounds, Bounds::new(43, 43, 24, 14));

    let stroke = Surface::from_bytes(bytes).unwrap();
    assert_eq!((stroke.width(), stroke.height()), (24, 14));
    assert_eq!(stroke.pixel(7, 7).map(|p| p.0[3]), Some(255));
    assert_eq!(stroke.pixel(0, 0).map(|p| p.0[3]), Some(0));
}

#[test]
fn brush_with_selection_merges_into_layer() {
    let (layers, id) = manager_with_layer();
    let options = ToolOptions::default();
    let ctx = ctx(&layers, Some(&id), &options);
    let mut brush = StrokeTool::brush();

    brush.pointer_down(&ctx, pt(0.05, 0.05));
    let actions = brush.pointer_up(&ctx, pt(0.05, 0.05));

    let [Action::MergeStroke { layer_id, mode, blur, .. }] = actions.as_slice() else {
        panic!("expected one MergeStroke, got {actions:?}");
    };
    assert_eq!(layer_id, &id);
    assert_eq!(*mode, CompositeMode::SourceOver);
    assert!(blur.abs() < f32::EPSILON);
}

#[test]
fn stroke_bounds_are_clipped_to_surface() {
    let layers = LayerManager::new(BlobStore::new(), Notifier::new());
    let options = ToolOptions { size: 20.0, ..ToolOptions::default() };
    let ctx = ctx(&layers, None, &options);
    let mut brush = StrokeTool::brush();

    brush.pointer_down(&ctx, pt(0.0, 0.0));
    let actions = brush.pointer_up(&ctx, pt(0.0, 0.0));
    let [Action::CreateLayer { bounds, .. }] = actions.as_slice() else {
        panic!("expected one CreateLayer, got {actions:?}");
    };
    assert_eq!(*bounds, Bounds::new(0, 0, 12, 12));
}

#[test]
fn eraser_without_selection_warns() {
    let layers = LayerManager::new(BlobStore::new(), Notifier::new());
    let options = ToolOptions::default();
    let ctx = ctx(&layers, None, &options);
    let mut eraser = StrokeTool::eraser();

    let actions = eraser.pointer_down(&ctx, pt(0.5, 0.5));
    assert_eq!(actions, vec![Action::Warn("Please select a layer to erase".into())]);
    assert!(!eraser.is_drawing());
    assert!(eraser.pointer_up(&ctx, pt(0.5, 0.5)).is_empty());
}

#[test]
fn eraser_emits_destination_out_with_soft_edge() {
    let (layers, id) = manager_with_layer();
    let options = ToolOptions { size: 20.0, hardness: 50.0, ..ToolOptions::default() };
    let ctx = ctx(&layers, Some(&id), &options);
    let mut eraser = StrokeTool::eraser();

    eraser.pointer_down(&ctx, pt(0.05, 0.05));
    let actions = eraser.pointer_up(&ctx, pt(0.05, 0.05));
    let [Action::MergeStroke { layer_id, mode, blur, .. }] = actions.as_slice() else {
        panic!("expected one MergeStroke, got {actions:?}");
    };
    assert_eq!(layer_id, &id);
    assert_eq!(*mode, CompositeMode::DestinationOut);
    assert!((blur - 2.5).abs() < f32::EPSILON);
}

#[test]
fn reset_drops_stroke() {
    let layers = LayerManager::new(BlobStore::new(), Notifier::new());
    let options = ToolOptions::default();
    let ctx = ctx(&layers, None, &options);
    let mut brush = StrokeTool::brush();

    brush.pointer_down(&ctx, pt(0.5, 0.5));
    brush.reset();
    assert!(!brush.is_drawing());
    assert!(brush.pointer_up(&ctx, pt(0.5, 0.5)).is_empty());
}
