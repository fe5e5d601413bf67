use super::*;

#[test]
fn union_covers_both_rectangles() {
    let a = Bounds::new(0, 0, 100, 100);
    let b = Bounds::new(50, 50, 100, 100);
    assert_eq!(a.union(&b), Bounds::new(0, 0, 150, 150));
}

#[test]
fn union_handles_negative_origin() {
    let a = Bounds::new(10, 10, 20, 20);
    let b = Bounds::new(-5, 15, 10, 10);
    assert_eq!(a.union(&b), Bounds::new(-5, 10, 35, 20));
}

#[test]
fn intersect_of_disjoint_is_none() {
    let a = Bounds::new(0, 0, 10, 10);
    let b = Bounds::new(10, 0, 10, 10);
    assert_eq!(a.intersect(&b), None);
    assert_eq!(a.intersect(&Bounds::new(5, 5, 10, 10)), Some(Bounds::new(5, 5, 5, 5)));
}

#[test]
fn contains_is_half_open() {
    let b = Bounds::new(50, 50, 100, 100);
    assert!(b.contains(Point::new(50.0, 50.0)));
    assert!(b.contains(Point::new(149.9, 149.9)));
    assert!(!b.contains(Point::new(150.0, 60.0)));
    assert!(!b.contains(Point::new(49.9, 60.0)));
}

#[test]
fn union_all_of_empty_is_none() {
    let empty: [Bounds; 0] = [];
    assert_eq!(Bounds::union_all(&empty), None);
    let items = [Bounds::new(0, 0, 1, 1), Bounds::new(4, 4, 1, 1)];
    assert_eq!(Bounds::union_all(&items), Some(Bounds::new(0, 0, 5, 5)));
}

#[test]
fn normalized_points_map_to_pixel_bounds() {
    let surface = SurfaceSize::new(200, 100);
    let pts = [NormalizedPoint::new(0.1, 0.2), NormalizedPoint::new(0.5, 0.8), NormalizedPoint::new(0.3, 0.5)];
    assert_eq!(Bounds::from_normalized_points(&pts, surface), Some(Bounds::new(20, 20, 80, 60)));
    assert_eq!(Bounds::from_normalized_points(&[], surface), None);
}

#[test]
fn diagonal_of_3_4_surface() {
    assert!((SurfaceSize::new(300, 400).diagonal() - 500.0).abs() < 1e-9);
}

#[test]
fn ray_cast_polygon() {
    let square = [Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(10.0, 10.0), Point::new(0.0, 10.0)];
    assert!(point_in_polygon(Point::new(5.0, 5.0), &square));
    assert!(!point_in_polygon(Point::new(15.0, 5.0), &square));
    assert!(!point_in_polygon(Point::new(5.0, 5.0), &square[..2]));
}
