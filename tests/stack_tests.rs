use ndarray::Array2;
use stackreg::stack::{init, SliceSet, Stack};
use stackreg::Transform2D;

fn gradient(w: usize, h: usize) -> Array2<f64> {
    Array2::from_shape_fn((h, w), |(y, x)| (x + 3 * y) as f64)
}

fn named(images: Vec<(&str, Array2<f64>)>) -> SliceSet {
    SliceSet::from_images(
        images
            .into_iter()
            .map(|(name, image)| (name.to_string(), image))
            .collect(),
    )
}

#[test]
fn test_auto_fit_frame_covers_largest_slice() {
    let slices = named(vec![
        ("a.png", gradient(20, 10)),
        ("b.png", gradient(8, 30)),
    ]);
    let stack = Stack::auto_fit(slices, [1.0, 1.0, 1.0]);

    assert_eq!(stack.max_size(), [20, 30]);
    assert_eq!(stack.resampler_size(), [20, 30]);
    assert_eq!(stack.volume().dim(), (2, 30, 20));
}

#[test]
fn test_update_volumes_identity_passthrough() {
    let img = gradient(12, 9);
    let slices = named(vec![("a.png", img.clone())]);
    let mut stack = Stack::auto_fit(slices, [1.0, 1.0, 1.0]);
    stack.update_volumes();

    for y in 0..9 {
        for x in 0..12 {
            assert!((stack.volume()[[0, y, x]] - img[[y, x]]).abs() < 1e-12);
            assert_eq!(stack.mask_volume()[[0, y, x]], 255);
        }
    }
}

#[test]
fn test_missing_slice_contributes_blank_plane() {
    let slices = SliceSet::from_images(vec![
        ("a.png".to_string(), gradient(8, 8)),
        ("b.png".to_string(), Array2::zeros((0, 0))),
        ("c.png".to_string(), gradient(8, 8)),
    ]);
    let mut stack = Stack::auto_fit(slices, [1.0, 1.0, 1.0]);
    stack.update_volumes();

    assert!(!stack.image_exists(1).unwrap());
    assert!(stack.volume().index_axis(ndarray::Axis(0), 1).iter().all(|&v| v == 0.0));
    assert!(stack.mask_volume().index_axis(ndarray::Axis(0), 1).iter().all(|&v| v == 0));
    // neighbours are unaffected
    assert!(stack.volume()[[0, 4, 4]] != 0.0);
    assert!(stack.volume()[[2, 4, 4]] != 0.0);
}

#[test]
fn test_translation_shifts_resampled_content() {
    let mut img = Array2::zeros((16, 16));
    img[[5, 5]] = 200.0;
    let slices = named(vec![("a.png", img)]);
    let mut stack = Stack::auto_fit(slices, [1.0, 1.0, 1.0]);

    init::initialize_with_translation(&mut stack, [2.0, 0.0]);
    stack.update_volumes();

    // output pixel p samples the input at p + offset
    assert!((stack.volume()[[0, 5, 3]] - 200.0).abs() < 1e-12);
    assert_eq!(stack.volume()[[0, 5, 5]], 0.0);
}

#[test]
fn test_common_centre_places_slice_mid_frame() {
    let mut img = Array2::zeros((10, 10));
    img[[5, 5]] = 100.0;
    let slices = named(vec![("a.png", img)]);
    let mut stack = Stack::with_size(slices, [1.0, 1.0, 1.0], [20, 20]);

    init::initialize_to_common_centre(&mut stack);
    stack.update_volumes();

    match stack.transform(0).unwrap() {
        Transform2D::Rigid { angle, offset, .. } => {
            assert_eq!(*angle, 0.0);
            assert!((offset[0] + 5.0).abs() < 1e-12);
            assert!((offset[1] + 5.0).abs() < 1e-12);
        }
        other => panic!("expected rigid transform, got {:?}", other),
    }
    assert!((stack.volume()[[0, 10, 10]] - 100.0).abs() < 1e-12);
}

#[test]
fn test_shrink_halves_mask_area() {
    let slices = named(vec![("a.png", gradient(16, 16))]);
    let mut stack = Stack::auto_fit(slices, [1.0, 1.0, 1.0]);
    stack.update_volumes();

    assert_eq!(stack.mask_area(0).unwrap(), 256);
    stack.shrink_mask_slice(0).unwrap();
    assert_eq!(stack.mask_area(0).unwrap(), 64);
    assert_eq!(stack.times_too_big()[0], 1);

    stack.shrink_mask_slice(0).unwrap();
    assert_eq!(stack.mask_area(0).unwrap(), 16);
    assert_eq!(stack.times_too_big()[0], 2);
}

#[test]
fn test_set_transforms_rejects_length_mismatch() {
    let slices = named(vec![("a.png", gradient(8, 8)), ("b.png", gradient(8, 8))]);
    let mut stack = Stack::auto_fit(slices, [1.0, 1.0, 1.0]);

    let result = stack.set_transforms(vec![Transform2D::Identity]);
    assert!(result.is_err());
    assert_eq!(stack.transforms().len(), 2);
}

#[test]
fn test_move_center_keeps_mapping() {
    let slices = named(vec![("a.png", gradient(10, 10))]);
    let reference = Stack::with_size(named(vec![("r.png", gradient(30, 30))]), [1.0, 1.0, 1.0], [30, 30]);
    let mut stack = Stack::with_size(slices, [1.0, 1.0, 1.0], [30, 30]);

    init::initialize_to_common_centre(&mut stack);
    let before = stack.transform(0).unwrap().transform_point([7.0, 11.0]);
    init::set_moving_center_from_fixed(&reference, &mut stack).unwrap();
    let after = stack.transform(0).unwrap().transform_point([7.0, 11.0]);

    assert!((before[0] - after[0]).abs() < 1e-9);
    assert!((before[1] - after[1]).abs() < 1e-9);
    match stack.transform(0).unwrap() {
        Transform2D::Rigid { center, .. } => assert_eq!(*center, [15.0, 15.0]),
        other => panic!("expected rigid transform, got {:?}", other),
    }
}
