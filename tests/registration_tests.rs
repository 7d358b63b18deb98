use ndarray::Array2;
use stackreg::registration::{Registration, RegistrationError, RegistrationTuning};
use stackreg::Transform2D;

fn blob(w: usize, h: usize, cx: f64, cy: f64) -> Array2<f64> {
    Array2::from_shape_fn((h, w), |(y, x)| {
        let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
        100.0 * (-d2 / 30.0).exp()
    })
}

fn full_mask(w: usize, h: usize) -> Array2<u8> {
    Array2::from_elem((h, w), 255)
}

#[test]
fn test_translation_recovery() {
    let fixed = blob(48, 48, 24.0, 24.0);
    let moving = blob(48, 48, 28.0, 21.0);
    let mask = full_mask(48, 48);

    let mut registration = Registration::new(RegistrationTuning::default());
    let mut transform = Transform2D::translation(0.0, 0.0);
    registration
        .run(
            &fixed,
            &mask,
            [1.0, 1.0],
            &moving,
            &mask,
            [1.0, 1.0],
            &mut transform,
        )
        .unwrap();

    match transform {
        Transform2D::Translation { offset } => {
            assert!((offset[0] - 4.0).abs() < 0.5, "tx = {}", offset[0]);
            assert!((offset[1] + 3.0).abs() < 0.5, "ty = {}", offset[1]);
        }
        other => panic!("expected translation, got {:?}", other),
    }
}

#[test]
fn test_repeated_runs_are_deterministic() {
    let fixed = blob(32, 32, 16.0, 16.0);
    let moving = blob(32, 32, 18.0, 15.0);
    let mask = full_mask(32, 32);

    let mut first = Transform2D::translation(0.0, 0.0);
    let mut second = Transform2D::translation(0.0, 0.0);
    for transform in [&mut first, &mut second] {
        let mut registration = Registration::new(RegistrationTuning::default());
        registration
            .run(
                &fixed,
                &mask,
                [1.0, 1.0],
                &moving,
                &mask,
                [1.0, 1.0],
                transform,
            )
            .unwrap();
    }

    assert_eq!(first.parameters(), second.parameters());
}

#[test]
fn test_disjoint_masks_report_sample_deficit() {
    let fixed = blob(32, 32, 16.0, 16.0);
    let moving = blob(32, 32, 16.0, 16.0);
    let fixed_mask = full_mask(32, 32);
    let empty_mask: Array2<u8> = Array2::zeros((32, 32));

    let mut registration = Registration::new(RegistrationTuning::default());
    let mut transform = Transform2D::translation(0.0, 0.0);
    let err = registration
        .run(
            &fixed,
            &fixed_mask,
            [1.0, 1.0],
            &moving,
            &empty_mask,
            [1.0, 1.0],
            &mut transform,
        )
        .unwrap_err();

    assert!(matches!(err, RegistrationError::SampleDeficit { usable: 0, .. }));
}

#[test]
fn test_second_pass_continues_from_first() {
    let fixed = blob(48, 48, 24.0, 24.0);
    let moving = blob(48, 48, 27.0, 24.0);
    let mask = full_mask(48, 48);

    let mut registration = Registration::new(RegistrationTuning::default());
    let mut transform = Transform2D::translation(0.0, 0.0);
    registration
        .run(&fixed, &mask, [1.0, 1.0], &moving, &mask, [1.0, 1.0], &mut transform)
        .unwrap();
    let after_first = transform.parameters();

    // a second pass from the converged state stays put
    registration
        .run(&fixed, &mask, [1.0, 1.0], &moving, &mask, [1.0, 1.0], &mut transform)
        .unwrap();
    let after_second = transform.parameters();

    for (a, b) in after_first.iter().zip(&after_second) {
        assert!((a - b).abs() < 0.5, "drifted from {} to {}", a, b);
    }
}

#[test]
fn test_phase_seed_only_touches_fresh_translations() {
    let fixed = blob(32, 32, 16.0, 16.0);
    let moving = blob(32, 32, 20.0, 16.0);
    let mask = full_mask(32, 32);

    let mut tuning = RegistrationTuning::default();
    tuning.seed_with_phase_correlation = true;
    tuning.optimizer.max_iterations = 0;

    // fresh translation gets a seed
    let mut registration = Registration::new(tuning.clone());
    let mut fresh = Transform2D::translation(0.0, 0.0);
    let _ = registration.run(&fixed, &mask, [1.0, 1.0], &moving, &mask, [1.0, 1.0], &mut fresh);
    match fresh {
        Transform2D::Translation { offset } => assert!(offset != [0.0, 0.0]),
        other => panic!("expected translation, got {:?}", other),
    }

    // continuation parameters are left alone
    let mut registration = Registration::new(tuning);
    let mut continued = Transform2D::translation(1.5, -0.5);
    let _ = registration.run(&fixed, &mask, [1.0, 1.0], &moving, &mask, [1.0, 1.0], &mut continued);
    match continued {
        Transform2D::Translation { offset } => assert_eq!(offset, [1.5, -0.5]),
        other => panic!("expected translation, got {:?}", other),
    }
}
