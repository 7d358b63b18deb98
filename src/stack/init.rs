//! Whole-stack transform initializers used between registration passes.

use crate::stack::Stack;
use crate::transform::{DisplacementGrid, Transform2D};

pub fn initialize_to_identity(stack: &mut Stack) {
    let n = stack.len();
    stack
        .set_transforms(vec![Transform2D::Identity; n])
        .expect("length preserved");
}

pub fn initialize_with_translation(stack: &mut Stack, translation: [f64; 2]) {
    let n = stack.len();
    stack
        .set_transforms(vec![
            Transform2D::translation(translation[0], translation[1]);
            n
        ])
        .expect("length preserved");
}

/// Centered rigid transforms that place each slice in the middle of the
/// common output frame, the usual seed for the first rigid pass.
pub fn initialize_to_common_centre(stack: &mut Stack) {
    let resampler = stack.resampler_size();
    let spacings = stack.spacings_2d();
    let original = stack.original_spacings();
    let mut transforms = Vec::with_capacity(stack.len());
    for i in 0..stack.len() {
        let size = stack
            .original_image(i)
            .map(|img| [img.ncols(), img.nrows()])
            .unwrap_or([0, 0]);
        // translation applied after (zero) rotation
        let offset = [
            (original[0] * size[0] as f64 - spacings[0] * resampler[0] as f64) / 2.0,
            (original[1] * size[1] as f64 - spacings[1] * resampler[1] as f64) / 2.0,
        ];
        transforms.push(Transform2D::Rigid {
            angle: 0.0,
            center: [0.0, 0.0],
            offset,
        });
    }
    stack.set_transforms(transforms).expect("length preserved");
}

/// Set every moving transform's center of rotation to the middle of the
/// fixed stack's output frame, without changing any mapping.
pub fn set_moving_center_from_fixed(fixed: &Stack, moving: &mut Stack) -> crate::Result<()> {
    let extent = fixed.frame_extent();
    let center = [extent[0] / 2.0, extent[1] / 2.0];
    for i in 0..moving.len() {
        moving.transform_mut(i)?.move_center(center)?;
    }
    Ok(())
}

/// Flatten each transform into a centered affine with the same mapping,
/// seeding the affine pass from the rigid result.
pub fn promote_transforms_to_affine(stack: &mut Stack) -> crate::Result<()> {
    let mut transforms = Vec::with_capacity(stack.len());
    for t in stack.transforms() {
        transforms.push(t.promote_to_affine()?);
    }
    stack.set_transforms(transforms)?;
    Ok(())
}

/// Wrap each transform as the bulk component of a zeroed displacement
/// grid covering the fixed stack's frame, seeding a deformable pass.
pub fn initialize_deformable_from_bulk(
    fixed: &Stack,
    moving: &mut Stack,
    grid_size: usize,
) -> crate::Result<()> {
    let region = fixed.frame_extent();
    let mut transforms = Vec::with_capacity(moving.len());
    for t in moving.transforms() {
        transforms.push(Transform2D::Deformable(DisplacementGrid::zeroed(
            [grid_size, grid_size],
            region,
            t.clone(),
        )));
    }
    moving.set_transforms(transforms)?;
    Ok(())
}

/// Apply one translation to every slice's transform.
pub fn translate_all(stack: &mut Stack, translation: [f64; 2]) -> crate::Result<()> {
    for i in 0..stack.len() {
        stack.transform_mut(i)?.apply_translation(translation)?;
    }
    Ok(())
}
