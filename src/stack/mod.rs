//! The stack owns a set of original slices and per-slice transforms, and
//! derives resampled slices, masks and the tiled 3D volume from them.

pub mod builder;
pub mod init;
pub mod slice;

pub use builder::{build_stack, StackConfig};
pub use slice::{Slice, SliceSet};

use ndarray::{Array2, Array3};
use rayon::prelude::*;
use thiserror::Error;

use crate::registration::resample::{resample_linear, resample_nearest};
use crate::transform::Transform2D;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("slice index {index} out of range for stack of {len} slices")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("transform vector length {got} does not match stack size {expected}")]
    TransformCount { expected: usize, got: usize },
}

/// Ordered 2D slices plus per-slice transforms, and the 3D volume and
/// mask derived from them. The volume is a cache: it is rebuilt from the
/// originals and the current transforms by `update_volumes` and is never
/// edited directly.
pub struct Stack {
    slices: Vec<Slice>,
    original_masks: Vec<Array2<u8>>,
    transforms: Vec<Transform2D>,
    original_spacings: [f64; 2],
    spacings: [f64; 3],
    max_size: [usize; 2],
    resampler_size: [usize; 2],
    resampled_slices: Vec<Array2<f64>>,
    resampled_masks: Vec<Array2<u8>>,
    volume: Array3<f64>,
    mask_volume: Array3<u8>,
    times_too_big: Vec<u32>,
}

impl Stack {
    /// Auto-fit variant: the stack is just big enough to fit the longest
    /// and widest slice. Native and output spacing coincide.
    pub fn auto_fit(slices: SliceSet, spacings: [f64; 3]) -> Stack {
        let max_size = max_slice_size(&slices);
        Self::assemble(slices, [spacings[0], spacings[1]], spacings, max_size)
    }

    /// Explicit output frame, native spacing equal to output spacing.
    pub fn with_size(slices: SliceSet, spacings: [f64; 3], size: [usize; 2]) -> Stack {
        Self::assemble(slices, [spacings[0], spacings[1]], spacings, size)
    }

    /// Explicit output frame with a distinct native spacing, for pairing
    /// a high-resolution series into a low-resolution reference frame.
    pub fn with_original_spacings(
        slices: SliceSet,
        original_spacings: [f64; 2],
        spacings: [f64; 3],
        size: [usize; 2],
    ) -> Stack {
        Self::assemble(slices, original_spacings, spacings, size)
    }

    fn assemble(
        slices: SliceSet,
        original_spacings: [f64; 2],
        spacings: [f64; 3],
        resampler_size: [usize; 2],
    ) -> Stack {
        let slices = slices.into_slices();
        let n = slices.len();
        let max_size = slices.iter().fold([0, 0], |acc, s| {
            let [w, h] = s.size();
            [acc[0].max(w), acc[1].max(h)]
        });
        let original_masks = slices
            .iter()
            .map(|s| {
                let [w, h] = s.size();
                Array2::from_elem((h, w), 255u8)
            })
            .collect();
        let empty_slice = Array2::zeros((resampler_size[1], resampler_size[0]));
        let empty_mask = Array2::zeros((resampler_size[1], resampler_size[0]));
        Stack {
            original_masks,
            transforms: vec![Transform2D::Identity; n],
            original_spacings,
            spacings,
            max_size,
            resampler_size,
            resampled_slices: vec![empty_slice; n],
            resampled_masks: vec![empty_mask; n],
            volume: Array3::zeros((n, resampler_size[1], resampler_size[0])),
            mask_volume: Array3::zeros((n, resampler_size[1], resampler_size[0])),
            times_too_big: vec![0; n],
            slices,
        }
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    fn check(&self, index: usize) -> Result<(), StackError> {
        if index >= self.slices.len() {
            return Err(StackError::IndexOutOfRange {
                index,
                len: self.slices.len(),
            });
        }
        Ok(())
    }

    pub fn file_name(&self, index: usize) -> Result<&str, StackError> {
        self.check(index)?;
        Ok(&self.slices[index].name)
    }

    pub fn basename(&self, index: usize) -> Result<&str, StackError> {
        self.check(index)?;
        Ok(self.slices[index].basename())
    }

    pub fn basenames(&self) -> Vec<String> {
        self.slices.iter().map(|s| s.basename().to_string()).collect()
    }

    /// True iff the loaded slice has nonzero extent; the per-slice skip
    /// gate used throughout.
    pub fn image_exists(&self, index: usize) -> Result<bool, StackError> {
        self.check(index)?;
        Ok(self.slices[index].present())
    }

    pub fn original_image(&self, index: usize) -> Result<&Array2<f64>, StackError> {
        self.check(index)?;
        Ok(&self.slices[index].image)
    }

    pub fn original_mask(&self, index: usize) -> Result<&Array2<u8>, StackError> {
        self.check(index)?;
        Ok(&self.original_masks[index])
    }

    pub fn resampled_slice(&self, index: usize) -> Result<&Array2<f64>, StackError> {
        self.check(index)?;
        Ok(&self.resampled_slices[index])
    }

    pub fn resampled_mask(&self, index: usize) -> Result<&Array2<u8>, StackError> {
        self.check(index)?;
        Ok(&self.resampled_masks[index])
    }

    pub fn transform(&self, index: usize) -> Result<&Transform2D, StackError> {
        self.check(index)?;
        Ok(&self.transforms[index])
    }

    pub fn transform_mut(&mut self, index: usize) -> Result<&mut Transform2D, StackError> {
        self.check(index)?;
        Ok(&mut self.transforms[index])
    }

    pub fn transforms(&self) -> &[Transform2D] {
        &self.transforms
    }

    /// Wholesale transform replacement; element-by-element mutation from
    /// outside goes through the driver-facing accessors instead.
    pub fn set_transforms(&mut self, transforms: Vec<Transform2D>) -> Result<(), StackError> {
        if transforms.len() != self.slices.len() {
            return Err(StackError::TransformCount {
                expected: self.slices.len(),
                got: transforms.len(),
            });
        }
        self.transforms = transforms;
        Ok(())
    }

    /// Moving image, moving mask and the transform to optimize for one
    /// slice, borrowed disjointly so the registration engine can mutate
    /// the transform in place.
    pub fn registration_bindings(
        &mut self,
        index: usize,
    ) -> Result<(&Array2<f64>, &Array2<u8>, &mut Transform2D), StackError> {
        self.check(index)?;
        Ok((
            &self.slices[index].image,
            &self.original_masks[index],
            &mut self.transforms[index],
        ))
    }

    pub fn max_size(&self) -> [usize; 2] {
        self.max_size
    }

    pub fn resampler_size(&self) -> [usize; 2] {
        self.resampler_size
    }

    pub fn spacings(&self) -> [f64; 3] {
        self.spacings
    }

    pub fn spacings_2d(&self) -> [f64; 2] {
        [self.spacings[0], self.spacings[1]]
    }

    pub fn original_spacings(&self) -> [f64; 2] {
        self.original_spacings
    }

    pub fn volume(&self) -> &Array3<f64> {
        &self.volume
    }

    pub fn mask_volume(&self) -> &Array3<u8> {
        &self.mask_volume
    }

    pub fn times_too_big(&self) -> &[u32] {
        &self.times_too_big
    }

    /// Physical extent of the common output frame.
    pub fn frame_extent(&self) -> [f64; 2] {
        [
            self.resampler_size[0] as f64 * self.spacings[0],
            self.resampler_size[1] as f64 * self.spacings[1],
        ]
    }

    /// Resample every present slice and mask into the common frame under
    /// its current transform, then tile them along z with the synthetic
    /// slice spacing. Idempotent for unchanged transforms; missing
    /// slices contribute zero planes.
    pub fn update_volumes(&mut self) {
        let out_size = self.resampler_size;
        let out_spacing = self.spacings_2d();
        let in_spacing = self.original_spacings;
        let pairs: Vec<(Array2<f64>, Array2<u8>)> = self
            .slices
            .par_iter()
            .zip(self.original_masks.par_iter())
            .zip(self.transforms.par_iter())
            .map(|((slice, mask), transform)| {
                if slice.present() {
                    (
                        resample_linear(&slice.image, in_spacing, transform, out_size, out_spacing),
                        resample_nearest(mask, in_spacing, transform, out_size, out_spacing),
                    )
                } else {
                    (
                        Array2::zeros((out_size[1], out_size[0])),
                        Array2::zeros((out_size[1], out_size[0])),
                    )
                }
            })
            .collect();

        for (i, (slice, mask)) in pairs.into_iter().enumerate() {
            self.volume.index_axis_mut(ndarray::Axis(0), i).assign(&slice);
            self.mask_volume.index_axis_mut(ndarray::Axis(0), i).assign(&mask);
            self.resampled_slices[i] = slice;
            self.resampled_masks[i] = mask;
        }
    }

    /// Halve the width and height of the resampled mask's populated
    /// region about its center. Recovery action for registration sample
    /// deficits; bumps the per-slice shrink counter by exactly one, and
    /// is a pure no-op on an already-empty mask.
    pub fn shrink_mask_slice(&mut self, index: usize) -> Result<(), StackError> {
        self.check(index)?;
        let mask = &mut self.resampled_masks[index];
        let Some((min_y, min_x, max_y, max_x)) = nonzero_bounds(mask) else {
            return Ok(()); // nothing left to shrink, counter untouched
        };
        self.times_too_big[index] += 1;
        let w = max_x - min_x + 1;
        let h = max_y - min_y + 1;
        let new_w = (w / 2).max(1);
        let new_h = (h / 2).max(1);
        let cx = (min_x + max_x) / 2;
        let cy = (min_y + max_y) / 2;
        let x0 = cx.saturating_sub(new_w / 2);
        let y0 = cy.saturating_sub(new_h / 2);
        let x1 = x0 + new_w;
        let y1 = y0 + new_h;

        for ((y, x), v) in mask.indexed_iter_mut() {
            if x < x0 || x >= x1 || y < y0 || y >= y1 {
                *v = 0;
            }
        }
        log::debug!(
            "slice {}: mask shrunk to {}x{} (shrink #{})",
            index,
            new_w,
            new_h,
            self.times_too_big[index]
        );
        Ok(())
    }

    /// Nonzero pixel count of the resampled mask at `index`.
    pub fn mask_area(&self, index: usize) -> Result<usize, StackError> {
        self.check(index)?;
        Ok(self.resampled_masks[index].iter().filter(|&&v| v != 0).count())
    }
}

fn max_slice_size(slices: &SliceSet) -> [usize; 2] {
    slices.iter().fold([0, 0], |acc, s| {
        let [w, h] = s.size();
        [acc[0].max(w), acc[1].max(h)]
    })
}

fn nonzero_bounds(mask: &Array2<u8>) -> Option<(usize, usize, usize, usize)> {
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for ((y, x), &v) in mask.indexed_iter() {
        if v != 0 {
            bounds = Some(match bounds {
                None => (y, x, y, x),
                Some((min_y, min_x, max_y, max_x)) => {
                    (min_y.min(y), min_x.min(x), max_y.max(y), max_x.max(x))
                }
            });
        }
    }
    bounds
}
