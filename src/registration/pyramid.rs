//! Coarse-to-fine resolution schedule for one registration pair.

use ndarray::Array2;

use crate::registration::resample::{downsample_average, downsample_mask};

pub struct PyramidLevel {
    pub factor: usize,
    pub fixed: Array2<f64>,
    pub fixed_mask: Array2<u8>,
    pub fixed_spacing: [f64; 2],
    pub moving: Array2<f64>,
    pub moving_mask: Array2<u8>,
    pub moving_spacing: [f64; 2],
}

/// Build one level per shrink factor, coarsest first. Spacing grows with
/// the factor so physical coordinates, and therefore transform
/// parameters, stay comparable across levels.
#[allow(clippy::too_many_arguments)]
pub fn build_levels(
    factors: &[usize],
    fixed: &Array2<f64>,
    fixed_mask: &Array2<u8>,
    fixed_spacing: [f64; 2],
    moving: &Array2<f64>,
    moving_mask: &Array2<u8>,
    moving_spacing: [f64; 2],
) -> Vec<PyramidLevel> {
    let mut factors: Vec<usize> = factors.iter().copied().filter(|&f| f >= 1).collect();
    if factors.is_empty() {
        factors.push(1);
    }
    factors.sort_unstable_by(|a, b| b.cmp(a));

    factors
        .into_iter()
        .map(|factor| PyramidLevel {
            factor,
            fixed: downsample_average(fixed, factor),
            fixed_mask: downsample_mask(fixed_mask, factor),
            fixed_spacing: [fixed_spacing[0] * factor as f64, fixed_spacing[1] * factor as f64],
            moving: downsample_average(moving, factor),
            moving_mask: downsample_mask(moving_mask, factor),
            moving_spacing: [
                moving_spacing[0] * factor as f64,
                moving_spacing[1] * factor as f64,
            ],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_run_coarse_to_fine() {
        let img = Array2::from_elem((16, 16), 1.0);
        let mask = Array2::from_elem((16, 16), 255u8);
        let levels = build_levels(&[1, 4, 2], &img, &mask, [1.0, 1.0], &img, &mask, [1.0, 1.0]);
        let factors: Vec<usize> = levels.iter().map(|l| l.factor).collect();
        assert_eq!(factors, vec![4, 2, 1]);
        assert_eq!(levels[0].fixed.dim(), (4, 4));
        assert_eq!(levels[0].fixed_spacing, [4.0, 4.0]);
        assert_eq!(levels[2].fixed.dim(), (16, 16));
    }

    #[test]
    fn empty_schedule_falls_back_to_native() {
        let img = Array2::from_elem((8, 8), 1.0);
        let mask = Array2::from_elem((8, 8), 255u8);
        let levels = build_levels(&[], &img, &mask, [1.0, 1.0], &img, &mask, [1.0, 1.0]);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].factor, 1);
    }
}
