//! Masked mean-squares similarity metric over randomly drawn sample
//! points. The sample-deficit failure is the signal the alignment
//! driver's mask-shrink retry exists for.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::registration::resample::{bilinear, inside};
use crate::registration::RegistrationError;
use crate::transform::Transform2D;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Number of fixed-image points drawn from inside the fixed mask.
    pub sample_count: usize,
    /// Fraction of drawn samples that must land inside the moving image
    /// and its mask for an evaluation to count.
    pub min_usable_fraction: f64,
    /// Seed for the sample draw, fixed so runs are reproducible.
    pub seed: u64,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            sample_count: 2000,
            min_usable_fraction: 0.25,
            seed: 71,
        }
    }
}

/// Mean-squares metric bound to one fixed slice. Samples are drawn once
/// at construction; every evaluation maps them through the candidate
/// transform into the moving image.
pub struct MeanSquaresMetric {
    /// Physical fixed-space point plus the fixed intensity there.
    samples: Vec<([f64; 2], f64)>,
    min_usable: usize,
}

impl MeanSquaresMetric {
    pub fn new(
        fixed: &Array2<f64>,
        fixed_mask: &Array2<u8>,
        fixed_spacing: [f64; 2],
        config: &MetricConfig,
    ) -> MeanSquaresMetric {
        let mut candidates: Vec<[usize; 2]> = fixed_mask
            .indexed_iter()
            .filter(|(_, &v)| v != 0)
            .map(|((y, x), _)| [x, y])
            .collect();
        let mut rng = StdRng::seed_from_u64(config.seed);
        candidates.shuffle(&mut rng);
        candidates.truncate(config.sample_count);

        let samples = candidates
            .into_iter()
            .map(|[x, y]| {
                let phys = [x as f64 * fixed_spacing[0], y as f64 * fixed_spacing[1]];
                (phys, fixed[[y, x]])
            })
            .collect::<Vec<_>>();
        let min_usable = ((samples.len() as f64 * config.min_usable_fraction).ceil() as usize).max(1);
        MeanSquaresMetric { samples, min_usable }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Mean squared intensity difference over all samples, or a sample
    /// deficit when too few map into the moving image. Samples that land
    /// outside the moving image (or outside its mask) compare against a
    /// background of zero, so the cost stays continuous as samples drift
    /// across the boundary instead of dropping out of the mean.
    pub fn value(
        &self,
        moving: &Array2<f64>,
        moving_mask: &Array2<u8>,
        moving_spacing: [f64; 2],
        transform: &Transform2D,
    ) -> Result<f64, RegistrationError> {
        let dim = moving.dim();
        let (mh, mw) = moving_mask.dim();
        let mut sum = 0.0;
        let mut usable = 0usize;
        for &(phys, fixed_value) in &self.samples {
            let p = transform.transform_point(phys);
            let cx = p[0] / moving_spacing[0];
            let cy = p[1] / moving_spacing[1];
            let mut value = 0.0;
            if inside(dim, cx, cy) {
                let ix = cx.round() as usize;
                let iy = cy.round() as usize;
                if iy < mh && ix < mw && moving_mask[[iy, ix]] != 0 {
                    value = bilinear(moving, cx, cy);
                    usable += 1;
                }
            }
            let diff = fixed_value - value;
            sum += diff * diff;
        }
        if usable < self.min_usable {
            return Err(RegistrationError::SampleDeficit {
                usable,
                required: self.min_usable,
            });
        }
        Ok(sum / self.samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn gradient_image(w: usize, h: usize) -> Array2<f64> {
        Array2::from_shape_fn((h, w), |(y, x)| (x + 2 * y) as f64)
    }

    fn full_mask(w: usize, h: usize) -> Array2<u8> {
        Array2::from_elem((h, w), 255)
    }

    #[test]
    fn identical_images_score_zero() {
        let img = gradient_image(16, 16);
        let mask = full_mask(16, 16);
        let metric = MeanSquaresMetric::new(&img, &mask, [1.0, 1.0], &MetricConfig::default());
        let v = metric
            .value(&img, &mask, [1.0, 1.0], &Transform2D::Identity)
            .unwrap();
        assert!(v.abs() < 1e-9);
    }

    #[test]
    fn misalignment_scores_worse_than_alignment() {
        let img = gradient_image(16, 16);
        let mask = full_mask(16, 16);
        let metric = MeanSquaresMetric::new(&img, &mask, [1.0, 1.0], &MetricConfig::default());
        let aligned = metric
            .value(&img, &mask, [1.0, 1.0], &Transform2D::Identity)
            .unwrap();
        let shifted = metric
            .value(&img, &mask, [1.0, 1.0], &Transform2D::translation(2.0, 0.0))
            .unwrap();
        assert!(shifted > aligned);
    }

    fn blob_image(w: usize, h: usize, cx: f64, cy: f64) -> Array2<f64> {
        Array2::from_shape_fn((h, w), |(y, x)| {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            100.0 * (-(dx * dx + dy * dy) / 30.0).exp()
        })
    }

    #[test]
    fn cost_decreases_monotonically_toward_alignment() {
        let fixed = blob_image(32, 32, 16.0, 16.0);
        let moving = blob_image(32, 32, 20.0, 16.0);
        let mask = full_mask(32, 32);
        let metric = MeanSquaresMetric::new(&fixed, &mask, [1.0, 1.0], &MetricConfig::default());
        let cost = |tx: f64| {
            metric
                .value(&moving, &mask, [1.0, 1.0], &Transform2D::translation(tx, 0.0))
                .unwrap()
        };
        let steps: Vec<f64> = [0.0, 0.5, 1.0, 2.0, 3.0, 4.0].iter().map(|&t| cost(t)).collect();
        for pair in steps.windows(2) {
            assert!(
                pair[1] < pair[0],
                "cost must keep falling toward the true shift: {:?}",
                steps
            );
        }
        assert!(steps[steps.len() - 1] < 0.05);
    }

    #[test]
    fn far_translation_triggers_sample_deficit() {
        let img = gradient_image(16, 16);
        let mask = full_mask(16, 16);
        let metric = MeanSquaresMetric::new(&img, &mask, [1.0, 1.0], &MetricConfig::default());
        let err = metric
            .value(&img, &mask, [1.0, 1.0], &Transform2D::translation(1000.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, RegistrationError::SampleDeficit { usable: 0, .. }));
    }

    #[test]
    fn empty_mask_yields_deficit() {
        let img = gradient_image(8, 8);
        let empty = Array2::zeros((8, 8));
        let metric = MeanSquaresMetric::new(&img, &empty, [1.0, 1.0], &MetricConfig::default());
        assert_eq!(metric.sample_count(), 0);
        let err = metric
            .value(&img, &full_mask(8, 8), [1.0, 1.0], &Transform2D::Identity)
            .unwrap_err();
        assert!(matches!(err, RegistrationError::SampleDeficit { .. }));
    }
}
