//! The registration engine: one mutable configuration object, rebound to
//! a fresh fixed/moving pair for every slice, optimizing the bound
//! transform in place.

use instant::Instant;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::registration::metric::{MeanSquaresMetric, MetricConfig};
use crate::registration::optimizer::{minimize, OptimizerConfig, StopCondition};
use crate::registration::phase::phase_correlate;
use crate::registration::pyramid::build_levels;
use crate::registration::RegistrationError;
use crate::transform::Transform2D;

/// Per-parameter optimizer scales, keyed by what a parameter controls.
/// Larger values damp a parameter's motion per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterScales {
    pub translation: f64,
    pub rotation: f64,
    pub size: f64,
}

impl Default for ParameterScales {
    fn default() -> Self {
        Self {
            translation: 1.0,
            rotation: 60.0,
            size: 60.0,
        }
    }
}

impl ParameterScales {
    /// Scale vector matching the transform's parameter layout.
    pub fn for_transform(&self, transform: &Transform2D) -> Vec<f64> {
        match transform {
            Transform2D::Identity => vec![],
            Transform2D::Translation { .. } => vec![self.translation; 2],
            // [angle, cx, cy, tx, ty]
            Transform2D::Rigid { .. } => vec![
                self.rotation,
                self.translation,
                self.translation,
                self.translation,
                self.translation,
            ],
            // [scale, angle, cx, cy, tx, ty]
            Transform2D::Similarity { .. } => vec![
                self.size,
                self.rotation,
                self.translation,
                self.translation,
                self.translation,
                self.translation,
            ],
            // four matrix elements, two centre coordinates, two
            // translation coordinates
            Transform2D::Affine { .. } => vec![
                self.size,
                self.size,
                self.size,
                self.size,
                self.translation,
                self.translation,
                self.translation,
                self.translation,
            ],
            Transform2D::Deformable(_) => vec![1.0; transform.parameter_count()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationTuning {
    pub metric: MetricConfig,
    pub optimizer: OptimizerConfig,
    pub scales: ParameterScales,
    /// Shrink factors, applied coarsest first.
    pub pyramid_factors: Vec<usize>,
    /// Seed a fresh translation transform from FFT phase correlation
    /// before descending.
    pub seed_with_phase_correlation: bool,
}

impl Default for RegistrationTuning {
    fn default() -> Self {
        Self {
            metric: MetricConfig::default(),
            optimizer: OptimizerConfig::default(),
            scales: ParameterScales::default(),
            pyramid_factors: vec![4, 2, 1],
            seed_with_phase_correlation: false,
        }
    }
}

/// How a successful run stopped.
#[derive(Debug, Clone)]
pub struct Convergence {
    pub stop_condition: StopCondition,
    pub iterations: usize,
    pub final_metric: f64,
    pub elapsed_ms: f32,
}

/// One registration pair bound at a time; the caller rebinds images and
/// the transform for each slice. Holds only tuning, so slices reuse the
/// same configuration.
pub struct Registration {
    tuning: RegistrationTuning,
}

impl Registration {
    pub fn new(tuning: RegistrationTuning) -> Registration {
        Registration { tuning }
    }

    pub fn tuning(&self) -> &RegistrationTuning {
        &self.tuning
    }

    /// Optimize `transform` to map fixed physical points onto the moving
    /// image, continuing from its current parameters. On success the
    /// bound transform has been mutated in place; a sample deficit
    /// leaves it at the last accepted parameters.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        fixed: &Array2<f64>,
        fixed_mask: &Array2<u8>,
        fixed_spacing: [f64; 2],
        moving: &Array2<f64>,
        moving_mask: &Array2<u8>,
        moving_spacing: [f64; 2],
        transform: &mut Transform2D,
    ) -> Result<Convergence, RegistrationError> {
        let start = Instant::now();

        if self.tuning.seed_with_phase_correlation {
            self.seed_translation(fixed, moving, fixed_spacing, transform);
        }

        let levels = build_levels(
            &self.tuning.pyramid_factors,
            fixed,
            fixed_mask,
            fixed_spacing,
            moving,
            moving_mask,
            moving_spacing,
        );

        let mut params = transform.parameters();
        let scales = self.tuning.scales.for_transform(transform);
        let mut last = None;

        for level in &levels {
            let metric =
                MeanSquaresMetric::new(&level.fixed, &level.fixed_mask, level.fixed_spacing, &self.tuning.metric);
            let mut candidate = transform.clone();
            let outcome = minimize(&self.tuning.optimizer, &scales, &mut params, |p| {
                candidate.set_parameters(p)?;
                metric.value(&level.moving, &level.moving_mask, level.moving_spacing, &candidate)
            })?;
            log::debug!(
                "pyramid factor {}: {} after {} iterations, metric {:.6}",
                level.factor,
                outcome.stop_condition,
                outcome.iterations,
                outcome.value
            );
            // carry the refined parameters into the next finer level
            transform.set_parameters(&params)?;
            last = Some(outcome);
        }

        let outcome = last.expect("pyramid always has at least one level");
        Ok(Convergence {
            stop_condition: outcome.stop_condition,
            iterations: outcome.iterations,
            final_metric: outcome.value,
            elapsed_ms: start.elapsed().as_millis() as f32,
        })
    }

    /// Seed an untouched translation transform with a phase-correlation
    /// estimate. Continuation parameters from an earlier pass are left
    /// alone.
    fn seed_translation(
        &self,
        fixed: &Array2<f64>,
        moving: &Array2<f64>,
        fixed_spacing: [f64; 2],
        transform: &mut Transform2D,
    ) {
        if let Transform2D::Translation { offset } = transform {
            if offset == &[0.0, 0.0] {
                if let Some((tx, ty)) = phase_correlate(fixed, moving) {
                    *offset = [tx * fixed_spacing[0], ty * fixed_spacing[1]];
                    log::debug!("phase correlation seed: ({:.2}, {:.2})", offset[0], offset[1]);
                }
            }
        }
    }
}
