//! Regular-step gradient descent with per-parameter scales. The step
//! length relaxes whenever a move fails to improve the metric, and the
//! optimizer stops once the step or the gradient falls under tolerance.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::registration::RegistrationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_iterations: usize,
    /// Step length in scaled parameter space, in physical units for
    /// unit-scaled translation parameters.
    pub initial_step: f64,
    pub min_step: f64,
    pub gradient_tolerance: f64,
    /// Step multiplier applied on a rejected move.
    pub relaxation: f64,
    /// Base offset for forward-difference derivatives, divided by each
    /// parameter's scale.
    pub derivative_step: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            initial_step: 2.0,
            min_step: 1e-3,
            gradient_tolerance: 1e-7,
            relaxation: 0.5,
            derivative_step: 1e-2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    GradientTooSmall,
    StepTooSmall,
    MaxIterations,
}

impl fmt::Display for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCondition::GradientTooSmall => write!(f, "gradient magnitude under tolerance"),
            StopCondition::StepTooSmall => write!(f, "step length under minimum"),
            StopCondition::MaxIterations => write!(f, "maximum iterations reached"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerOutcome {
    pub stop_condition: StopCondition,
    pub iterations: usize,
    pub value: f64,
}

/// Minimize `cost` in place over `params`. Larger scales damp a
/// parameter's motion; the cost may fail with a sample deficit at any
/// evaluation, which aborts the whole minimization.
pub fn minimize<F>(
    config: &OptimizerConfig,
    scales: &[f64],
    params: &mut [f64],
    mut cost: F,
) -> Result<OptimizerOutcome, RegistrationError>
where
    F: FnMut(&[f64]) -> Result<f64, RegistrationError>,
{
    assert_eq!(scales.len(), params.len());
    let mut value = cost(params)?;
    if params.is_empty() {
        return Ok(OptimizerOutcome {
            stop_condition: StopCondition::GradientTooSmall,
            iterations: 0,
            value,
        });
    }

    let mut step = config.initial_step;
    let mut scratch = params.to_vec();
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;

        // forward-difference gradient in scaled parameter space
        let mut scaled_gradient = vec![0.0; params.len()];
        for i in 0..params.len() {
            let h = config.derivative_step / scales[i];
            scratch.copy_from_slice(params);
            scratch[i] += h;
            let forward = cost(&scratch)?;
            scaled_gradient[i] = (forward - value) / h / scales[i];
        }
        let magnitude = scaled_gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
        if magnitude < config.gradient_tolerance {
            return Ok(OptimizerOutcome {
                stop_condition: StopCondition::GradientTooSmall,
                iterations,
                value,
            });
        }

        // one regular step along the negative scaled gradient
        scratch.copy_from_slice(params);
        for i in 0..params.len() {
            scratch[i] -= step * scaled_gradient[i] / (magnitude * scales[i]);
        }
        let candidate = cost(&scratch)?;
        if candidate < value {
            params.copy_from_slice(&scratch);
            value = candidate;
        } else {
            step *= config.relaxation;
            if step < config.min_step {
                return Ok(OptimizerOutcome {
                    stop_condition: StopCondition::StepTooSmall,
                    iterations,
                    value,
                });
            }
        }
    }

    Ok(OptimizerOutcome {
        stop_condition: StopCondition::MaxIterations,
        iterations,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimizes_quadratic_bowl() {
        let mut params = vec![5.0, -3.0];
        let outcome = minimize(
            &OptimizerConfig::default(),
            &[1.0, 1.0],
            &mut params,
            |p| Ok((p[0] - 1.0).powi(2) + (p[1] + 2.0).powi(2)),
        )
        .unwrap();
        assert!((params[0] - 1.0).abs() < 0.05, "{params:?}");
        assert!((params[1] + 2.0).abs() < 0.05, "{params:?}");
        assert!(outcome.value < 1e-2);
    }

    #[test]
    fn large_scale_damps_a_parameter() {
        let mut params = vec![4.0, 4.0];
        let config = OptimizerConfig {
            max_iterations: 5,
            ..OptimizerConfig::default()
        };
        minimize(&config, &[1.0, 1000.0], &mut params, |p| {
            Ok(p[0].powi(2) + p[1].powi(2))
        })
        .unwrap();
        let moved_0 = (4.0 - params[0]).abs();
        let moved_1 = (4.0 - params[1]).abs();
        assert!(moved_0 > moved_1 * 10.0, "{params:?}");
    }

    #[test]
    fn already_optimal_stops_on_gradient() {
        let mut params = vec![0.0];
        let outcome = minimize(&OptimizerConfig::default(), &[1.0], &mut params, |p| {
            Ok(p[0].powi(2))
        })
        .unwrap();
        assert!(matches!(
            outcome.stop_condition,
            StopCondition::GradientTooSmall | StopCondition::StepTooSmall
        ));
    }

    #[test]
    fn cost_failures_propagate() {
        let mut params = vec![1.0];
        let result = minimize(&OptimizerConfig::default(), &[1.0], &mut params, |_| {
            Err(RegistrationError::SampleDeficit {
                usable: 0,
                required: 10,
            })
        });
        assert!(result.is_err());
    }

    #[test]
    fn empty_parameter_vector_is_a_no_op() {
        let mut params: Vec<f64> = vec![];
        let outcome = minimize(&OptimizerConfig::default(), &[], &mut params, |_| Ok(0.5)).unwrap();
        assert_eq!(outcome.iterations, 0);
    }
}
