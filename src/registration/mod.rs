//! Multi-resolution registration engine: masked mean-squares metric,
//! regular-step gradient descent, and an optional phase-correlation
//! translation seed.

pub mod engine;
pub mod metric;
pub mod optimizer;
pub mod phase;
pub mod pyramid;
pub mod resample;

pub use engine::{Convergence, ParameterScales, Registration, RegistrationTuning};
pub use metric::MetricConfig;
pub use optimizer::{OptimizerConfig, StopCondition};

use thiserror::Error;

use crate::transform::TransformError;

#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The metric could not gather enough usable samples; the caller may
    /// shrink the fixed mask and retry.
    #[error("only {usable} usable metric samples, {required} required")]
    SampleDeficit { usable: usize, required: usize },
    #[error(transparent)]
    Transform(#[from] TransformError),
}
