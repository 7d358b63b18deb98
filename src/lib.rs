pub mod align;
pub mod compose;
pub mod config;
pub mod registration;
pub mod stack;
pub mod store;
pub mod transform;
pub mod volume_io;

pub use align::{AlignmentReport, DriverConfig, StackAligner};
pub use registration::{Registration, RegistrationTuning};
pub use stack::{build_stack, Stack, StackConfig};
pub use transform::Transform2D;

pub type Result<T> = anyhow::Result<T>;
