//! Optimization: Adam, loss functions, and the two-stage training loop.

pub mod adam;
pub mod loss;
pub mod trainer;

pub use adam::AdamF32;
pub use trainer::{RunConfig, StepStats, Trainer};
