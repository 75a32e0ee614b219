//! Distance-field capability interface.
//!
//! The training curriculum and the volumetric evaluator never see a concrete
//! function family; they depend on two operations: evaluate the unsigned
//! distance at a batch of points, and evaluate the field's spatial gradient
//! at a batch of points. Trainable families additionally expose their
//! parameters as a flat slice and a backprop hook that accumulates
//! `d(sum_i c_i * f(x_i)) / d(params)`.

mod mlp;

pub use mlp::{MlpConfig, MlpField};

use nalgebra::Vector3;

/// Floor applied to gradient norms before normalizing, so the projection is
/// finite even where the field gradient vanishes.
pub const GRAD_NORM_EPS: f32 = 1e-12;

/// Read-only view of an unsigned distance field.
pub trait DistanceField: Sync {
    /// Unsigned distance at each point.
    fn distance(&self, points: &[Vector3<f32>]) -> Vec<f32>;

    /// Spatial gradient of the distance at each point.
    fn gradient(&self, points: &[Vector3<f32>]) -> Vec<Vector3<f32>>;
}

/// A distance field with gradient-descent-trainable parameters.
pub trait TrainableField: DistanceField {
    fn num_params(&self) -> usize;

    fn params(&self) -> &[f32];

    fn params_mut(&mut self) -> &mut [f32];

    /// Accumulate `d(sum_i cotangents[i] * distance(points[i])) / d(params)`
    /// into `grads`. `grads` must have length `num_params()`.
    fn accumulate(&self, points: &[Vector3<f32>], cotangents: &[f32], grads: &mut [f32]);
}

/// Move a query point onto the estimated surface:
/// `moved = query - normalize(gradient) * distance`.
///
/// At distance exactly 0 this is the identity regardless of the gradient.
pub fn project_to_surface(
    query: &Vector3<f32>,
    gradient: &Vector3<f32>,
    distance: f32,
) -> Vector3<f32> {
    let n = gradient / gradient.norm().max(GRAD_NORM_EPS);
    query - n * distance
}
