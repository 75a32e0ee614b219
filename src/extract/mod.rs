//! Turning a trained field into a mesh.
//!
//! `volume` samples the field densely over a bounded grid; `surface` assigns
//! pseudo-signs from the gradient direction, runs surface-nets isosurfacing,
//! and prunes geometry far from the ground-truth cloud.

mod surface;
mod volume;

pub use surface::{extract_mesh, remove_far, remove_outliers};
pub use volume::{evaluate_field, VolumeGrid};
