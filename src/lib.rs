//! # udf-rs: Unsigned-Distance-Field Surface Reconstruction
//!
//! This crate reconstructs a continuous surface from an unorganized 3D
//! point cloud: a differentiable unsigned-distance-field approximator is
//! fitted to the cloud without any ground-truth distances, then a mesh is
//! extracted from the trained field.
//!
//! ## Architecture
//!
//! The crate is organized into several modules:
//!
//! - `core`: Fundamental data structures (point sets, meshes)
//! - `spatial`: k-d tree queries, exact correspondence search, Poisson-disk
//!   downsampling
//! - `query`: Training query generation (density-adaptive, edge-biased and
//!   uniform-volume sampling)
//! - `field`: The distance-field capability interface and the default MLP
//!   family with analytic gradients
//! - `optim`: Optimization (Adam, losses, the two-stage curriculum)
//! - `extract`: Volumetric evaluation, surface extraction, pruning
//! - `io`: File I/O (cloud loaders, OBJ export, checkpoints, query cache)
//!
//! ## Pipeline
//!
//! ```text
//! cloud file -> query::load_or_generate -> optim::Trainer::run
//!            -> extract (at checkpoints) -> OBJ mesh
//! ```
//!
//! Every analytic derivative in `field` and `optim::loss` is verified
//! against finite differences in the test suite; gradient bugs fail loudly
//! rather than silently degrading reconstruction quality.

pub mod core;
pub mod extract;
pub mod field;
pub mod io;
pub mod optim;
pub mod query;
pub mod spatial;

// Re-export commonly used types at crate root for convenience
pub use crate::core::{Mesh, PointSet};
pub use field::{DistanceField, MlpConfig, MlpField, TrainableField};
pub use io::LoadError;
pub use optim::{RunConfig, Trainer};
pub use query::{QueryConfig, QuerySet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
