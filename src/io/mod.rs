//! I/O operations for loading and saving data.
//!
//! This module handles all file format parsing and export:
//! - point cloud loaders (PLY, XYZ, NPY)
//! - XYZ snapshots for diagnostics
//! - OBJ mesh export
//! - binary checkpoint and query-cache artifacts

mod cache;
mod checkpoint;
mod cloud;
mod obj;

pub use cache::{load_query_set, save_query_set};
pub use checkpoint::{load_checkpoint, save_checkpoint, Checkpoint};
pub use cloud::{load_point_cloud, save_xyz};
pub use obj::save_obj;

use thiserror::Error;

/// Errors that can occur while reading or writing artifacts.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported point cloud format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid file contents: {0}")]
    InvalidFormat(String),

    #[error("invalid magic bytes (not a {0} file)")]
    InvalidMagic(&'static str),

    #[error("unsupported artifact version: {0}")]
    UnsupportedVersion(u32),
}
