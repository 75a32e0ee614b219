//! Triangle mesh data structure.

use nalgebra::Vector3;

/// A triangle mesh with per-vertex normals.
///
/// Immutable once produced by surface extraction; pruning passes build a new
/// mesh rather than editing one in place.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    /// Triangles as index triples into `vertices`.
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}
