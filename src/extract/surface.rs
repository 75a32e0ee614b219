//! Surface extraction from an unsigned field, plus pruning passes.
//!
//! An unsigned field never changes sign, so sign-crossing isosurfacers see
//! nothing. We recover a pseudo-signed field first: gradients on opposite
//! sides of the surface point away from each other, so a breadth-first walk
//! over the grid flips the running sign whenever adjacent gradients oppose
//! (`dot < 0`). The pseudo-signed volume then goes through surface nets,
//! and vertices are mapped back to world coordinates.
//!
//! Pruning is two independent nearest-neighbor thresholds:
//! - `remove_far` drops mesh vertices (and incident faces) far from the
//!   ground-truth cloud;
//! - `remove_outliers` filters raw generated point clouds.

use std::collections::VecDeque;

use fast_surface_nets::ndshape::RuntimeShape;
use fast_surface_nets::{surface_nets, SurfaceNetsBuffer};
use nalgebra::Vector3;

use crate::core::Mesh;
use crate::spatial::SpatialIndex;

use super::VolumeGrid;

/// Per-voxel pseudo-signs (+1 outside, -1 inside) derived from gradient
/// direction by breadth-first propagation from the grid corner, which lies
/// outside any surface contained in the box.
fn assign_signs(volume: &VolumeGrid) -> Vec<f32> {
    let r = volume.resolution;
    let n = r * r * r;
    let mut signs = vec![1.0f32; n];
    let mut visited = vec![false; n];

    let mut queue = VecDeque::new();
    visited[0] = true;
    queue.push_back((0usize, 0usize, 0usize));

    while let Some((x, y, z)) = queue.pop_front() {
        let here = volume.index(x, y, z);
        let g_here = volume.gradients[here];

        let push = |nx: usize, ny: usize, nz: usize,
                        signs: &mut Vec<f32>,
                        visited: &mut Vec<bool>,
                        queue: &mut VecDeque<(usize, usize, usize)>| {
            let idx = volume.index(nx, ny, nz);
            if visited[idx] {
                return;
            }
            visited[idx] = true;
            let flip = g_here.dot(&volume.gradients[idx]) < 0.0;
            signs[idx] = if flip { -signs[here] } else { signs[here] };
            queue.push_back((nx, ny, nz));
        };

        if x > 0 {
            push(x - 1, y, z, &mut signs, &mut visited, &mut queue);
        }
        if x + 1 < r {
            push(x + 1, y, z, &mut signs, &mut visited, &mut queue);
        }
        if y > 0 {
            push(x, y - 1, z, &mut signs, &mut visited, &mut queue);
        }
        if y + 1 < r {
            push(x, y + 1, z, &mut signs, &mut visited, &mut queue);
        }
        if z > 0 {
            push(x, y, z - 1, &mut signs, &mut visited, &mut queue);
        }
        if z + 1 < r {
            push(x, y, z + 1, &mut signs, &mut visited, &mut queue);
        }
    }

    signs
}

/// Extract a triangle mesh from the value/gradient volume.
pub fn extract_mesh(volume: &VolumeGrid) -> Mesh {
    let r = volume.resolution as u32;
    let signs = assign_signs(volume);
    let signed: Vec<f32> = volume
        .values
        .iter()
        .zip(signs.iter())
        .map(|(v, s)| v * s)
        .collect();

    let shape = RuntimeShape::<u32, 3>::new([r, r, r]);
    let mut buffer = SurfaceNetsBuffer::default();
    surface_nets(&signed, &shape, [0; 3], [r - 1, r - 1, r - 1], &mut buffer);

    let cell = volume.cell_size();
    let vertices: Vec<Vector3<f32>> = buffer
        .positions
        .iter()
        .map(|p| {
            Vector3::new(
                volume.bound_min.x + p[0] * cell.x,
                volume.bound_min.y + p[1] * cell.y,
                volume.bound_min.z + p[2] * cell.z,
            )
        })
        .collect();
    let normals: Vec<Vector3<f32>> = buffer
        .normals
        .iter()
        .map(|n| Vector3::new(n[0], n[1], n[2]))
        .collect();
    let triangles: Vec<[u32; 3]> = buffer
        .indices
        .chunks_exact(3)
        .map(|t| [t[0], t[1], t[2]])
        .collect();

    Mesh {
        vertices,
        normals,
        triangles,
    }
}

/// Drop mesh vertices farther than `threshold` from the nearest ground-truth
/// point, together with every face touching them.
pub fn remove_far(mesh: &Mesh, ground_truth: &SpatialIndex, threshold: f32) -> Mesh {
    let mut remap = vec![u32::MAX; mesh.vertices.len()];
    let mut vertices = Vec::new();
    let mut normals = Vec::new();

    for (i, v) in mesh.vertices.iter().enumerate() {
        let (_, dist) = ground_truth.nearest_one(v);
        if dist <= threshold {
            remap[i] = vertices.len() as u32;
            vertices.push(*v);
            if let Some(n) = mesh.normals.get(i) {
                normals.push(*n);
            }
        }
    }

    let triangles = mesh
        .triangles
        .iter()
        .filter_map(|t| {
            let a = remap[t[0] as usize];
            let b = remap[t[1] as usize];
            let c = remap[t[2] as usize];
            if a != u32::MAX && b != u32::MAX && c != u32::MAX {
                Some([a, b, c])
            } else {
                None
            }
        })
        .collect();

    Mesh {
        vertices,
        normals,
        triangles,
    }
}

/// Keep only generated points within `dis_trunc` of the ground-truth cloud.
pub fn remove_outliers(
    points: &[Vector3<f32>],
    ground_truth: &SpatialIndex,
    dis_trunc: f32,
) -> Vec<Vector3<f32>> {
    points
        .iter()
        .filter(|p| ground_truth.nearest_one(p).1 <= dis_trunc)
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::evaluate_field;
    use crate::field::DistanceField;

    struct SphereUdf {
        radius: f32,
    }

    impl DistanceField for SphereUdf {
        fn distance(&self, points: &[Vector3<f32>]) -> Vec<f32> {
            points.iter().map(|p| (p.norm() - self.radius).abs()).collect()
        }

        fn gradient(&self, points: &[Vector3<f32>]) -> Vec<Vector3<f32>> {
            points
                .iter()
                .map(|p| {
                    let n = p.norm();
                    if n < 1e-9 {
                        Vector3::zeros()
                    } else {
                        p / n * (n - self.radius).signum()
                    }
                })
                .collect()
        }
    }

    fn sphere_volume(radius: f32, res: usize) -> VolumeGrid {
        evaluate_field(
            &SphereUdf { radius },
            Vector3::new(-0.5, -0.5, -0.5),
            Vector3::new(0.5, 0.5, 0.5),
            res,
        )
    }

    #[test]
    fn test_sign_assignment_separates_inside_and_outside() {
        let volume = sphere_volume(0.3, 17);
        let signs = assign_signs(&volume);
        // Grid corner is outside, grid center is inside the sphere.
        assert_eq!(signs[volume.index(0, 0, 0)], 1.0);
        assert_eq!(signs[volume.index(8, 8, 8)], -1.0);
    }

    #[test]
    fn test_extracted_sphere_vertices_sit_on_the_surface() {
        let volume = sphere_volume(0.3, 33);
        let mesh = extract_mesh(&volume);
        assert!(!mesh.is_empty(), "sphere extraction produced no geometry");
        assert_eq!(mesh.vertices.len(), mesh.normals.len());

        // Cell size is 1/32; vertices should sit within about one cell of
        // the analytic radius.
        for v in &mesh.vertices {
            let err = (v.norm() - 0.3).abs();
            assert!(err < 0.06, "vertex at radius {} off by {err}", v.norm());
        }
    }

    #[test]
    fn test_remove_far_thresholds_vertices_and_faces() {
        let ground_truth = SpatialIndex::build(&[Vector3::new(0.0, 0.0, 0.0)]);
        let mesh = Mesh {
            vertices: vec![
                Vector3::new(0.5, 0.0, 0.0),
                Vector3::new(0.0, 0.5, 0.0),
                Vector3::new(10.0, 0.0, 0.0),
            ],
            normals: vec![Vector3::new(0.0, 0.0, 1.0); 3],
            triangles: vec![[0, 1, 2]],
        };

        let pruned = remove_far(&mesh, &ground_truth, 1.0);
        // The distant vertex disappears and takes its face with it; the
        // near vertices survive.
        assert_eq!(pruned.vertices.len(), 2);
        assert!(pruned.triangles.is_empty());
        assert!(pruned.vertices.iter().all(|v| v.norm() <= 1.0));
    }

    #[test]
    fn test_remove_outliers_filters_distant_points() {
        let ground_truth = SpatialIndex::build(&[
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
        ]);
        let generated = vec![
            Vector3::new(0.05, 0.0, 0.0),
            Vector3::new(0.95, 0.0, 0.0),
            Vector3::new(5.0, 5.0, 5.0),
        ];
        let kept = remove_outliers(&generated, &ground_truth, 0.2);
        assert_eq!(kept.len(), 2);
    }
}
