//! k-d tree index over a fixed reference cloud.
//!
//! Built once per reference set and rebuilt wholesale when the reference
//! changes (this happens exactly once, at the stage-one/stage-two
//! transition). Queries return Euclidean distances; the tree internally
//! works on squared distances.

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use nalgebra::Vector3;
use rayon::prelude::*;

/// Nearest-neighbor index over an immutable reference point set.
pub struct SpatialIndex {
    tree: ImmutableKdTree<f32, 3>,
    points: Vec<Vector3<f32>>,
}

impl SpatialIndex {
    pub fn build(points: &[Vector3<f32>]) -> Self {
        assert!(!points.is_empty(), "cannot index an empty point set");
        let entries: Vec<[f32; 3]> = points.iter().map(|p| [p.x, p.y, p.z]).collect();
        let tree = ImmutableKdTree::new_from_slice(&entries);
        Self {
            tree,
            points: points.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The indexed points, in insertion order.
    pub fn points(&self) -> &[Vector3<f32>] {
        &self.points
    }

    /// Index and Euclidean distance of the nearest reference point.
    pub fn nearest_one(&self, query: &Vector3<f32>) -> (usize, f32) {
        let hit = self
            .tree
            .nearest_one::<SquaredEuclidean>(&[query.x, query.y, query.z]);
        (hit.item as usize, hit.distance.sqrt())
    }

    /// Indices and Euclidean distances of the `k` nearest reference points,
    /// closest first. `k` is clamped to the reference size.
    pub fn nearest_n(&self, query: &Vector3<f32>, k: usize) -> Vec<(usize, f32)> {
        let k = k.min(self.points.len());
        self.tree
            .nearest_n::<SquaredEuclidean>(&[query.x, query.y, query.z], k)
            .into_iter()
            .map(|n| (n.item as usize, n.distance.sqrt()))
            .collect()
    }

    /// Per-point local scale: distance from each indexed point to its k-th
    /// nearest neighbor (the query point itself counts as neighbor 1).
    ///
    /// Processed in fixed-size batches so peak memory stays proportional to
    /// the batch, not the cloud.
    pub fn local_scale(&self, k: usize, batch: usize) -> Vec<f32> {
        let k = k.min(self.points.len());
        let mut out = vec![0.0f32; self.points.len()];
        for (chunk_idx, chunk) in out.chunks_mut(batch.max(1)).enumerate() {
            let offset = chunk_idx * batch.max(1);
            chunk.par_iter_mut().enumerate().for_each(|(i, slot)| {
                let p = &self.points[offset + i];
                let hits = self
                    .tree
                    .nearest_n::<SquaredEuclidean>(&[p.x, p.y, p.z], k);
                *slot = hits.last().map(|n| n.distance.sqrt()).unwrap_or(0.0);
            });
        }
        out
    }

    /// Mean distance from each indexed point to its `k` nearest neighbors.
    /// Large values flag sparse neighborhoods (edges, thin structures).
    pub fn mean_neighbor_distance(&self, k: usize) -> Vec<f32> {
        let k = k.min(self.points.len());
        self.points
            .par_iter()
            .map(|p| {
                let hits = self
                    .tree
                    .nearest_n::<SquaredEuclidean>(&[p.x, p.y, p.z], k);
                let sum: f32 = hits.iter().map(|n| n.distance.sqrt()).sum();
                sum / hits.len().max(1) as f32
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_cloud() -> Vec<Vector3<f32>> {
        let mut pts = Vec::new();
        for x in 0..4 {
            for y in 0..4 {
                pts.push(Vector3::new(x as f32, y as f32, 0.0));
            }
        }
        pts
    }

    #[test]
    fn test_nearest_one_exact_hit() {
        let cloud = grid_cloud();
        let index = SpatialIndex::build(&cloud);
        let (idx, dist) = index.nearest_one(&Vector3::new(2.0, 3.0, 0.0));
        assert_relative_eq!(dist, 0.0, epsilon = 1e-6);
        assert_relative_eq!(cloud[idx].x, 2.0, epsilon = 1e-6);
        assert_relative_eq!(cloud[idx].y, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_nearest_n_sorted_and_clamped() {
        let cloud = grid_cloud();
        let index = SpatialIndex::build(&cloud);
        let hits = index.nearest_n(&Vector3::new(0.1, 0.0, 0.0), 100);
        assert_eq!(hits.len(), cloud.len());
        for pair in hits.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
        assert_relative_eq!(hits[0].1, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn test_local_scale_on_unit_grid() {
        let cloud = grid_cloud();
        let index = SpatialIndex::build(&cloud);
        // k = 2: the point itself plus its closest neighbor, which on a unit
        // grid is always at distance 1.
        let sigma = index.local_scale(2, 5);
        assert_eq!(sigma.len(), cloud.len());
        for s in sigma {
            assert_relative_eq!(s, 1.0, epsilon = 1e-5);
        }
    }
}
