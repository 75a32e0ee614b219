//! Exact nearest-point correspondence.
//!
//! Brute-force assignment of every batch point to its closest reference
//! point. Quadratic on purpose: the query generator calls this on chunks no
//! larger than the reference set, and the assignment must be exact,
//! deterministic, and stable under distance ties (lowest index wins), which
//! approximate tree traversal orders do not guarantee.

use nalgebra::Vector3;
use rayon::prelude::*;

/// Numerical floor inside the stabilized square root. Keeps the distance
/// differentiable at coincident points when this kernel is reused inside a
/// gradient path.
const DIST_EPS: f32 = 1e-12;

/// For each point in `batch`, the index of the closest point in `reference`.
///
/// Distances are `sqrt(sum(sq diff) + eps)`; ties resolve to the first
/// (lowest) reference index. The batch is processed in chunks of at most
/// `reference.len()` points so peak intermediate state is bounded by the
/// reference size.
pub fn nearest_point(batch: &[Vector3<f32>], reference: &[Vector3<f32>]) -> Vec<usize> {
    assert!(!reference.is_empty(), "reference set must be non-empty");

    let chunk = reference.len().max(1);
    let mut out = vec![0usize; batch.len()];

    for (block, slots) in batch.chunks(chunk).zip(out.chunks_mut(chunk)) {
        slots
            .par_iter_mut()
            .zip(block.par_iter())
            .for_each(|(slot, q)| {
                let mut best = f32::INFINITY;
                let mut best_idx = 0usize;
                for (j, r) in reference.iter().enumerate() {
                    let d = q - r;
                    let dist = (d.dot(&d) + DIST_EPS).sqrt();
                    // Strict less-than keeps the lowest index on ties.
                    if dist < best {
                        best = dist;
                        best_idx = j;
                    }
                }
                *slot = best_idx;
            });
    }

    out
}
