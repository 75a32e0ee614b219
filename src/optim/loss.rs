//! Loss functions for field fitting.
//!
//! Both losses return the scalar value together with the gradients the
//! trainer needs, so every derivative lives next to the quantity it
//! differentiates.

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::field::GRAD_NORM_EPS;

/// Fixed padded length of the distance-weight vector in the consistency
/// term. Keeps the normalization constant across iterations no matter how
/// many samples qualify.
pub const CONSISTENCY_PAD: usize = 5000;

/// Only near-surface samples (predicted distance below this) carry their
/// own weight in the consistency term.
pub const CONSISTENCY_CLIP: f32 = 0.03;

/// One-directional L1 Chamfer distance: every projected point against its
/// nearest reference point *within the batch*.
///
/// Returns `(loss, d_loss/d_projected)`. The nearest-point search is brute
/// force over the batch; ties keep the lowest reference index.
pub fn chamfer_l1_directed(
    projected: &[Vector3<f32>],
    reference: &[Vector3<f32>],
) -> (f32, Vec<Vector3<f32>>) {
    assert!(!projected.is_empty() && !reference.is_empty());

    let n = projected.len() as f32;
    let per_point: Vec<(f32, Vector3<f32>)> = projected
        .par_iter()
        .map(|m| {
            let mut best = f32::INFINITY;
            let mut best_ref = reference[0];
            for r in reference {
                let d = m - r;
                let dist = d.dot(&d);
                if dist < best {
                    best = dist;
                    best_ref = *r;
                }
            }
            let diff = m - best_ref;
            let dist = diff.norm();
            // d||diff||/d(m) = diff / ||diff||; zero at coincidence.
            let grad = diff / dist.max(GRAD_NORM_EPS) / n;
            (dist / n, grad)
        })
        .collect();

    let mut loss = 0.0f32;
    let mut grads = Vec::with_capacity(per_point.len());
    for (l, g) in per_point {
        loss += l;
        grads.push(g);
    }
    (loss, grads)
}

/// Projection-consistency penalty.
///
/// For each sample, `1 - |cos|` between the field gradient at the query and
/// at its projection; samples whose predicted distance is below
/// [`CONSISTENCY_CLIP`] contribute an `exp(10·d)` weight, and the weight
/// vector is zero-padded to [`CONSISTENCY_PAD`] entries (a padding entry
/// weighs `exp(0) = 1`). Weights pair with penalties cyclically so the term
/// is defined for any batch size.
///
/// Returns `(loss, d_loss/d_distance)` with the distance gradient aligned
/// to the input batch; the direction factors are treated as constants (see
/// DESIGN.md).
pub fn projection_consistency(
    grad_at_query: &[Vector3<f32>],
    grad_at_projected: &[Vector3<f32>],
    distances: &[f32],
) -> (f32, Vec<f32>) {
    let b = grad_at_query.len();
    assert_eq!(b, grad_at_projected.len());
    assert_eq!(b, distances.len());
    assert!(b > 0);

    let penalty: Vec<f32> = grad_at_query
        .iter()
        .zip(grad_at_projected.iter())
        .map(|(a, c)| {
            let cos = a.dot(c) / (a.norm() * c.norm()).max(GRAD_NORM_EPS);
            1.0 - cos.abs()
        })
        .collect();

    let near: Vec<(usize, f32)> = distances
        .iter()
        .enumerate()
        .filter(|(_, &d)| d < CONSISTENCY_CLIP)
        .map(|(i, &d)| (i, d))
        .collect();

    let padded_len = near.len().max(CONSISTENCY_PAD);
    let norm = padded_len as f32;

    let mut loss = 0.0f32;
    let mut d_dist = vec![0.0f32; b];

    for k in 0..padded_len {
        let (weight, source) = match near.get(k) {
            Some(&(i, d)) => ((10.0 * d.abs()).exp(), Some(i)),
            None => (1.0, None),
        };
        let contribution = weight * penalty[k % b];
        loss += contribution;
        if let Some(i) = source {
            // d(exp(10 d) · c)/dd = 10 · exp(10 d) · c, distances being
            // nonnegative.
            d_dist[i] += 10.0 * contribution;
        }
    }

    (loss / norm, d_dist.iter().map(|g| g / norm).collect())
}
