//! Dense volumetric field evaluation.
//!
//! Samples distance and gradient on a `resolution³` grid over an
//! axis-aligned box. Evaluation walks the grid in 32³ blocks so peak
//! intermediate memory is bounded by the block, not the volume; every grid
//! point is computed independently, so the blocked result is bit-identical
//! to a single-pass one.

use nalgebra::Vector3;

use crate::field::DistanceField;

/// Grid points processed per axis per block.
const BLOCK: usize = 32;

/// Dense distance + gradient volume.
///
/// Storage is x-fastest: `index = x + r*(y + r*z)`, matching the layout the
/// surface extractor feeds to the isosurfacer. Never mutated after
/// population.
#[derive(Debug, Clone)]
pub struct VolumeGrid {
    pub resolution: usize,
    pub bound_min: Vector3<f32>,
    pub bound_max: Vector3<f32>,
    pub values: Vec<f32>,
    pub gradients: Vec<Vector3<f32>>,
}

impl VolumeGrid {
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.resolution * (y + self.resolution * z)
    }

    /// World-space coordinate of a grid point.
    pub fn position(&self, x: usize, y: usize, z: usize) -> Vector3<f32> {
        let r = self.resolution;
        let t = |i: usize, min: f32, max: f32| {
            if r > 1 {
                min + (max - min) * i as f32 / (r - 1) as f32
            } else {
                min
            }
        };
        Vector3::new(
            t(x, self.bound_min.x, self.bound_max.x),
            t(y, self.bound_min.y, self.bound_max.y),
            t(z, self.bound_min.z, self.bound_max.z),
        )
    }

    /// Grid spacing per axis.
    pub fn cell_size(&self) -> Vector3<f32> {
        let denom = (self.resolution.max(2) - 1) as f32;
        (self.bound_max - self.bound_min) / denom
    }
}

/// Evaluate `field` over the grid, block by block.
pub fn evaluate_field<F: DistanceField + ?Sized>(
    field: &F,
    bound_min: Vector3<f32>,
    bound_max: Vector3<f32>,
    resolution: usize,
) -> VolumeGrid {
    assert!(resolution >= 2, "resolution must be at least 2");

    let mut grid = VolumeGrid {
        resolution,
        bound_min,
        bound_max,
        values: vec![0.0; resolution * resolution * resolution],
        gradients: vec![Vector3::zeros(); resolution * resolution * resolution],
    };

    let blocks = resolution.div_ceil(BLOCK);
    let mut points = Vec::with_capacity(BLOCK * BLOCK * BLOCK);

    for bz in 0..blocks {
        for by in 0..blocks {
            for bx in 0..blocks {
                let xs = bx * BLOCK..((bx + 1) * BLOCK).min(resolution);
                let ys = by * BLOCK..((by + 1) * BLOCK).min(resolution);
                let zs = bz * BLOCK..((bz + 1) * BLOCK).min(resolution);

                points.clear();
                for z in zs.clone() {
                    for y in ys.clone() {
                        for x in xs.clone() {
                            points.push(grid.position(x, y, z));
                        }
                    }
                }

                let values = field.distance(&points);
                let gradients = field.gradient(&points);

                let mut cursor = 0;
                for z in zs.clone() {
                    for y in ys.clone() {
                        for x in xs.clone() {
                            let i = grid.index(x, y, z);
                            grid.values[i] = values[cursor];
                            grid.gradients[i] = gradients[cursor];
                            cursor += 1;
                        }
                    }
                }
            }
        }
    }

    grid
}
