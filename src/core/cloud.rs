//! Normalized point cloud representation.
//!
//! Every pipeline stage works in a canonical coordinate frame: the input
//! cloud is shifted so its bounding box is centered at the origin and scaled
//! so the largest axis extent equals 1. The transform is kept so callers can
//! map results back to the input frame if they need to.

use nalgebra::Vector3;

/// A point cloud normalized to an origin-centered, unit-extent bounding box.
///
/// Immutable after construction: the training pipeline treats the ground
/// truth cloud as read-only and swaps in *new* clouds (e.g. the augmented
/// reference at the stage transition) rather than mutating this one.
#[derive(Debug, Clone)]
pub struct PointSet {
    /// Normalized coordinates, every component in [-0.5, 0.5].
    pub points: Vec<Vector3<f32>>,

    /// Bounding-box center of the raw input.
    pub center: Vector3<f32>,

    /// Largest per-axis extent of the raw input (the normalization divisor).
    pub scale: f32,
}

impl PointSet {
    /// Normalize a raw cloud.
    ///
    /// The bounding box center moves to the origin and all coordinates are
    /// divided by the largest axis extent, so the widest axis spans exactly
    /// [-0.5, 0.5]. Degenerate clouds (all points coincident) use scale 1 to
    /// avoid dividing by zero.
    pub fn from_raw(raw: Vec<Vector3<f32>>) -> Self {
        assert!(!raw.is_empty(), "cannot normalize an empty point cloud");

        let (min, max) = cloud_bounds(&raw);
        let center = (min + max) * 0.5;
        let extent = max - min;
        let scale = extent.x.max(extent.y).max(extent.z);
        let scale = if scale > 0.0 { scale } else { 1.0 };

        let points = raw.iter().map(|p| (p - center) / scale).collect();

        Self {
            points,
            center,
            scale,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Bounding box of the normalized points.
    pub fn bounds(&self) -> (Vector3<f32>, Vector3<f32>) {
        cloud_bounds(&self.points)
    }
}

/// Axis-aligned bounding box of a point slice.
pub fn cloud_bounds(points: &[Vector3<f32>]) -> (Vector3<f32>, Vector3<f32>) {
    let mut min = points[0];
    let mut max = points[0];
    for p in points {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        min.z = min.z.min(p.z);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
        max.z = max.z.max(p.z);
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalization_unit_extent_centered() {
        let raw = vec![
            Vector3::new(2.0, 10.0, -1.0),
            Vector3::new(6.0, 11.0, 0.0),
            Vector3::new(4.0, 12.0, 1.0),
        ];
        let set = PointSet::from_raw(raw);

        let (min, max) = set.bounds();
        let extent = max - min;

        // Largest axis spans exactly 1 and the box is centered at the origin.
        let widest = extent.x.max(extent.y).max(extent.z);
        assert_relative_eq!(widest, 1.0, epsilon = 1e-6);
        let box_center = (min + max) * 0.5;
        assert_relative_eq!(box_center.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(box_center.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(box_center.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_normalization_degenerate_cloud() {
        let raw = vec![Vector3::new(3.0, 3.0, 3.0); 4];
        let set = PointSet::from_raw(raw);
        for p in &set.points {
            assert_relative_eq!(p.norm(), 0.0, epsilon = 1e-6);
        }
    }
}
