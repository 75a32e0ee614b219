//! End-to-end reconstruction on a synthetic sphere.
//!
//! A 600-point cloud on a unit sphere goes through the full pipeline with a
//! deliberately trivial trainable field (a parametric sphere): query
//! generation, both curriculum stages including the transition, volumetric
//! evaluation, extraction and pruning. After normalization the cloud sits
//! on a radius-0.5 sphere, so every extracted vertex must end up near that
//! radius.

use nalgebra::Vector3;

use udf_rs::field::{DistanceField, TrainableField};
use udf_rs::query::{self, QueryConfig};
use udf_rs::{RunConfig, Trainer};

/// Trivial field family: a sphere with trainable center and radius.
struct SphereField {
    /// [cx, cy, cz, radius]
    params: Vec<f32>,
}

impl SphereField {
    fn new(radius: f32) -> Self {
        Self {
            params: vec![0.0, 0.0, 0.0, radius],
        }
    }

    fn center(&self) -> Vector3<f32> {
        Vector3::new(self.params[0], self.params[1], self.params[2])
    }

    fn radius(&self) -> f32 {
        self.params[3]
    }
}

impl DistanceField for SphereField {
    fn distance(&self, points: &[Vector3<f32>]) -> Vec<f32> {
        let c = self.center();
        points.iter().map(|p| ((p - c).norm() - self.radius()).abs()).collect()
    }

    fn gradient(&self, points: &[Vector3<f32>]) -> Vec<Vector3<f32>> {
        let c = self.center();
        points
            .iter()
            .map(|p| {
                let d = p - c;
                let rho = d.norm();
                if rho < 1e-9 {
                    Vector3::zeros()
                } else {
                    d / rho * (rho - self.radius()).signum()
                }
            })
            .collect()
    }
}

impl TrainableField for SphereField {
    fn num_params(&self) -> usize {
        4
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn accumulate(&self, points: &[Vector3<f32>], cotangents: &[f32], grads: &mut [f32]) {
        let c = self.center();
        for (p, &cot) in points.iter().zip(cotangents.iter()) {
            if cot == 0.0 {
                continue;
            }
            let d = p - c;
            let rho = d.norm();
            let sign = (rho - self.radius()).signum();
            if rho >= 1e-9 {
                let dc = d / rho * (-sign);
                grads[0] += cot * dc.x;
                grads[1] += cot * dc.y;
                grads[2] += cot * dc.z;
            }
            grads[3] += cot * (-sign);
        }
    }
}

fn sphere_cloud(n: usize, radius: f32) -> Vec<Vector3<f32>> {
    let golden = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
    (0..n)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / n as f32;
            let r = (1.0 - y * y).sqrt();
            let t = golden * i as f32;
            Vector3::new(r * t.cos(), y, r * t.sin()) * radius
        })
        .collect()
}

fn test_configs() -> (QueryConfig, RunConfig) {
    let query_cfg = QueryConfig {
        sigma_k: 8,
        density_k: 30,
        query_budget: 5000,
        seed: 11,
        ..QueryConfig::default()
    };
    let run_cfg = RunConfig {
        step1_maxiter: 60,
        step2_maxiter: 120,
        batch_size: 512,
        batch_size_step2: 512,
        learning_rate: 0.02,
        warm_up_end: 0.0,
        report_freq: 1000,
        eval_num_points: 2000,
        df_filter: 0.02,
        low_range: 1.1,
        extra_points_rate: 0.1,
        outlier: 0.05,
        far: 0.1,
        resolution: 48,
        bound: 0.55,
        hidden: vec![],
        seed: 11,
        ..RunConfig::default()
    };
    (query_cfg, run_cfg)
}

#[test]
fn test_sphere_reconstruction_end_to_end() {
    let cloud = sphere_cloud(600, 1.0);
    let (query_cfg, run_cfg) = test_configs();

    let set = query::generate(&cloud, &query_cfg, None).unwrap();
    assert_eq!(set.cloud.len(), 600);

    // Start away from the answer; the curriculum has to move the radius.
    let field = SphereField::new(0.3);

    let out = tempfile::tempdir().unwrap();
    let mut trainer = Trainer::new(run_cfg, set, field)
        .unwrap()
        .with_output(out.path())
        .unwrap();
    trainer.run().unwrap();

    // The normalized cloud lies on a radius-0.5 sphere.
    let fitted = trainer.field().radius();
    assert!(
        (fitted - 0.5).abs() < 0.08,
        "fitted radius {fitted}, expected about 0.5"
    );
    assert!(trainer.field().center().norm() < 0.08);

    let mesh = trainer.reconstruct();
    assert!(!mesh.is_empty(), "reconstruction produced no mesh");
    for v in &mesh.vertices {
        let err = (v.norm() - 0.5).abs();
        assert!(err < 0.1, "vertex at radius {} off by {err}", v.norm());
    }

    // Checkpoints and meshes were written at both stage boundaries.
    assert!(out.path().join("checkpoints/ckpt_000060.udf").exists());
    assert!(out.path().join("checkpoints/ckpt_000120.udf").exists());
    assert!(out.path().join("mesh/60_mesh.obj").exists());
    assert!(out.path().join("mesh/120_mesh.obj").exists());
    assert!(out.path().join("loss/loss_cd_values.txt").exists());
}

#[test]
fn test_trainer_rejects_inverted_stage_lengths() {
    let cloud = sphere_cloud(600, 1.0);
    let (query_cfg, mut run_cfg) = test_configs();
    run_cfg.step1_maxiter = 100;
    run_cfg.step2_maxiter = 50; // inverted stages

    let set = query::generate(&cloud, &query_cfg, None).unwrap();
    assert!(Trainer::new(run_cfg, set, SphereField::new(0.3)).is_err());
}
