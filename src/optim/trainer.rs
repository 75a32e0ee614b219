//! Two-stage training curriculum.
//!
//! Stage 1 fits the field against correspondences into the raw cloud.
//! At the boundary the frozen field synthesizes extra surface points, the
//! spatial index is rebuilt over the merged cloud, and every query point is
//! re-matched against it. Stage 2 continues with the refined
//! correspondences. The learning-rate schedule and the iteration counter
//! run continuously across both stages.
//!
//! The trainer owns the field parameters exclusively; one update per
//! iteration, no cross-iteration parallelism.

use anyhow::{bail, Context, Result};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::path::{Path, PathBuf};

use crate::core::Mesh;
use crate::extract;
use crate::field::{project_to_surface, TrainableField, GRAD_NORM_EPS};
use crate::io;
use crate::query::QuerySet;
use crate::spatial::{poisson_disk_downsample, SpatialIndex};

use super::adam::AdamF32;
use super::loss::{chamfer_l1_directed, projection_consistency};

/// Number of strata the query array is partitioned into (by index mod 10).
const STRATA: usize = 10;

/// Batch size used while synthesizing the dense cloud at the transition.
const SYNTH_BATCH: usize = 5000;

/// Consecutive synthesis batches allowed to contribute nothing before the
/// transition is declared failed.
const SYNTH_STALL_LIMIT: usize = 200;

/// Every numeric constant of the curriculum. The struct is plain data so a
/// CLI, a config file, or a test can populate it; the defaults document the
/// values the pipeline was tuned with.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Stage-1 end (iterations).
    pub step1_maxiter: u64,
    /// Stage-2 end; also the total iteration count.
    pub step2_maxiter: u64,
    pub batch_size: usize,
    pub batch_size_step2: usize,
    pub learning_rate: f32,
    /// Linear warm-up length in iterations.
    pub warm_up_end: f64,
    /// Progress line interval.
    pub report_freq: u64,
    /// Target size of the synthesized cloud at the stage transition.
    pub eval_num_points: usize,
    /// Predicted-distance cutoff for keeping synthesized points.
    pub df_filter: f32,
    /// Offset-std multiplier for synthesis noise.
    pub low_range: f32,
    /// Synthesized points kept after Poisson-disk downsampling, as a
    /// fraction of the reference cloud size.
    pub extra_points_rate: f32,
    /// Truncation distance for outlier removal on synthesized clouds.
    pub outlier: f32,
    /// Far-point threshold for mesh pruning; non-positive disables it.
    pub far: f32,
    /// Volumetric grid resolution at checkpoints.
    pub resolution: usize,
    /// Half-extent of the extraction box.
    pub bound: f32,
    /// Hidden layout recorded in checkpoints.
    pub hidden: Vec<usize>,
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            step1_maxiter: 40_000,
            step2_maxiter: 60_000,
            batch_size: 5000,
            batch_size_step2: 5000,
            learning_rate: 0.001,
            warm_up_end: 1000.0,
            report_freq: 1000,
            eval_num_points: 1_000_000,
            df_filter: 0.01,
            low_range: 1.1,
            extra_points_rate: 0.1,
            outlier: 0.01,
            far: 0.02,
            resolution: 128,
            bound: 0.55,
            hidden: vec![64, 64, 64, 64],
            seed: 2024,
        }
    }
}

/// Per-iteration report.
#[derive(Debug, Clone, Copy)]
pub struct StepStats {
    pub loss_cd: f32,
    pub loss_proj: f32,
    pub lr: f32,
}

/// Output locations inside a run directory.
struct RunPaths {
    meshes: PathBuf,
    checkpoints: PathBuf,
    clouds: PathBuf,
    losses: PathBuf,
}

impl RunPaths {
    fn create(root: &Path) -> Result<Self> {
        let paths = Self {
            meshes: root.join("mesh"),
            checkpoints: root.join("checkpoints"),
            clouds: root.join("pointcloud"),
            losses: root.join("loss"),
        };
        for dir in [&paths.meshes, &paths.checkpoints, &paths.clouds, &paths.losses] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(paths)
    }
}

pub struct Trainer<F: TrainableField> {
    cfg: RunConfig,
    field: F,
    opt: AdamF32,
    data: QuerySet,
    /// Stage-2 correspondences, present once the transition ran.
    refined_nearest: Option<Vec<Vector3<f32>>>,
    /// Index over the ground-truth cloud, used by both pruning passes.
    gt_index: SpatialIndex,
    grads: Vec<f32>,
    rng: StdRng,
    iter: u64,
    out: Option<RunPaths>,
    loss_history: Vec<f32>,
}

impl<F: TrainableField> Trainer<F> {
    pub fn new(cfg: RunConfig, data: QuerySet, field: F) -> Result<Self> {
        if data.queries.len() <= STRATA {
            bail!(
                "need more than {STRATA} query points, got {}",
                data.queries.len()
            );
        }
        if data.queries.len() != data.nearest.len() {
            bail!("query/correspondence length mismatch");
        }
        if cfg.step1_maxiter == 0 || cfg.step2_maxiter <= cfg.step1_maxiter {
            bail!("stage lengths must satisfy 0 < step1 < step2");
        }

        let gt_index = SpatialIndex::build(&data.cloud);
        let grads = vec![0.0; field.num_params()];
        let rng = StdRng::seed_from_u64(cfg.seed);
        let opt = AdamF32::new(cfg.learning_rate, 0.9, 0.999, 1e-8);

        Ok(Self {
            cfg,
            field,
            opt,
            data,
            refined_nearest: None,
            gt_index,
            grads,
            rng,
            iter: 0,
            out: None,
            loss_history: Vec::new(),
        })
    }

    /// Attach a run directory; checkpoints, meshes, snapshots and the loss
    /// dump are written beneath it.
    pub fn with_output(mut self, root: &Path) -> Result<Self> {
        self.out = Some(RunPaths::create(root)?);
        Ok(self)
    }

    /// Resume the iteration counter from a checkpoint.
    pub fn set_iteration(&mut self, iter: u64) {
        self.iter = iter;
    }

    pub fn iteration(&self) -> u64 {
        self.iter
    }

    pub fn field(&self) -> &F {
        &self.field
    }

    /// Run the full curriculum from the current iteration to the end of
    /// stage 2.
    pub fn run(&mut self) -> Result<()> {
        let t1 = self.cfg.step1_maxiter;
        let t2 = self.cfg.step2_maxiter;

        // A resumed stage-2 run still needs the refined correspondences.
        if self.iter >= t1 && self.refined_nearest.is_none() {
            self.transition()?;
        }

        while self.iter < t2 {
            let stats = self.step()?;

            if self.iter % self.cfg.report_freq == 0 {
                eprintln!(
                    "iter {:6}  cd_l1={:.7}  proj={:.9}  lr={:.7}",
                    self.iter, stats.loss_cd, stats.loss_proj, stats.lr
                );
            }

            if self.iter == t1 || self.iter == t2 {
                self.save_checkpoint()?;
            }

            if self.iter == t1 {
                self.transition()?;
            }

            if self.iter == t2 {
                // Final dense cloud, kept as a diagnostic artifact.
                self.synthesize_cloud(1.0)?;
            }

            if self.iter == t1 || self.iter == t2 {
                let mesh = self.reconstruct();
                if let Some(out) = &self.out {
                    let path = out.meshes.join(format!("{}_mesh.obj", self.iter));
                    io::save_obj(&mesh, &path)?;
                    println!(
                        "mesh: {} vertices, {} faces -> {}",
                        mesh.vertex_count(),
                        mesh.triangle_count(),
                        path.display()
                    );
                }
                self.dump_loss_history()?;
            }
        }

        Ok(())
    }

    /// One optimization step. Public so short curricula can be driven
    /// directly in tests.
    pub fn step(&mut self) -> Result<StepStats> {
        let t1 = self.cfg.step1_maxiter;
        let lr = self.cfg.learning_rate * self.lr_factor();

        let in_stage2 = self.iter >= t1;
        let batch_size = if in_stage2 {
            self.cfg.batch_size_step2
        } else {
            self.cfg.batch_size
        };
        let indices = self.draw_indices(batch_size);

        let queries: Vec<Vector3<f32>> =
            indices.iter().map(|&i| self.data.queries[i]).collect();
        let targets: Vec<Vector3<f32>> = match (&self.refined_nearest, in_stage2) {
            (Some(refined), true) => indices.iter().map(|&i| refined[i]).collect(),
            _ => indices.iter().map(|&i| self.data.nearest[i]).collect(),
        };

        let grad_q = self.field.gradient(&queries);
        let dist_q = self.field.distance(&queries);
        let moved: Vec<Vector3<f32>> = queries
            .iter()
            .zip(grad_q.iter().zip(dist_q.iter()))
            .map(|(q, (g, &d))| project_to_surface(q, g, d))
            .collect();

        let (loss_cd, d_moved) = chamfer_l1_directed(&moved, &targets);

        // The parameter gradient flows through the predicted distance; the
        // projection direction is held fixed within the iteration.
        let mut cotangents: Vec<f32> = d_moved
            .iter()
            .zip(grad_q.iter())
            .map(|(dm, g)| {
                let n = g / g.norm().max(GRAD_NORM_EPS);
                -dm.dot(&n)
            })
            .collect();

        let mut loss_proj = 0.0f32;
        if self.consistency_active() {
            let grad_m = self.field.gradient(&moved);
            let (raw, d_dist) = projection_consistency(&grad_q, &grad_m, &dist_q);
            let w = self.consistency_weight();
            loss_proj = w * raw;
            for (c, dd) in cotangents.iter_mut().zip(d_dist.iter()) {
                *c += w * dd;
            }
        }

        let loss = loss_cd + loss_proj;
        if !loss.is_finite() {
            bail!("non-finite loss at iteration {}", self.iter);
        }

        self.grads.iter_mut().for_each(|g| *g = 0.0);
        self.field.accumulate(&queries, &cotangents, &mut self.grads);
        self.opt.lr = lr;
        self.opt.step(self.field.params_mut(), &self.grads);

        self.loss_history.push(loss_cd);
        self.iter += 1;

        Ok(StepStats {
            loss_cd,
            loss_proj,
            lr,
        })
    }

    /// Evaluate the field over the extraction box and produce the pruned
    /// mesh for the current parameters.
    pub fn reconstruct(&self) -> Mesh {
        let b = self.cfg.bound;
        let volume = extract::evaluate_field(
            &self.field,
            Vector3::new(-b, -b, -b),
            Vector3::new(b, b, b),
            self.cfg.resolution,
        );
        let mesh = extract::extract_mesh(&volume);
        if self.cfg.far > 0.0 {
            extract::remove_far(&mesh, &self.gt_index, self.cfg.far)
        } else {
            mesh
        }
    }

    /// Stage boundary: synthesize surface points with the frozen field,
    /// thin them out, merge with the ground truth, and re-match every query
    /// against the merged cloud.
    fn transition(&mut self) -> Result<()> {
        println!("stage transition at iteration {}", self.iter);

        let generated = self.synthesize_cloud(self.cfg.low_range)?;
        let target =
            ((self.cfg.extra_points_rate * self.data.cloud.len() as f32) as usize).max(1);
        let picked = poisson_disk_downsample(&generated, target, self.cfg.seed ^ 0x9e37);

        let mut merged = self.data.cloud.clone();
        merged.extend(picked.iter().map(|&i| generated[i]));
        println!(
            "merged reference cloud: {} ground truth + {} synthesized",
            self.data.cloud.len(),
            picked.len()
        );

        // Blocking rebuild; training resumes only with the new
        // correspondences in place.
        let merged_index = SpatialIndex::build(&merged);
        let refined: Vec<Vector3<f32>> = self
            .data
            .queries
            .iter()
            .map(|q| merged[merged_index.nearest_one(q).0])
            .collect();
        self.refined_nearest = Some(refined);

        Ok(())
    }

    /// Draw projected samples from the frozen field until `eval_num_points`
    /// survive the distance filter, then drop outliers.
    fn synthesize_cloud(&mut self, low_range: f32) -> Result<Vec<Vector3<f32>>> {
        let mut collected: Vec<Vector3<f32>> = Vec::with_capacity(self.cfg.eval_num_points);
        let mut stalled = 0usize;

        while collected.len() < self.cfg.eval_num_points {
            let indices = self.draw_indices(SYNTH_BATCH);
            let anchors: Vec<Vector3<f32>> =
                indices.iter().map(|&i| self.data.nearest[i]).collect();

            // Noise amplitude follows the query distribution: the global
            // std of query offsets, widened by `low_range`.
            let std = {
                let offsets: Vec<f32> = indices
                    .iter()
                    .map(|&i| self.data.queries[i] - self.data.nearest[i])
                    .flat_map(|o| [o.x, o.y, o.z])
                    .collect();
                let mean: f32 = offsets.iter().sum::<f32>() / offsets.len() as f32;
                let var: f32 = offsets.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>()
                    / (offsets.len() - 1) as f32;
                var.sqrt()
            };
            let extra_std = std * low_range;

            let samples: Vec<Vector3<f32>> = anchors
                .iter()
                .map(|a| {
                    let x: f32 = StandardNormal.sample(&mut self.rng);
                    let y: f32 = StandardNormal.sample(&mut self.rng);
                    let z: f32 = StandardNormal.sample(&mut self.rng);
                    a + extra_std * Vector3::new(x, y, z)
                })
                .collect();

            let grads = self.field.gradient(&samples);
            let dists = self.field.distance(&samples);

            let before = collected.len();
            for ((s, g), &d) in samples.iter().zip(grads.iter()).zip(dists.iter()) {
                if d < self.cfg.df_filter {
                    collected.push(project_to_surface(s, g, d));
                }
            }

            if collected.len() == before {
                stalled += 1;
                if stalled >= SYNTH_STALL_LIMIT {
                    bail!(
                        "field produced no points under df_filter={} for {} batches \
                         (iteration {})",
                        self.cfg.df_filter,
                        SYNTH_STALL_LIMIT,
                        self.iter
                    );
                }
            } else {
                stalled = 0;
            }
        }

        collected.truncate(self.cfg.eval_num_points);

        if let Some(out) = &self.out {
            let path = out.clouds.join(format!("point_cloud{}.xyz", self.iter));
            io::save_xyz(&collected, &path)?;
        }

        Ok(extract::remove_outliers(
            &collected,
            &self.gt_index,
            self.cfg.outlier,
        ))
    }

    /// Stratified draw: one stratum per iteration, sampled without
    /// replacement inside it.
    fn draw_indices(&mut self, batch: usize) -> Vec<usize> {
        let usable = self.data.queries.len() - 1;
        let per_stratum = usable / STRATA;
        let coarse = self.rng.gen_range(0..STRATA);
        let amount = batch.min(per_stratum);
        rand::seq::index::sample(&mut self.rng, per_stratum, amount)
            .iter()
            .map(|fine| fine * STRATA + coarse)
            .collect()
    }

    fn consistency_active(&self) -> bool {
        (self.iter as f64) > 0.8 * self.cfg.step1_maxiter as f64
    }

    /// 0.1 for the first 10% of stage 1, 0.01 afterwards and throughout
    /// stage 2.
    fn consistency_weight(&self) -> f32 {
        if (self.iter as f64) < 0.1 * self.cfg.step1_maxiter as f64 {
            0.1
        } else {
            0.01
        }
    }

    /// Warm-up then cosine decay, over the continuous iteration counter.
    fn lr_factor(&self) -> f32 {
        let iter = self.iter as f64;
        let warm_up = self.cfg.warm_up_end;
        let max_iter = self.cfg.step2_maxiter as f64;

        let factor = if warm_up > 0.0 && iter < warm_up {
            iter / warm_up
        } else {
            let span = (max_iter - warm_up).max(1.0);
            0.5 * (((iter - warm_up) / span * std::f64::consts::PI).cos() + 1.0)
        };
        factor as f32
    }

    fn save_checkpoint(&self) -> Result<()> {
        let Some(out) = &self.out else {
            return Ok(());
        };
        let path = out
            .checkpoints
            .join(format!("ckpt_{:0>6}.udf", self.iter));
        io::save_checkpoint(&path, self.iter, &self.cfg.hidden, self.field.params())
            .with_context(|| format!("writing checkpoint {}", path.display()))?;
        println!("checkpoint: {}", path.display());
        Ok(())
    }

    fn dump_loss_history(&self) -> Result<()> {
        let Some(out) = &self.out else {
            return Ok(());
        };
        use std::io::Write;
        let path = out.losses.join("loss_cd_values.txt");
        let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
        for v in &self.loss_history {
            writeln!(file, "{v}")?;
        }
        Ok(())
    }
}
