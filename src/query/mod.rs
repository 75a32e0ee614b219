//! Training query generation.
//!
//! Builds the supervision set for field fitting without any ground-truth
//! distances: query points are scattered around the cloud with noise scaled
//! to the local point spacing, extra samples are concentrated near sparse
//! "edge" regions so thin features survive, and a small uniform batch keeps
//! the empty volume covered. Each query is paired with its exact nearest
//! cloud point; the pair is the only label the trainer ever sees.

use anyhow::{bail, Context, Result};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::path::Path;

use crate::core::PointSet;
use crate::io;
use crate::spatial::{nearest_point, SpatialIndex};

/// Knobs of the generation process. Defaults follow the values the training
/// pipeline was tuned with; the CLI can override any of them.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// The cloud is subsampled to a multiple of this many groups.
    pub group_divisor: usize,
    /// Local scale = distance to this-th nearest neighbor (self included).
    pub sigma_k: usize,
    /// Neighborhood size for the sparsity statistic.
    pub density_k: usize,
    /// Points above this percentile of mean neighbor distance are edges.
    pub edge_percentile: f64,
    /// Master noise scale for all perturbation modes.
    pub noise_scale: f32,
    /// Total query budget; rounds = budget / cloud size.
    pub query_budget: usize,
    /// Hard cap on uniform-volume samples per round.
    pub uniform_cap: usize,
    /// Half-extent of the uniform sampling cube.
    pub volume_bound: f32,
    pub seed: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            group_divisor: 60,
            sigma_k: 51,
            density_k: 500,
            edge_percentile: 98.0,
            noise_scale: 0.27,
            query_budget: 1_000_000,
            uniform_cap: 5000,
            volume_bound: 0.55,
            seed: 2024,
        }
    }
}

/// Generated supervision set: queries, their nearest cloud points, and the
/// normalized cloud they were generated from.
#[derive(Debug, Clone)]
pub struct QuerySet {
    pub queries: Vec<Vector3<f32>>,
    pub nearest: Vec<Vector3<f32>>,
    pub cloud: Vec<Vector3<f32>>,
}

impl QuerySet {
    /// Per-group chunk size implied by the cloud (cloud size / 60 groups).
    pub fn group_size(&self, cfg: &QueryConfig) -> usize {
        (self.cloud.len() / cfg.group_divisor).max(1)
    }
}

/// Load the cached supervision set for `name`, or generate and persist it.
///
/// The cache key is the dataset name; only the file's absence triggers
/// regeneration. `snapshot_dir`, when given, receives diagnostic `.xyz`
/// dumps of the intermediate point sets.
pub fn load_or_generate(
    cloud_path: &Path,
    cache_dir: &Path,
    name: &str,
    snapshot_dir: Option<&Path>,
    cfg: &QueryConfig,
) -> Result<QuerySet> {
    let cache_path = cache_dir.join(format!("{name}.qry"));
    if cache_path.exists() {
        println!("Query data existing. Loading {}", cache_path.display());
        return io::load_query_set(&cache_path)
            .with_context(|| format!("decoding cached query data {}", cache_path.display()));
    }

    println!("Query data not found. Processing {}", cloud_path.display());
    let raw = io::load_point_cloud(cloud_path)
        .with_context(|| format!("loading point cloud {}", cloud_path.display()))?;
    let set = generate(&raw, cfg, snapshot_dir)?;

    std::fs::create_dir_all(cache_dir)?;
    io::save_query_set(&set, &cache_path)
        .with_context(|| format!("writing query cache {}", cache_path.display()))?;
    Ok(set)
}

/// Generate the supervision set from a raw cloud.
pub fn generate(
    raw: &[Vector3<f32>],
    cfg: &QueryConfig,
    snapshot_dir: Option<&Path>,
) -> Result<QuerySet> {
    if raw.len() < cfg.group_divisor {
        bail!(
            "point cloud too small: {} points, need at least {}",
            raw.len(),
            cfg.group_divisor
        );
    }

    let normalized = PointSet::from_raw(raw.to_vec());
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    // Subsample to a whole number of groups.
    let group = normalized.len() / cfg.group_divisor;
    let keep = group * cfg.group_divisor;
    let picked = rand::seq::index::sample(&mut rng, normalized.len(), keep);
    let cloud: Vec<Vector3<f32>> = picked.iter().map(|i| normalized.points[i]).collect();

    if let Some(dir) = snapshot_dir {
        io::save_xyz(&cloud, &dir.join("pointcloud_norm.xyz"))?;
    }

    let index = SpatialIndex::build(&cloud);
    let sigma_batch = (cloud.len() / 100).max(1);
    let sigmas = index.local_scale(cfg.sigma_k, sigma_batch);

    // Sparse neighborhoods mark edges and thin structures.
    let mean_dist = index.mean_neighbor_distance(cfg.density_k);
    let threshold = percentile(&mean_dist, cfg.edge_percentile);
    let mut edge_points: Vec<Vector3<f32>> = Vec::new();
    for (p, &d) in cloud.iter().zip(mean_dist.iter()) {
        if d > threshold {
            edge_points.push(*p);
        }
    }

    if let Some(dir) = snapshot_dir {
        io::save_xyz(&edge_points, &dir.join("edge.xyz"))?;
    }

    let rounds = (cfg.query_budget / cloud.len()).max(1);
    println!(
        "query generation: {} points, {} groups of {}, {} rounds, {} edge points",
        cloud.len(),
        cfg.group_divisor,
        group,
        rounds,
        edge_points.len()
    );

    let mut queries = Vec::with_capacity(rounds * cloud.len());
    let mut nearest = Vec::with_capacity(rounds * cloud.len());

    for round in 0..rounds {
        let mut batch = Vec::with_capacity(cloud.len() + edge_points.len() * 4);

        // Density-adaptive: noise proportional to local spacing, so dense
        // regions get tight queries and sparse regions wide ones.
        for (p, &sigma) in cloud.iter().zip(sigmas.iter()) {
            batch.push(p + cfg.noise_scale * sigma * normal3(&mut rng));
        }

        // Edge-biased: a tight isotropic shell...
        for e in &edge_points {
            batch.push(e + 0.02 * cfg.noise_scale * normal3(&mut rng));
        }
        // ...and a denser anisotropic one, tangential axes widened so thin
        // sheets get queries on both sides.
        let edge_weight = Vector3::new(2.0, 2.0, 1.0);
        for e in &edge_points {
            for _ in 0..3 {
                let noise = normal3(&mut rng).component_mul(&edge_weight);
                batch.push(e + 0.03 * cfg.noise_scale * noise);
            }
        }

        // Uniform-volume: keeps the field anchored away from the surface.
        let uniform_count = (cloud.len() / 10).min(cfg.uniform_cap);
        for _ in 0..uniform_count {
            batch.push(Vector3::new(
                rng.gen_range(-cfg.volume_bound..cfg.volume_bound),
                rng.gen_range(-cfg.volume_bound..cfg.volume_bound),
                rng.gen_range(-cfg.volume_bound..cfg.volume_bound),
            ));
        }

        // Truncate to whole groups so stratified draws stay aligned.
        batch.truncate(batch.len() - batch.len() % group);

        if round == 0 {
            if let Some(dir) = snapshot_dir {
                io::save_xyz(&batch, &dir.join("sample.xyz"))?;
            }
        }

        // Exact correspondence, one group chunk at a time.
        let mut batch_nearest = Vec::with_capacity(batch.len());
        for chunk in batch.chunks(group) {
            for idx in nearest_point(chunk, &cloud) {
                batch_nearest.push(cloud[idx]);
            }
        }

        if round == 0 {
            if let Some(dir) = snapshot_dir {
                io::save_xyz(&batch_nearest, &dir.join("sample_near.xyz"))?;
            }
        }

        queries.extend(batch);
        nearest.extend(batch_nearest);
    }

    Ok(QuerySet {
        queries,
        nearest,
        cloud,
    })
}

fn normal3(rng: &mut StdRng) -> Vector3<f32> {
    let x: f32 = StandardNormal.sample(rng);
    let y: f32 = StandardNormal.sample(rng);
    let z: f32 = StandardNormal.sample(rng);
    Vector3::new(x, y, z)
}

/// Percentile with linear interpolation between order statistics.
fn percentile(values: &[f32], pct: f64) -> f32 {
    assert!(!values.is_empty());
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = (rank - lo as f64) as f32;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}
