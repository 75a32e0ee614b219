//! udf-train: fit an unsigned distance field to a point cloud and extract
//! meshes at the stage checkpoints.
//!
//! Usage:
//!   udf-train --data path/to/cloud.ply [--name bunny] [--iters1 40000] ...

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use udf_rs::io::load_checkpoint;
use udf_rs::{MlpConfig, MlpField, QueryConfig, RunConfig, Trainer};

/// Create timestamped run directory (runs/YYYYMMDD_HHMM_<name>).
fn create_run_directory(name: &str) -> std::io::Result<PathBuf> {
    use time::OffsetDateTime;

    let now = OffsetDateTime::now_utc();
    let dir_name = format!(
        "runs/{:04}{:02}{:02}_{:02}{:02}_{}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        name.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
    );

    let mut path = PathBuf::from(&dir_name);
    let mut counter = 1;
    while path.exists() {
        path = PathBuf::from(format!("{dir_name}.{counter}"));
        counter += 1;
    }

    std::fs::create_dir_all(&path)?;
    Ok(path)
}

fn save_run_metadata(out_dir: &std::path::Path, args: &[String]) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = std::fs::File::create(out_dir.join("run_metadata.txt"))?;
    writeln!(file, "=== Training Run Metadata ===")?;
    writeln!(file)?;
    writeln!(file, "Command:")?;
    writeln!(file, "udf-train {}", args[1..].join(" "))?;
    writeln!(file)?;
    writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
    writeln!(file)?;
    writeln!(file, "System:")?;
    writeln!(file, "  Platform: {}", std::env::consts::OS)?;
    writeln!(file, "  Architecture: {}", std::env::consts::ARCH)?;
    writeln!(file, "  Package version: {}", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

fn parse_hidden(text: &str) -> Result<Vec<usize>> {
    text.split(',')
        .map(|t| {
            t.trim()
                .parse::<usize>()
                .with_context(|| format!("bad hidden width {t:?}"))
        })
        .collect()
}

fn run() -> Result<()> {
    println!("udf-train v{}", udf_rs::VERSION);

    let raw_args: Vec<String> = std::env::args().collect();

    let mut data: Option<PathBuf> = None;
    let mut name: Option<String> = None;
    let mut out_dir: Option<PathBuf> = None;
    let mut cache_dir: Option<PathBuf> = None;
    let mut load_ckpt: Option<PathBuf> = None;
    let mut cfg = RunConfig::default();
    let mut query_cfg = QueryConfig::default();

    let mut args = std::env::args().skip(1);
    while let Some(flag) = args.next() {
        let mut value = |flag: &str| -> Result<String> {
            args.next()
                .with_context(|| format!("{flag} requires a value"))
        };
        match flag.as_str() {
            "--data" => data = Some(PathBuf::from(value("--data")?)),
            "--name" => name = Some(value("--name")?),
            "--out" => out_dir = Some(PathBuf::from(value("--out")?)),
            "--cache" => cache_dir = Some(PathBuf::from(value("--cache")?)),
            "--load-ckpt" => load_ckpt = Some(PathBuf::from(value("--load-ckpt")?)),
            "--iters1" => cfg.step1_maxiter = value("--iters1")?.parse()?,
            "--iters2" => cfg.step2_maxiter = value("--iters2")?.parse()?,
            "--batch" => cfg.batch_size = value("--batch")?.parse()?,
            "--batch2" => cfg.batch_size_step2 = value("--batch2")?.parse()?,
            "--lr" => cfg.learning_rate = value("--lr")?.parse()?,
            "--warmup" => cfg.warm_up_end = value("--warmup")?.parse()?,
            "--report-freq" => cfg.report_freq = value("--report-freq")?.parse()?,
            "--eval-points" => cfg.eval_num_points = value("--eval-points")?.parse()?,
            "--df-filter" => cfg.df_filter = value("--df-filter")?.parse()?,
            "--low-range" => cfg.low_range = value("--low-range")?.parse()?,
            "--extra-rate" => cfg.extra_points_rate = value("--extra-rate")?.parse()?,
            "--outlier" => cfg.outlier = value("--outlier")?.parse()?,
            "--far" => cfg.far = value("--far")?.parse()?,
            "--res" => cfg.resolution = value("--res")?.parse()?,
            "--bound" => cfg.bound = value("--bound")?.parse()?,
            "--hidden" => cfg.hidden = parse_hidden(&value("--hidden")?)?,
            "--seed" => cfg.seed = value("--seed")?.parse()?,
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => bail!("unknown flag {other} (try --help)"),
        }
    }

    let Some(data) = data else {
        print_help();
        bail!("--data is required");
    };

    let name = name.unwrap_or_else(|| {
        data.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "cloud".to_string())
    });

    let out_dir = match out_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            dir
        }
        None => create_run_directory(&name)?,
    };
    save_run_metadata(&out_dir, &raw_args)?;
    println!("run directory: {}", out_dir.display());

    // Query cache lives next to the input by default, so reruns on the same
    // dataset skip generation.
    let cache_dir = cache_dir.unwrap_or_else(|| {
        data.parent()
            .map(|p| p.join("query_data"))
            .unwrap_or_else(|| PathBuf::from("query_data"))
    });

    let snapshot_dir = out_dir.join("dataset");
    std::fs::create_dir_all(&snapshot_dir)?;

    query_cfg.seed = cfg.seed;
    let set = udf_rs::query::load_or_generate(
        &data,
        &cache_dir,
        &name,
        Some(&snapshot_dir),
        &query_cfg,
    )?;
    println!(
        "supervision set: {} queries over {} cloud points",
        set.queries.len(),
        set.cloud.len()
    );

    let (field, start_iter) = match &load_ckpt {
        Some(path) => {
            let ckpt = load_checkpoint(path)
                .with_context(|| format!("loading checkpoint {}", path.display()))?;
            if MlpField::param_count(&ckpt.hidden) != ckpt.params.len() {
                bail!("checkpoint {} is internally inconsistent", path.display());
            }
            cfg.hidden = ckpt.hidden.clone();
            println!(
                "resuming from {} at iteration {}",
                path.display(),
                ckpt.iteration
            );
            (MlpField::from_params(&ckpt.hidden, ckpt.params), ckpt.iteration)
        }
        None => {
            let mlp_cfg = MlpConfig {
                hidden: cfg.hidden.clone(),
                seed: cfg.seed,
            };
            (MlpField::new(&mlp_cfg), 0)
        }
    };

    let mut trainer = Trainer::new(cfg, set, field)?.with_output(&out_dir)?;
    trainer.set_iteration(start_iter);
    trainer.run()
}

fn print_help() {
    println!(
        "\
udf-train: unsigned-distance-field surface reconstruction

  --data <file>        input cloud (.ply | .xyz | .npy), required
  --name <id>          dataset identifier (default: file stem)
  --out <dir>          run directory (default: runs/<timestamp>_<name>)
  --cache <dir>        query cache directory (default: <data dir>/query_data)
  --load-ckpt <file>   resume from a checkpoint

  --iters1 <n>         stage-1 length (default 40000)
  --iters2 <n>         total iterations (default 60000)
  --batch <n>          stage-1 batch size (default 5000)
  --batch2 <n>         stage-2 batch size (default 5000)
  --lr <f>             base learning rate (default 0.001)
  --warmup <f>         warm-up iterations (default 1000)
  --hidden <a,b,...>   hidden layer widths (default 64,64,64,64)
  --seed <n>           RNG seed

  --eval-points <n>    synthesized cloud size at the transition
  --df-filter <f>      distance cutoff for synthesized points
  --low-range <f>      synthesis noise multiplier
  --extra-rate <f>     kept fraction after Poisson-disk downsampling
  --outlier <f>        outlier truncation distance
  --far <f>            far-point mesh pruning threshold (<=0 disables)
  --res <n>            extraction grid resolution (default 128)
  --bound <f>          extraction box half-extent (default 0.55)
  --report-freq <n>    progress line interval"
    );
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
