use crate::{
    classifier::PythonClassifierFactory,
    config::{Config, TaskErrorPolicy},
    crop::list_images,
    markers,
    pipeline::BatchDriver,
    report::{FileOutcome, RunReport},
    util::{ensure_dir, hash_file, now_rfc3339, sha256_hex},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cell-check")]
#[command(about = "Confirm or reject candidate cell detections with a CNN classifier")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./cell-check.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the classifier once and report whether it came up.
    Doctor {},
    /// Parse marker files and print what would be classified.
    Markers {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    Run {
        /// Marker file, or directory of `.csv` marker files.
        #[arg(long)]
        markers: Option<PathBuf>,
        /// Directory holding the slice images.
        #[arg(long)]
        images: Option<PathBuf>,
        /// Worker count; 0 uses every logical CPU.
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Record failing coordinates and keep going instead of aborting the file.
        #[arg(long)]
        skip_failed: bool,
        /// Reuse an existing run directory for identical inputs.
        #[arg(long)]
        overwrite: bool,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match &args.cmd {
        Command::Doctor {} => {
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            doctor(&cfg)
        }
        Command::Markers { input } => {
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            let input = input
                .clone()
                .unwrap_or_else(|| PathBuf::from(&cfg.paths.markers));
            list_markers(&input)
        }
        Command::Run {
            markers,
            images,
            workers,
            out_dir,
            skip_failed,
            overwrite,
        } => {
            let mut cfg = cfg;
            if let Some(p) = markers {
                cfg.paths.markers = p.display().to_string();
            }
            if let Some(p) = images {
                cfg.paths.images = p.display().to_string();
            }
            if let Some(p) = out_dir {
                cfg.paths.out_dir = p.display().to_string();
            }
            if let Some(n) = workers {
                cfg.pool.workers = *n;
            }
            if *skip_failed {
                cfg.policy.on_task_error = TaskErrorPolicy::Skip;
            }
            if *overwrite {
                cfg.output.overwrite = true;
            }
            run(&args, &cfg)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("cell-check.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn doctor(cfg: &Config) -> Result<()> {
    let factory = PythonClassifierFactory::new(cfg)?;
    let diag = factory.doctor();
    println!("{}", serde_json::to_string_pretty(&diag)?);
    if !diag.ok {
        return Err(anyhow!("classifier failed to load"));
    }
    Ok(())
}

fn list_markers(input: &Path) -> Result<()> {
    let paths = markers::discover(input)?;
    let listing: Vec<_> = paths
        .iter()
        .map(|p| match markers::parse(p) {
            Ok(set) => serde_json::json!({
                "path": p,
                "format": set.format(),
                "count": set.len(),
            }),
            Err(e) => serde_json::json!({
                "path": p,
                "error": e.to_string(),
                "kind": e.kind(),
            }),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

fn run(args: &Args, cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let marker_input = PathBuf::from(&cfg.paths.markers);
    let image_dir = PathBuf::from(&cfg.paths.images);
    if !image_dir.is_dir() {
        return Err(anyhow!("image directory does not exist: {}", image_dir.display()));
    }

    let marker_paths = markers::discover(&marker_input)
        .with_context(|| format!("discovering markers in {}", marker_input.display()))?;
    if marker_paths.is_empty() {
        return Err(anyhow!("no marker files found in {}", marker_input.display()));
    }

    let run_id = run_id(cfg, &marker_paths, &image_dir)?;
    let run_dir = prepare_run_dir(cfg, &run_id)?;

    let log_path = resolve_log_path(cfg, Some(&run_dir));
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!("run_id={run_id} out={}", run_dir.display());

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(run_dir.join("effective-config.toml"), raw)?;
    }

    let factory = PythonClassifierFactory::new(cfg)?;
    let mut driver = BatchDriver::new(cfg)?;
    if cfg.output.export_markers {
        driver = driver.with_export_dir(run_dir.join("markers"));
    }

    let report = driver
        .run_all(&marker_paths, &image_dir, &factory)
        .context("batch aborted")?;

    print_report(&report);

    if cfg.output.print_summary {
        let status = if report.failed_files() == 0 { "ok" } else { "failed" };
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "run_id": run_id,
                "run_dir": run_dir,
                "finished": now_rfc3339(),
                "elapsed": report.elapsed_display(),
                "files": report.files,
                "status": status,
            }))?
        );
    }

    match report.failed_files() {
        0 => Ok(()),
        n => Err(anyhow!(
            "{n} of {} marker files failed",
            report.files.len()
        )),
    }
}

fn print_report(report: &RunReport) {
    for file in &report.files {
        println!("Classified in: {}", file.marker_path);
        match &file.outcome {
            FileOutcome::Completed { counts, failures } => {
                println!("Correct cell predictions: {}", counts.confirmed);
                println!("Potential false cell predictions: {}", counts.rejected);
                if !failures.is_empty() {
                    println!("Skipped coordinates: {}", failures.len());
                }
            }
            FileOutcome::Failed {
                kind,
                task_index,
                coordinate,
                message,
            } => match (task_index, coordinate) {
                (Some(i), Some(c)) => {
                    println!("Failed ({kind:?}) at coordinate #{i} {c}: {message}")
                }
                _ => println!("Failed ({kind:?}): {message}"),
            },
        }
    }
    println!("{} (MM:SS)", report.elapsed_display());
}

/// SHA-256 over the normalized config, every marker file, and the slice
/// listing (name and size) the run will crop from.
pub fn run_id(cfg: &Config, marker_paths: &[PathBuf], image_dir: &Path) -> Result<String> {
    let mut fingerprint = sha256_hex(cfg.normalized_for_hash().as_bytes());
    for p in marker_paths {
        let h = hash_file(p).with_context(|| format!("hashing marker file: {}", p.display()))?;
        fingerprint.push(':');
        fingerprint.push_str(&h);
    }

    let slices = list_images(image_dir, &cfg.crop.image_extensions)
        .with_context(|| format!("listing images in {}", image_dir.display()))?;
    for name in &slices {
        let len = std::fs::metadata(image_dir.join(name))
            .with_context(|| format!("stat image: {name}"))?
            .len();
        fingerprint.push_str(&format!("|{name}:{len}"));
    }
    Ok(sha256_hex(fingerprint.as_bytes()))
}

/// Creates `<out_dir>/<run_id>/logs`. An existing run directory is an error
/// unless `output.overwrite` is set.
pub fn prepare_run_dir(cfg: &Config, run_id: &str) -> Result<PathBuf> {
    let run_dir = PathBuf::from(&cfg.paths.out_dir).join(run_id);
    if run_dir.exists() && !cfg.output.overwrite {
        return Err(anyhow!(
            "run_dir already exists and overwrite=false: {}",
            run_dir.display()
        ));
    }
    ensure_dir(&run_dir.join("logs"))?;
    Ok(run_dir)
}

fn resolve_log_path(cfg: &Config, run_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(run_dir) = run_dir {
        return Some(run_dir.join("logs").join("cell-check.log"));
    }

    Some(PathBuf::from(&cfg.paths.out_dir).join("cell-check.log"))
}
