use crate::{
    aggregate::FinalizedBatch,
    classifier::ClassifierFactory,
    config::Config,
    coords::{Coordinate, MarkerFormat, MarkerSet},
    crop::CropExtractor,
    error::{CellError, CellResult},
    markers,
    pool::{ClassifierCache, WorkerPool},
    report::{FileOutcome, FileReport, RunReport},
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs marker files one after another through the worker pool.
pub struct BatchDriver {
    pool: WorkerPool,
    half_window: u32,
    image_extensions: Vec<String>,
    export_dir: Option<PathBuf>,
}

impl BatchDriver {
    pub fn new(cfg: &Config) -> CellResult<Self> {
        let pool = WorkerPool::new(cfg.pool.workers, cfg.policy.on_task_error)?;
        Ok(Self::from_parts(
            pool,
            cfg.crop.half_window,
            cfg.crop.image_extensions.clone(),
        ))
    }

    pub fn from_parts(pool: WorkerPool, half_window: u32, image_extensions: Vec<String>) -> Self {
        Self {
            pool,
            half_window,
            image_extensions,
            export_dir: None,
        }
    }

    /// Write `<stem>_confirmed.csv` / `<stem>_rejected.csv` per marker file.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Parse errors and task errors fail only their own file; a classifier
    /// that cannot be loaded fails the whole run.
    pub fn run_all<F: ClassifierFactory>(
        &self,
        marker_paths: &[PathBuf],
        image_dir: &Path,
        factory: &F,
    ) -> CellResult<RunReport> {
        let started = Instant::now();
        let extractor =
            CropExtractor::from_dir(image_dir, &self.image_extensions, self.half_window)?;
        if extractor.filenames().is_empty() {
            warn!(
                "no images with extensions {:?} in {}",
                self.image_extensions,
                image_dir.display()
            );
        }
        info!(
            "classifying {} marker files with {} workers, {} slices",
            marker_paths.len(),
            self.pool.workers(),
            extractor.filenames().len()
        );

        let cache = ClassifierCache::new();
        let mut files = Vec::with_capacity(marker_paths.len());
        for path in marker_paths {
            let file_started = Instant::now();
            info!("classifying in: {}", path.display());

            let format = MarkerFormat::from_path(path);
            let outcome = self
                .run_file(path, &extractor, factory, &cache)
                .and_then(|(set, batch)| {
                    let exports = self.export(&set, &batch)?;
                    Ok((batch, exports))
                });

            let report = match outcome {
                Ok((batch, exports)) => {
                    let counts = batch.counts();
                    info!(
                        "{}: confirmed={} rejected={} failed={}",
                        path.display(),
                        counts.confirmed,
                        counts.rejected,
                        counts.failed
                    );
                    FileReport {
                        marker_path: path.display().to_string(),
                        format,
                        elapsed_secs: file_started.elapsed().as_secs_f64(),
                        outcome: FileOutcome::Completed {
                            counts,
                            failures: batch.failures().to_vec(),
                        },
                        exports,
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!("{}: {e}", path.display());
                    return Err(e);
                }
                Err(e) => {
                    error!("{}: {e}", path.display());
                    FileReport {
                        marker_path: path.display().to_string(),
                        format,
                        elapsed_secs: file_started.elapsed().as_secs_f64(),
                        outcome: FileOutcome::failed(&e),
                        exports: Vec::new(),
                    }
                }
            };
            files.push(report);
        }

        debug!("{} classifiers loaded for the run", cache.loads());
        Ok(RunReport {
            files,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }

    fn run_file<F: ClassifierFactory>(
        &self,
        path: &Path,
        extractor: &CropExtractor,
        factory: &F,
        cache: &ClassifierCache<F::Classifier>,
    ) -> CellResult<(MarkerSet, FinalizedBatch)> {
        let set = markers::parse(path)?;
        let result = self.pool.run(&set, extractor, factory, cache)?;
        let batch = result.finalize()?;
        Ok((set, batch))
    }

    fn export(&self, set: &MarkerSet, batch: &FinalizedBatch) -> CellResult<Vec<String>> {
        let Some(dir) = &self.export_dir else {
            return Ok(Vec::new());
        };
        std::fs::create_dir_all(dir).map_err(|e| CellError::io(dir, e))?;

        let (confirmed, rejected) = batch.partition(set.coordinates());
        let stem = set.stem();
        let mut written = Vec::new();
        for (suffix, coords) in [("confirmed", &confirmed), ("rejected", &rejected)] {
            let path = dir.join(format!("{stem}_{suffix}.csv"));
            write_marker_csv(&path, coords)?;
            written.push(path.display().to_string());
        }
        Ok(written)
    }
}

/// Writes coordinates in the headerless `row,col,slice` marker format.
pub fn write_marker_csv(path: &Path, coords: &[Coordinate]) -> CellResult<()> {
    let to_io = |e: csv::Error| CellError::io(path, std::io::Error::other(e));
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(to_io)?;
    for c in coords {
        wtr.serialize(c).map_err(to_io)?;
    }
    wtr.flush().map_err(|e| CellError::io(path, e))
}
