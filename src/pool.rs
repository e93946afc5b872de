use crate::{
    aggregate::BatchResult,
    classifier::{Classifier, ClassifierFactory},
    config::TaskErrorPolicy,
    coords::{Coordinate, Label, MarkerSet},
    crop::CropExtractor,
    error::{CellError, CellResult},
};
use rayon::prelude::*;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use thread_local::ThreadLocal;
use tracing::{debug, warn};

/// One classifier per worker thread, loaded on that worker's first task.
/// Share a cache across batches run on the same pool so each worker loads
/// at most once per run.
pub struct ClassifierCache<C: Send> {
    handles: ThreadLocal<RefCell<C>>,
    loads: AtomicUsize,
}

impl<C: Send> ClassifierCache<C> {
    pub fn new() -> Self {
        Self {
            handles: ThreadLocal::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Classifiers loaded so far, across every worker.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    fn get_or_load<F>(&self, factory: &F) -> CellResult<&RefCell<C>>
    where
        F: ClassifierFactory<Classifier = C>,
    {
        self.handles.get_or_try(|| {
            let n = self.loads.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("loading classifier for worker {n}");
            factory.load().map(RefCell::new)
        })
    }
}

impl<C: Send> Default for ClassifierCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded set of worker threads that classify the coordinates of one
/// marker set.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    policy: TaskErrorPolicy,
}

impl WorkerPool {
    /// `workers == 0` means one worker per logical CPU.
    pub fn new(workers: usize, policy: TaskErrorPolicy) -> CellResult<Self> {
        let workers = if workers == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            workers
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("cell-worker-{i}"))
            .build()
            .map_err(|e| CellError::Pool(e.to_string()))?;
        Ok(Self { pool, policy })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn policy(&self) -> TaskErrorPolicy {
        self.policy
    }

    /// Classifies every coordinate of `markers` and returns the filled
    /// result. Workers reuse whatever classifier `cache` already holds.
    pub fn run<F: ClassifierFactory>(
        &self,
        markers: &MarkerSet,
        extractor: &CropExtractor,
        factory: &F,
        cache: &ClassifierCache<F::Classifier>,
    ) -> CellResult<BatchResult> {
        let result = BatchResult::with_len(markers.len());

        self.pool.install(|| {
            markers
                .coordinates()
                .par_iter()
                .enumerate()
                .try_for_each(|(index, coordinate)| {
                    let handle = cache.get_or_load(factory)?;
                    let outcome = classify_one(extractor, handle, coordinate);
                    match (outcome, self.policy) {
                        (Ok(label), _) => result.record(index, label),
                        // A worker without a classifier cannot produce trustworthy counts.
                        (Err(e), _) if e.is_fatal() => Err(e),
                        (Err(e), TaskErrorPolicy::Skip) => {
                            warn!("skipping task {index} at {coordinate}: {e}");
                            result.record_failure(index, *coordinate, &e)
                        }
                        (Err(e), TaskErrorPolicy::FailFast) => Err(CellError::Task {
                            index,
                            coordinate: *coordinate,
                            source: Box::new(e),
                        }),
                    }
                })
        })?;

        debug!(
            "batch {} done: {} tasks, {} classifier loads",
            markers.path().display(),
            markers.len(),
            cache.loads()
        );
        Ok(result)
    }
}

// The handle is borrowed only around `classify`, after decoding is done.
fn classify_one<C: Classifier>(
    extractor: &CropExtractor,
    classifier: &RefCell<C>,
    coordinate: &Coordinate,
) -> CellResult<Label> {
    let crop = extractor.extract(coordinate)?;
    classifier.borrow_mut().classify(&crop)
}
