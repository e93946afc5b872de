mod common;

use cell_check::{
    config::TaskErrorPolicy,
    coords::Label,
    crop::CropExtractor,
    error::{CellError, CellResult, ErrorKind},
    pool::{ClassifierCache, WorkerPool},
};
use common::{StubClassifier, always_confirmed, even_row_confirmed, marker_set, write_slice};
use std::sync::atomic::{AtomicUsize, Ordering};

const HALF: u32 = 8;

fn grid(n: i64) -> Vec<(i64, i64, i64)> {
    (0..n)
        .map(|i| (10 + (i * 7) % 80, 10 + (i * 13) % 80, i % 2))
        .collect()
}

fn extractor(dir: &std::path::Path) -> CropExtractor {
    write_slice(dir, "img0.png", 100, 100);
    write_slice(dir, "img1.png", 100, 100);
    CropExtractor::from_dir(dir, &["png".to_string()], HALF).unwrap()
}

#[test]
fn counts_do_not_depend_on_worker_count() {
    let tmp = tempfile::tempdir().unwrap();
    let ex = extractor(tmp.path());
    let set = marker_set(&grid(37));
    let factory = || -> CellResult<_> { Ok(StubClassifier::new(even_row_confirmed)) };

    let mut seen = Vec::new();
    for workers in 1..=8 {
        let pool = WorkerPool::new(workers, TaskErrorPolicy::FailFast).unwrap();
        let batch = pool
            .run(&set, &ex, &factory, &ClassifierCache::new())
            .unwrap()
            .finalize()
            .unwrap();
        let counts = batch.counts();
        assert_eq!(counts.confirmed + counts.rejected, set.len());
        seen.push((counts, batch.labels().to_vec()));
    }
    assert!(seen.windows(2).all(|w| w[0] == w[1]));

    let expected = set.coordinates().iter().filter(|c| c.row % 2 == 0).count();
    assert_eq!(seen[0].0.confirmed, expected);
}

#[test]
fn each_worker_loads_at_most_one_classifier() {
    let tmp = tempfile::tempdir().unwrap();
    let ex = extractor(tmp.path());
    let set = marker_set(&grid(64));
    let loads = AtomicUsize::new(0);
    let factory = || -> CellResult<_> {
        loads.fetch_add(1, Ordering::SeqCst);
        Ok(StubClassifier::new(always_confirmed))
    };

    let pool = WorkerPool::new(3, TaskErrorPolicy::FailFast).unwrap();
    assert_eq!(pool.workers(), 3);
    let batch = pool
        .run(&set, &ex, &factory, &ClassifierCache::new())
        .unwrap()
        .finalize()
        .unwrap();

    assert_eq!(batch.counts().confirmed, 64);
    let n = loads.load(Ordering::SeqCst);
    assert!((1..=3).contains(&n), "{n} classifier loads for 3 workers");
}

#[test]
fn shared_cache_keeps_classifiers_across_batches() {
    let tmp = tempfile::tempdir().unwrap();
    let ex = extractor(tmp.path());
    let loads = AtomicUsize::new(0);
    let factory = || -> CellResult<_> {
        loads.fetch_add(1, Ordering::SeqCst);
        Ok(StubClassifier::new(always_confirmed))
    };

    let pool = WorkerPool::new(1, TaskErrorPolicy::FailFast).unwrap();
    let cache = ClassifierCache::new();
    for n in [3, 7, 1, 12] {
        let set = marker_set(&grid(n));
        let batch = pool
            .run(&set, &ex, &factory, &cache)
            .unwrap()
            .finalize()
            .unwrap();
        assert_eq!(batch.counts().confirmed, n as usize);
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(cache.loads(), 1);
}

#[test]
fn fail_fast_reports_the_failing_task() {
    let tmp = tempfile::tempdir().unwrap();
    let ex = extractor(tmp.path());
    let set = marker_set(&[(50, 50, 0), (2, 50, 0), (50, 50, 1)]);
    let factory = || -> CellResult<_> { Ok(StubClassifier::new(always_confirmed)) };

    let pool = WorkerPool::new(2, TaskErrorPolicy::FailFast).unwrap();
    let err = pool
        .run(&set, &ex, &factory, &ClassifierCache::new())
        .unwrap_err();
    match &err {
        CellError::Task { index, coordinate, .. } => {
            assert_eq!(*index, 1);
            assert_eq!(coordinate.row, 2);
        }
        other => panic!("expected task error, got {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Bounds);
}

#[test]
fn skip_policy_collects_failures_and_keeps_going() {
    let tmp = tempfile::tempdir().unwrap();
    let ex = extractor(tmp.path());
    let set = marker_set(&[(50, 50, 0), (2, 50, 0), (50, 50, 7), (60, 60, 1)]);
    let factory = || -> CellResult<_> { Ok(StubClassifier::new(always_confirmed)) };

    let pool = WorkerPool::new(2, TaskErrorPolicy::Skip).unwrap();
    let batch = pool
        .run(&set, &ex, &factory, &ClassifierCache::new())
        .unwrap()
        .finalize()
        .unwrap();
    let counts = batch.counts();
    assert_eq!((counts.confirmed, counts.rejected, counts.failed), (2, 0, 2));

    let kinds: Vec<(usize, ErrorKind)> =
        batch.failures().iter().map(|f| (f.index, f.kind)).collect();
    assert_eq!(kinds, [(1, ErrorKind::Bounds), (2, ErrorKind::MissingImage)]);
    assert_eq!(batch.labels()[0], Some(Label::Confirmed));
    assert_eq!(batch.labels()[1], None);
}

#[test]
fn classifier_load_failure_aborts_even_when_skipping() {
    let tmp = tempfile::tempdir().unwrap();
    let ex = extractor(tmp.path());
    let set = marker_set(&grid(10));
    let factory = || -> CellResult<StubClassifier> {
        Err(CellError::ClassifierLoad("weights unreadable".into()))
    };

    let pool = WorkerPool::new(2, TaskErrorPolicy::Skip).unwrap();
    let err = pool
        .run(&set, &ex, &factory, &ClassifierCache::new())
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.kind(), ErrorKind::ClassifierLoad);
}

#[test]
fn empty_marker_set_never_loads_a_classifier() {
    let tmp = tempfile::tempdir().unwrap();
    let ex = extractor(tmp.path());
    let set = marker_set(&[]);
    let loads = AtomicUsize::new(0);
    let factory = || -> CellResult<_> {
        loads.fetch_add(1, Ordering::SeqCst);
        Ok(StubClassifier::new(always_confirmed))
    };

    let pool = WorkerPool::new(4, TaskErrorPolicy::FailFast).unwrap();
    let batch = pool
        .run(&set, &ex, &factory, &ClassifierCache::new())
        .unwrap()
        .finalize()
        .unwrap();
    assert_eq!(batch.counts().total, 0);
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}
