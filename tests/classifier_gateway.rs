mod common;

use cell_check::{
    classifier::{Classifier, ClassifierFactory, PythonClassifierFactory},
    config::Config,
    coords::{Coordinate, Label},
    crop::CropExtractor,
    error::ErrorKind,
};
use common::{write_slice, write_text};
use std::path::Path;

#[test]
fn zero_output_means_cell() {
    assert_eq!(Label::from_prediction(0.0), Label::Confirmed);
    assert_eq!(Label::from_prediction(1.0), Label::Rejected);
    assert_eq!(Label::from_prediction(0.25), Label::Rejected);
    assert_eq!(Label::from_prediction(-1.0), Label::Rejected);
}

fn config_with(dir: &Path, python_exe: &str, script_body: &str) -> Config {
    let mut cfg = Config::default();
    cfg.paths.weights = write_text(dir, "w.h5", "weights").display().to_string();
    cfg.paths.architecture = write_text(dir, "arch.json", "{}").display().to_string();
    cfg.classifier.script = write_text(dir, "runner.sh", script_body)
        .display()
        .to_string();
    cfg.classifier.python_exe = python_exe.to_string();
    cfg
}

#[test]
fn missing_artifacts_fail_as_classifier_load() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config_with(tmp.path(), "python3", "");
    cfg.paths.weights = tmp.path().join("absent.h5").display().to_string();

    let err = PythonClassifierFactory::new(&cfg).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClassifierLoad);
    assert!(err.to_string().contains("weights file"), "{err}");
}

#[test]
fn unspawnable_interpreter_fails_as_classifier_load() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config_with(tmp.path(), "/nonexistent/bin/python-for-cell-check", "");
    let factory = PythonClassifierFactory::new(&cfg).unwrap();

    let err = factory.load().err().expect("spawn must fail");
    assert!(err.is_fatal());

    let diag = factory.doctor();
    assert!(!diag.ok);
    assert!(diag.error.is_some());
}

#[cfg(unix)]
#[test]
fn worker_process_protocol_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    // Stands in for the Keras runner: ready line, then alternating outputs.
    let script = r#"
echo '{"ok":true,"backend":"stub"}'
n=0
while IFS= read -r line; do
  if [ $((n % 2)) -eq 0 ]; then
    echo '{"ok":true,"prediction":0}'
  else
    echo '{"ok":true,"prediction":1}'
  fi
  n=$((n + 1))
done
"#;
    let cfg = config_with(tmp.path(), "/bin/sh", script);
    let factory = PythonClassifierFactory::new(&cfg).unwrap();
    let mut classifier = factory.load().unwrap();
    assert_eq!(classifier.backend(), Some("stub"));

    let images = tmp.path().join("images");
    std::fs::create_dir_all(&images).unwrap();
    write_slice(&images, "z0.png", 100, 100);
    let ex = CropExtractor::from_dir(&images, &["png".to_string()], 40).unwrap();
    let crop = ex.extract(&Coordinate::new(50, 50, 0)).unwrap();

    assert_eq!(classifier.classify(&crop).unwrap(), Label::Confirmed);
    assert_eq!(classifier.classify(&crop).unwrap(), Label::Rejected);
    assert_eq!(classifier.classify(&crop).unwrap(), Label::Confirmed);
}

#[cfg(unix)]
#[test]
fn model_load_failure_reported_by_worker() {
    let tmp = tempfile::tempdir().unwrap();
    let script = r#"echo '{"ok":false,"error":"OSError: bad weights"}'"#;
    let cfg = config_with(tmp.path(), "/bin/sh", script);
    let factory = PythonClassifierFactory::new(&cfg).unwrap();

    let err = factory.load().err().expect("load must fail");
    assert_eq!(err.kind(), ErrorKind::ClassifierLoad);
    assert!(err.to_string().contains("bad weights"), "{err}");
}
