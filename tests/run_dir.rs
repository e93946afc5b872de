mod common;

use cell_check::{
    cli::{prepare_run_dir, run_id},
    config::Config,
};
use common::{write_slice, write_text};
use std::path::Path;

fn config(out_dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.out_dir = out_dir.display().to_string();
    cfg.crop.image_extensions = vec!["png".to_string()];
    cfg
}

#[test]
fn run_id_changes_with_the_image_stack() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(&tmp.path().join("out"));
    let marker = write_text(tmp.path(), "m.csv", "20,20,0\n");
    let images = tmp.path().join("images");
    std::fs::create_dir_all(&images).unwrap();
    write_slice(&images, "z0.png", 40, 40);

    let first = run_id(&cfg, &[marker.clone()], &images).unwrap();
    assert_eq!(first, run_id(&cfg, &[marker.clone()], &images).unwrap());

    write_slice(&images, "z1.png", 40, 40);
    let second = run_id(&cfg, &[marker.clone()], &images).unwrap();
    assert_ne!(first, second);

    write_slice(&images, "z1.png", 60, 60);
    assert_ne!(second, run_id(&cfg, &[marker], &images).unwrap());
}

#[test]
fn overwrite_flag_does_not_change_the_run_id() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config(&tmp.path().join("out"));
    let marker = write_text(tmp.path(), "m.csv", "20,20,0\n");

    let before = run_id(&cfg, &[marker.clone()], tmp.path()).unwrap();
    cfg.output.overwrite = true;
    assert_eq!(before, run_id(&cfg, &[marker], tmp.path()).unwrap());
}

#[test]
fn existing_run_dir_is_refused_unless_overwriting() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config(&tmp.path().join("out"));

    let dir = prepare_run_dir(&cfg, "abc123").unwrap();
    assert!(dir.join("logs").is_dir());

    let err = prepare_run_dir(&cfg, "abc123").unwrap_err();
    assert!(err.to_string().contains("already exists"), "{err}");

    cfg.output.overwrite = true;
    assert_eq!(prepare_run_dir(&cfg, "abc123").unwrap(), dir);
}
