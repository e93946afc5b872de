#![allow(dead_code)]

use cell_check::{
    classifier::Classifier,
    config::TaskErrorPolicy,
    coords::{Coordinate, Label, MarkerFormat, MarkerSet},
    crop::Crop,
    error::CellResult,
    pipeline::BatchDriver,
    pool::WorkerPool,
};
use image::{GrayImage, Luma};
use std::path::{Path, PathBuf};

/// Pixel value at (x, y) of every synthetic slice image.
pub fn pattern(x: u32, y: u32) -> u8 {
    ((x + 3 * y) % 251) as u8
}

pub fn write_slice(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let img = GrayImage::from_fn(width, height, |x, y| Luma([pattern(x, y)]));
    let path = dir.join(name);
    img.save(&path).expect("write slice image");
    path
}

pub fn write_text(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write text file");
    path
}

pub fn marker_set(coords: &[(i64, i64, i64)]) -> MarkerSet {
    MarkerSet::new(
        "inline.csv",
        MarkerFormat::Csv,
        coords
            .iter()
            .map(|&(r, c, s)| Coordinate::new(r, c, s))
            .collect(),
    )
}

pub fn driver(workers: usize, policy: TaskErrorPolicy, half_window: u32) -> BatchDriver {
    let pool = WorkerPool::new(workers, policy).expect("build pool");
    BatchDriver::from_parts(pool, half_window, vec!["png".into()])
}

/// Classifier driven by a plain function of the crop.
pub struct StubClassifier {
    rule: fn(&Crop) -> CellResult<Label>,
}

impl StubClassifier {
    pub fn new(rule: fn(&Crop) -> CellResult<Label>) -> Self {
        Self { rule }
    }
}

impl Classifier for StubClassifier {
    fn classify(&mut self, crop: &Crop) -> CellResult<Label> {
        (self.rule)(crop)
    }
}

pub fn always_confirmed(_: &Crop) -> CellResult<Label> {
    Ok(Label::Confirmed)
}

pub fn always_rejected(_: &Crop) -> CellResult<Label> {
    Ok(Label::Rejected)
}

/// Confirms crops whose centre row is even.
pub fn even_row_confirmed(crop: &Crop) -> CellResult<Label> {
    Ok(if crop.coordinate().row % 2 == 0 {
        Label::Confirmed
    } else {
        Label::Rejected
    })
}
