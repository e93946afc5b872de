use crate::{
    coords::Coordinate,
    error::{CellError, CellResult},
    util::natural_cmp,
};
use image::{DynamicImage, ImageReader};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_HALF_WINDOW: u32 = 40;
/// Largest half window whose side `2 * h` still fits a `u32`.
pub const MAX_HALF_WINDOW: u32 = u32::MAX / 2;

/// A square window cut from one slice image, side `2 * half_window`.
#[derive(Debug, Clone)]
pub struct Crop {
    coordinate: Coordinate,
    image: DynamicImage,
}

impl Crop {
    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw intensities in row-major HWC order, with the channel count.
    /// Alpha is dropped; integer samples keep their stored values.
    pub fn to_hwc(&self) -> (u32, Vec<f32>) {
        match &self.image {
            DynamicImage::ImageLuma8(b) => (1, b.as_raw().iter().map(|&v| f32::from(v)).collect()),
            DynamicImage::ImageLuma16(b) => (1, b.as_raw().iter().map(|&v| f32::from(v)).collect()),
            DynamicImage::ImageRgb8(b) => (3, b.as_raw().iter().map(|&v| f32::from(v)).collect()),
            DynamicImage::ImageRgb16(b) => (3, b.as_raw().iter().map(|&v| f32::from(v)).collect()),
            DynamicImage::ImageLumaA8(_) | DynamicImage::ImageRgba8(_) => {
                let rgb = self.image.to_rgb8();
                (3, rgb.as_raw().iter().map(|&v| f32::from(v)).collect())
            }
            DynamicImage::ImageLumaA16(_) | DynamicImage::ImageRgba16(_) => {
                let rgb = self.image.to_rgb16();
                (3, rgb.as_raw().iter().map(|&v| f32::from(v)).collect())
            }
            other => (3, other.to_rgb32f().into_raw()),
        }
    }
}

/// Cuts crops out of the slice images of one image directory. Slice `i`
/// refers to the `i`-th image file in natural filename order.
#[derive(Debug, Clone)]
pub struct CropExtractor {
    image_dir: PathBuf,
    filenames: Vec<String>,
    half_window: u32,
}

impl CropExtractor {
    pub fn new(image_dir: impl Into<PathBuf>, filenames_by_slice: Vec<String>, half_window: u32) -> Self {
        Self {
            image_dir: image_dir.into(),
            filenames: filenames_by_slice,
            half_window,
        }
    }

    pub fn from_dir(image_dir: &Path, extensions: &[String], half_window: u32) -> CellResult<Self> {
        let filenames = list_images(image_dir, extensions)?;
        debug!(
            "registered {} slice images in {}",
            filenames.len(),
            image_dir.display()
        );
        Ok(Self::new(image_dir, filenames, half_window))
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn half_window(&self) -> u32 {
        self.half_window
    }

    pub fn image_path(&self, slice: i64) -> CellResult<PathBuf> {
        usize::try_from(slice)
            .ok()
            .and_then(|i| self.filenames.get(i))
            .map(|name| self.image_dir.join(name))
            .ok_or(CellError::MissingImage {
                slice,
                available: self.filenames.len(),
            })
    }

    /// Window `[row-h, row+h) x [col-h, col+h)`. Never pads or clamps.
    pub fn extract(&self, coordinate: &Coordinate) -> CellResult<Crop> {
        let path = self.image_path(coordinate.slice)?;
        let source = decode_unbounded(&path)?;

        let (width, height) = (source.width(), source.height());
        let (Some(top), Some(left)) = (
            window_start(coordinate.row, self.half_window, height),
            window_start(coordinate.col, self.half_window, width),
        ) else {
            return Err(CellError::Bounds {
                coordinate: *coordinate,
                half_window: self.half_window,
                width,
                height,
            });
        };

        let side = 2 * self.half_window;
        Ok(Crop {
            coordinate: *coordinate,
            image: source.crop_imm(left, top, side, side),
        })
    }
}

/// Start of `[centre-h, centre+h)` when it lies inside `[0, limit)`.
/// Overflow on extreme coordinates counts as out of bounds.
fn window_start(centre: i64, half_window: u32, limit: u32) -> Option<u32> {
    let h = i64::from(half_window);
    let start = centre.checked_sub(h)?;
    let end = centre.checked_add(h)?;
    if start < 0 || end > i64::from(limit) {
        return None;
    }
    u32::try_from(start).ok()
}

/// Image file names in `dir` whose extension is in `extensions`
/// (case-insensitive), naturally sorted.
pub fn list_images(dir: &Path, extensions: &[String]) -> CellResult<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| CellError::io(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CellError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)));
        if let (true, Some(name)) = (matches, path.file_name().and_then(|n| n.to_str())) {
            names.push(name.to_string());
        }
    }
    names.sort_by(|a, b| natural_cmp(a, b));
    Ok(names)
}

fn decode_unbounded(path: &Path) -> CellResult<DynamicImage> {
    let mut reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| CellError::io(path, e))?;
    reader.no_limits();
    reader.decode().map_err(|source| CellError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })
}
