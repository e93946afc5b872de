use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A candidate detection: pixel row/column inside the image of a given slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub row: i64,
    pub col: i64,
    pub slice: i64,
}

impl Coordinate {
    pub fn new(row: i64, col: i64, slice: i64) -> Self {
        Self { row, col, slice }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.row, self.col, self.slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerFormat {
    Csv,
    Xml,
}

impl MarkerFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(MarkerFormat::Csv),
            "xml" => Some(MarkerFormat::Xml),
            _ => None,
        }
    }
}

/// Coordinates of one marker file, in file order. The position of a
/// coordinate is its task index for the rest of the pipeline.
#[derive(Debug, Clone)]
pub struct MarkerSet {
    path: PathBuf,
    format: MarkerFormat,
    coordinates: Vec<Coordinate>,
}

impl MarkerSet {
    pub fn new(path: impl Into<PathBuf>, format: MarkerFormat, coordinates: Vec<Coordinate>) -> Self {
        Self {
            path: path.into(),
            format,
            coordinates,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> MarkerFormat {
        self.format
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// File stem used to name exported marker lists.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("markers")
            .to_string()
    }
}
