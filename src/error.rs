use crate::coords::Coordinate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type CellResult<T> = Result<T, CellError>;

#[derive(Debug, Error)]
pub enum CellError {
    #[error("parse error in {path}: {msg}")]
    Parse { path: PathBuf, msg: String },

    #[error(
        "crop window of half-size {half_window} around {coordinate} exceeds image bounds {width}x{height}"
    )]
    Bounds {
        coordinate: Coordinate,
        half_window: u32,
        width: u32,
        height: u32,
    },

    #[error("no image registered for slice {slice} ({available} images available)")]
    MissingImage { slice: i64, available: usize },

    #[error("image decode error at {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("classifier load failed: {0}")]
    ClassifierLoad(String),

    #[error("classifier failed: {0}")]
    Classify(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("task {index} at {coordinate} failed: {source}")]
    Task {
        index: usize,
        coordinate: Coordinate,
        #[source]
        source: Box<CellError>,
    },

    #[error("result slot {index} recorded twice")]
    DuplicateRecord { index: usize },

    #[error("result slot {index} out of range for {len} tasks")]
    SlotOutOfRange { index: usize, len: usize },

    #[error("batch incomplete: {done} of {expected} tasks accounted for")]
    Incomplete { done: usize, expected: usize },

    #[error("worker pool: {0}")]
    Pool(String),
}

/// Coarse error category carried into reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    Bounds,
    MissingImage,
    ImageDecode,
    ClassifierLoad,
    Classify,
    Io,
    Internal,
}

impl CellError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CellError::Parse { .. } => ErrorKind::Parse,
            CellError::Bounds { .. } => ErrorKind::Bounds,
            CellError::MissingImage { .. } => ErrorKind::MissingImage,
            CellError::ImageDecode { .. } => ErrorKind::ImageDecode,
            CellError::ClassifierLoad(_) => ErrorKind::ClassifierLoad,
            CellError::Classify(_) => ErrorKind::Classify,
            CellError::Io { .. } => ErrorKind::Io,
            CellError::Task { source, .. } => source.kind(),
            CellError::DuplicateRecord { .. }
            | CellError::SlotOutOfRange { .. }
            | CellError::Incomplete { .. }
            | CellError::Pool(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error poisons the whole run rather than a single marker file.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::ClassifierLoad
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        CellError::Parse {
            path: path.into(),
            msg: msg.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CellError::Io {
            path: path.into(),
            source,
        }
    }
}
