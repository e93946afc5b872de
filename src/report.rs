use crate::{
    aggregate::{Counts, TaskFailure},
    coords::{Coordinate, MarkerFormat},
    error::{CellError, ErrorKind},
    util::format_elapsed,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub files: Vec<FileReport>,
    pub elapsed_secs: f64,
}

impl RunReport {
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_secs)
    }

    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed())
    }

    pub fn failed_files(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Failed { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub marker_path: String,
    pub format: Option<MarkerFormat>,
    pub elapsed_secs: f64,
    pub outcome: FileOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<String>,
}

impl FileReport {
    pub fn counts(&self) -> Option<Counts> {
        match &self.outcome {
            FileOutcome::Completed { counts, .. } => Some(*counts),
            FileOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Completed {
        counts: Counts,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failures: Vec<TaskFailure>,
    },
    Failed {
        kind: ErrorKind,
        task_index: Option<usize>,
        coordinate: Option<Coordinate>,
        message: String,
    },
}

impl FileOutcome {
    pub fn failed(err: &CellError) -> Self {
        let (task_index, coordinate) = match err {
            CellError::Task {
                index, coordinate, ..
            } => (Some(*index), Some(*coordinate)),
            _ => (None, None),
        };
        FileOutcome::Failed {
            kind: err.kind(),
            task_index,
            coordinate,
            message: err.to_string(),
        }
    }
}
