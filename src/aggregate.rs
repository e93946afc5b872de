use crate::{
    coords::{Coordinate, Label},
    error::{CellError, CellResult, ErrorKind},
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Labeled(Label),
    Failed,
}

/// A task that was skipped under the `skip` failure policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub index: usize,
    pub coordinate: Coordinate,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub total: usize,
    pub confirmed: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Pre-sized, index-addressed outcome storage for one marker set.
///
/// Every task index owns one write-once slot, so concurrent workers never
/// contend on the write path. Only the failure details, which are appended,
/// sit behind a lock.
#[derive(Debug)]
pub struct BatchResult {
    slots: Vec<OnceLock<Slot>>,
    recorded: AtomicUsize,
    failures: Mutex<Vec<TaskFailure>>,
}

impl BatchResult {
    pub fn with_len(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
            recorded: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots written so far, labels and failures alike.
    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.recorded() == self.len()
    }

    pub fn record(&self, index: usize, label: Label) -> CellResult<()> {
        self.fill(index, Slot::Labeled(label))
    }

    pub fn record_failure(
        &self,
        index: usize,
        coordinate: Coordinate,
        error: &CellError,
    ) -> CellResult<()> {
        self.fill(index, Slot::Failed)?;
        let failure = TaskFailure {
            index,
            coordinate,
            kind: error.kind(),
            message: error.to_string(),
        };
        self.failures
            .lock()
            .map_err(|_| CellError::Pool("failure list lock poisoned".into()))?
            .push(failure);
        Ok(())
    }

    fn fill(&self, index: usize, slot: Slot) -> CellResult<()> {
        let cell = self.slots.get(index).ok_or(CellError::SlotOutOfRange {
            index,
            len: self.slots.len(),
        })?;
        cell.set(slot)
            .map_err(|_| CellError::DuplicateRecord { index })?;
        self.recorded.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Consumes the result once every slot is written.
    pub fn finalize(self) -> CellResult<FinalizedBatch> {
        let expected = self.slots.len();
        let done = self.recorded.load(Ordering::Acquire);
        if done != expected {
            return Err(CellError::Incomplete { done, expected });
        }

        let mut counts = Counts {
            total: expected,
            ..Counts::default()
        };
        let labels: Vec<Option<Label>> = self
            .slots
            .into_iter()
            .map(|cell| match cell.into_inner() {
                Some(Slot::Labeled(label)) => {
                    match label {
                        Label::Confirmed => counts.confirmed += 1,
                        Label::Rejected => counts.rejected += 1,
                    }
                    Some(label)
                }
                Some(Slot::Failed) | None => {
                    counts.failed += 1;
                    None
                }
            })
            .collect();

        let mut failures = self
            .failures
            .into_inner()
            .map_err(|_| CellError::Pool("failure list lock poisoned".into()))?;
        failures.sort_by_key(|f| f.index);

        Ok(FinalizedBatch {
            labels,
            counts,
            failures,
        })
    }
}

/// Read-only outcome of a completed batch.
#[derive(Debug, Clone)]
pub struct FinalizedBatch {
    labels: Vec<Option<Label>>,
    counts: Counts,
    failures: Vec<TaskFailure>,
}

impl FinalizedBatch {
    /// Label per task index; `None` for skipped tasks.
    pub fn labels(&self) -> &[Option<Label>] {
        &self.labels
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    /// Splits `coordinates` (the marker set this batch ran over) into
    /// confirmed and rejected lists, keeping input order.
    pub fn partition(&self, coordinates: &[Coordinate]) -> (Vec<Coordinate>, Vec<Coordinate>) {
        let mut confirmed = Vec::with_capacity(self.counts.confirmed);
        let mut rejected = Vec::with_capacity(self.counts.rejected);
        for (coordinate, label) in coordinates.iter().zip(&self.labels) {
            match label {
                Some(Label::Confirmed) => confirmed.push(*coordinate),
                Some(Label::Rejected) => rejected.push(*coordinate),
                None => {}
            }
        }
        (confirmed, rejected)
    }
}
