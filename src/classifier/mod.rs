pub mod python;
pub mod types;

use crate::{coords::Label, crop::Crop, error::CellResult};

pub use python::{PythonClassifier, PythonClassifierFactory};
pub use types::{ClassifierDiag, ClassifyIn, ClassifyOut, ReadyOut};

/// A loaded binary cell classifier. Not required to be thread-safe; each
/// pool worker drives its own instance.
pub trait Classifier {
    fn classify(&mut self, crop: &Crop) -> CellResult<Label>;
}

/// Produces one classifier per pool worker. `load` is the expensive step.
pub trait ClassifierFactory: Sync {
    type Classifier: Classifier + Send;

    fn load(&self) -> CellResult<Self::Classifier>;
}

impl<F, C> ClassifierFactory for F
where
    F: Fn() -> CellResult<C> + Sync,
    C: Classifier + Send,
{
    type Classifier = C;

    fn load(&self) -> CellResult<C> {
        self()
    }
}

impl Label {
    /// Model output `0` means a cell; anything else is rejected.
    pub fn from_prediction(value: f64) -> Label {
        if value == 0.0 {
            Label::Confirmed
        } else {
            Label::Rejected
        }
    }
}
