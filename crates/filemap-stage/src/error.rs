//! Stage error types.

use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::mapper::BoxError;

/// Result of processing one record.
pub type StageResult<T> = Result<T, StageError>;

/// A record failed inside a stage.
///
/// Raised for a mapper error, a completion-callback error, or a live body
/// that failed while being drained. The original error is kept as-is and
/// can be inspected with [`downcast_ref()`](StageError::downcast_ref).
#[derive(Debug, Error)]
#[error("stage `{stage}` failed on {}: {source}", .path.display())]
pub struct StageError {
    stage: String,
    path: PathBuf,
    #[source]
    source: BoxError,
}

impl StageError {
    pub(crate) fn new(stage: impl Into<String>, path: impl Into<PathBuf>, source: BoxError) -> Self {
        Self {
            stage: stage.into(),
            path: path.into(),
            source,
        }
    }

    /// Name of the stage that raised the error.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Path of the record that failed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The error exactly as the mapper or the live body produced it.
    pub fn source_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}
