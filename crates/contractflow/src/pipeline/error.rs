use thiserror::Error;

use crate::error::ProcessError;
use crate::extraction::ExtractionError;
use crate::storage::StorageError;
use crate::validation::ValidationError;

use super::stage::Stage;

/// A failure inside one stage. Every variant but `Validation` is fatal
/// for the job.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Classification failed: {0}")]
    Classification(#[source] ProcessError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Entity extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Classification succeeded but found content no path handles.
    #[error("Unsupported document format: {0}")]
    UnsupportedContent(String),

    /// A stage ran without the output of the stage it depends on.
    #[error("Missing input for stage: {0}")]
    MissingInput(&'static str),

    #[error("Stage cancelled")]
    Cancelled,
}

impl StageError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            StageError::Cancelled | StageError::Extraction(ExtractionError::Cancelled)
        )
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// No processing path accepts the document: either its extension is
    /// unknown (raised before any stage runs) or classification found
    /// content none of the paths handle.
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageError,
    },

    #[error("Job cancelled before stage '{0}'")]
    Cancelled(Stage),

    /// The audit trail could not be written, so the job cannot vouch for
    /// what it did.
    #[error("Audit trail write failed ({what}): {source}")]
    Audit {
        what: &'static str,
        #[source]
        source: StorageError,
    },
}
