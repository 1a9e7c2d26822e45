//! Document processing orchestrator.
//!
//! Classifies a document, picks one of three processing paths and runs the
//! path's stages strictly in order, logging exactly one [`StageRecord`]
//! per attempted stage.

pub mod context;
pub mod error;
pub mod path;
pub mod runner;
pub mod stage;

pub use context::PipelineContext;
pub use error::{PipelineError, StageError};
pub use path::ProcessingPath;
pub use runner::{Pipeline, PipelineParts};
pub use stage::{Stage, StageOutput, StageRecord, StageStatus};
