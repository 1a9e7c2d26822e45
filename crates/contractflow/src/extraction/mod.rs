//! Entity extraction: turns segmented blocks into an [`IntermediateRecord`]
//! by routing the document to a model backend and walking the fallback
//! chain when an invocation fails.

pub mod complexity;
pub mod llm;
pub mod prompt;
pub mod record;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::processor::Block;
use crate::router::{ModelSelection, RoutingMode, RoutingSignals, SelectionReason};

pub use complexity::complexity_score;
pub use llm::LlmExtractor;
pub use record::{Clause, IntermediateRecord, MonetaryAmount, Party};

#[derive(Error, Debug)]
pub enum ExtractionError {
    /// One model call failed; the caller may fall back to another model.
    #[error("Model '{model}' invocation failed: {reason}")]
    Invocation { model: String, reason: String },

    #[error("All models failed (tried {}): {last_error}", .tried.join(", "))]
    FallbackExhausted {
        /// Why the first model in `tried` was chosen.
        reason: SelectionReason,
        tried: Vec<String>,
        last_error: String,
    },

    #[error("Extraction cancelled")]
    Cancelled,
}

/// What the extraction stage knows about the document besides its blocks.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub signals: RoutingSignals,
    pub mode: RoutingMode,
    pub forced_model: Option<String>,
}

/// One model invocation, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelAttempt {
    pub model: String,
    pub success: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: IntermediateRecord,
    /// The router's initial decision.
    pub selection: ModelSelection,
    /// Every invocation in order; the last one succeeded. Empty when there
    /// was nothing to extract.
    pub attempts: Vec<ModelAttempt>,
    /// Summed over all attempts.
    pub tokens_used: u64,
    /// Summed over all attempts.
    pub cost_usd: f64,
}

impl Extraction {
    /// The model that produced the record, if any model ran.
    pub fn model(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.success)
            .map(|a| a.model.as_str())
    }

    /// The initially selected model succeeded without fallback.
    pub fn first_choice_succeeded(&self) -> bool {
        self.attempts.len() == 1 && self.attempts[0].success
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_all(
        &self,
        blocks: &[Block],
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<Extraction, ExtractionError>;
}
