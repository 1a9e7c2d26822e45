//! Smart model router.
//!
//! Maps document signals to a model id, defines the fallback chain used
//! when an invocation fails, and prices token usage. Holds no mutable
//! state shared across jobs; the routing history is an injected
//! collaborator.

pub mod catalog;
pub mod history;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;

pub use catalog::{ModelCatalog, ModelPricing, ModelRole};
pub use history::{HistoryError, RoutingHistory, RoutingOutcome, SqliteRoutingHistory};

/// Fewest similar documents needed before history may steer routing.
const RAG_MIN_SIMILAR: usize = 3;
/// Success rate the default worker must reach on similar documents.
const RAG_MIN_SUCCESS_RATE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Signals, history and rules decide.
    Auto,
    /// Always the high-capability model.
    Expert,
    /// Always the low-cost testing model.
    Testing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    Forced,
    ExpertMode,
    TestingMode,
    RagSuggested,
    RuleBased,
}

impl SelectionReason {
    /// Only choices made from document signals say anything about how well
    /// a model handles such documents; forced and mode picks do not.
    pub fn feeds_history(&self) -> bool {
        matches!(self, SelectionReason::RagSuggested | SelectionReason::RuleBased)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingSignals {
    /// 0.0 (trivial) to 1.0 (very hard).
    pub complexity: f64,
    pub is_scanned: bool,
}

/// A routing decision. Embedded in the extraction stage's output summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSelection {
    pub model: String,
    pub reason: SelectionReason,
    pub complexity: f64,
    pub is_scanned: bool,
}

/// What the routing history says about using the default worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RagAdvice {
    /// No history, history disabled, lookup failed or too few similar documents.
    Unavailable,
    /// The default worker did well on similar documents.
    Favorable,
    /// It did not; use the expert model.
    Unfavorable,
}

pub struct ModelRouter {
    catalog: ModelCatalog,
    complexity_threshold: f64,
    fallback_enabled: bool,
    rag_enabled: bool,
    rag_sample_size: usize,
    history: Option<Arc<dyn RoutingHistory>>,
}

impl ModelRouter {
    pub fn from_config(config: &Config) -> Self {
        let router = &config.router;
        Self {
            catalog: ModelCatalog::new(router, &config.backends),
            complexity_threshold: router.complexity_threshold,
            fallback_enabled: router.fallback_enabled,
            rag_enabled: router.rag_enabled,
            rag_sample_size: router.rag_sample_size,
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn RoutingHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn complexity_threshold(&self) -> f64 {
        self.complexity_threshold
    }

    /// Picks the model for a document.
    ///
    /// Priority: forced model, expert mode, testing mode, routing history,
    /// then the complexity rule.
    pub fn select_model(
        &self,
        signals: RoutingSignals,
        forced: Option<&str>,
        mode: RoutingMode,
    ) -> ModelSelection {
        let pick = |role: ModelRole, reason: SelectionReason| ModelSelection {
            model: self.catalog.model_for(role).to_string(),
            reason,
            complexity: signals.complexity,
            is_scanned: signals.is_scanned,
        };

        if let Some(forced) = forced.filter(|f| !f.trim().is_empty()) {
            return ModelSelection {
                model: self.catalog.normalize(forced),
                reason: SelectionReason::Forced,
                complexity: signals.complexity,
                is_scanned: signals.is_scanned,
            };
        }

        match mode {
            RoutingMode::Expert => {
                return pick(ModelRole::ExpertFallback, SelectionReason::ExpertMode)
            }
            RoutingMode::Testing => return pick(ModelRole::Testing, SelectionReason::TestingMode),
            RoutingMode::Auto => {}
        }

        match self.rag_advice(signals.complexity) {
            RagAdvice::Favorable => {
                return pick(ModelRole::DefaultWorker, SelectionReason::RagSuggested)
            }
            RagAdvice::Unfavorable => {
                return pick(ModelRole::ExpertFallback, SelectionReason::RagSuggested)
            }
            RagAdvice::Unavailable => {}
        }

        // The scanned+complex case is subsumed by the plain threshold check.
        if signals.complexity > self.complexity_threshold {
            pick(ModelRole::ExpertFallback, SelectionReason::RuleBased)
        } else {
            pick(ModelRole::DefaultWorker, SelectionReason::RuleBased)
        }
    }

    /// Consults the routing history. Never fails: problems degrade to
    /// [`RagAdvice::Unavailable`].
    pub fn rag_advice(&self, complexity: f64) -> RagAdvice {
        let history = match (&self.history, self.rag_enabled) {
            (Some(history), true) => history,
            _ => return RagAdvice::Unavailable,
        };

        let similar = match history.similar(complexity, self.rag_sample_size) {
            Ok(similar) => similar,
            Err(e) => {
                warn!(error = %e, "Routing history lookup failed, using rules");
                return RagAdvice::Unavailable;
            }
        };

        if similar.len() < RAG_MIN_SIMILAR {
            debug!(found = similar.len(), "Not enough similar documents for history routing");
            return RagAdvice::Unavailable;
        }

        let default_model = self.catalog.model_for(ModelRole::DefaultWorker);
        let (routed, succeeded) = similar
            .iter()
            .filter(|o| o.model == default_model)
            .fold((0usize, 0usize), |(n, ok), o| (n + 1, ok + usize::from(o.success)));

        let success_rate = if routed == 0 {
            0.0
        } else {
            succeeded as f64 / routed as f64
        };
        debug!(similar = similar.len(), routed, success_rate, "History routing advice");

        if success_rate >= RAG_MIN_SUCCESS_RATE {
            RagAdvice::Favorable
        } else {
            RagAdvice::Unfavorable
        }
    }

    /// Next model to try after `failed_model` failed, or `None` when the
    /// chain ends or fallback is disabled.
    ///
    /// Chain: default worker → expert → reserve → none; testing → default worker.
    pub fn get_fallback(&self, failed_model: &str) -> Option<String> {
        if !self.fallback_enabled {
            return None;
        }
        let failed = self.catalog.normalize(failed_model);
        let next = match self.catalog.role_of(&failed)? {
            ModelRole::DefaultWorker => ModelRole::ExpertFallback,
            ModelRole::ExpertFallback => ModelRole::ReserveChannel,
            ModelRole::ReserveChannel => return None,
            ModelRole::Testing => ModelRole::DefaultWorker,
        };
        Some(self.catalog.model_for(next).to_string())
    }

    /// USD cost of a call, rounded to 6 decimal places. Unknown models cost 0.
    pub fn estimate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let Some(pricing) = self.catalog.pricing(model) else {
            return 0.0;
        };
        let cost = (input_tokens as f64 / 1e6) * pricing.input_per_million
            + (output_tokens as f64 / 1e6) * pricing.output_per_million;
        (cost * 1e6).round() / 1e6
    }

    /// Feeds a finished document back into the routing history, if any.
    pub fn record_outcome(&self, job_id: &str, outcome: &RoutingOutcome) {
        if let Some(history) = &self.history {
            if let Err(e) = history.record(job_id, outcome) {
                warn!(error = %e, "Failed to record routing outcome");
            }
        }
    }
}
