use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{ApiClient, ClientError};
use crate::config::BackendConfig;
use crate::extraction::prompt::{self, ModelReply};
use crate::extraction::{
    Extraction, ExtractionError, ExtractionRequest, Extractor, IntermediateRecord, ModelAttempt,
};
use crate::processor::Block;
use crate::router::ModelRouter;
use crate::secrets;

struct Backend {
    config: BackendConfig,
    /// Resolution failures are kept so that choosing this backend counts as
    /// an invocation failure instead of aborting startup.
    api_key: Result<Option<SecretString>, String>,
}

/// Extraction through the model router and the shared API client.
pub struct LlmExtractor {
    router: Arc<ModelRouter>,
    client: Arc<ApiClient>,
    backends: HashMap<String, Backend>,
    max_blocks: usize,
}

impl LlmExtractor {
    pub fn new(
        router: Arc<ModelRouter>,
        client: Arc<ApiClient>,
        backends: &[BackendConfig],
        max_blocks: usize,
    ) -> Self {
        let backends = backends
            .iter()
            .map(|config| {
                let api_key = secrets::resolve_api_key(config).map_err(|e| {
                    warn!(model = %config.model, error = %e, "API key unavailable");
                    e.to_string()
                });
                (
                    config.model.clone(),
                    Backend {
                        config: config.clone(),
                        api_key,
                    },
                )
            })
            .collect();

        Self {
            router,
            client,
            backends,
            max_blocks,
        }
    }

    async fn invoke(
        &self,
        model: &str,
        document: &str,
        cancel: &CancellationToken,
    ) -> Result<ModelReply, ExtractionError> {
        let failed = |reason: String| ExtractionError::Invocation {
            model: model.to_string(),
            reason,
        };

        let backend = self
            .backends
            .get(model)
            .ok_or_else(|| failed("No backend configured for this model".to_string()))?;
        let api_key = backend.api_key.as_ref().map_err(|e| failed(e.clone()))?;
        let request = prompt::build_request(&backend.config, api_key.as_ref(), document)
            .map_err(failed)?;

        let response = match self.client.call(&request, true, cancel).await {
            Ok(response) => response,
            Err(ClientError::Cancelled) => return Err(ExtractionError::Cancelled),
            Err(e) => return Err(failed(e.to_string())),
        };
        prompt::parse_reply(backend.config.api_format, &response).map_err(failed)
    }

    fn attempt(&self, model: &str, reply: Option<&ModelReply>, error: Option<String>) -> ModelAttempt {
        let (input_tokens, output_tokens) = reply
            .map(|r| (r.input_tokens, r.output_tokens))
            .unwrap_or((0, 0));
        ModelAttempt {
            model: model.to_string(),
            success: error.is_none(),
            input_tokens,
            output_tokens,
            cost_usd: self.router.estimate_cost(model, input_tokens, output_tokens),
            error,
        }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract_all(
        &self,
        blocks: &[Block],
        request: &ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<Extraction, ExtractionError> {
        let selection =
            self.router
                .select_model(request.signals, request.forced_model.as_deref(), request.mode);
        info!(
            model = %selection.model,
            reason = ?selection.reason,
            complexity = selection.complexity,
            is_scanned = selection.is_scanned,
            "Model selected"
        );

        if blocks.is_empty() {
            info!("No content blocks, skipping model invocation");
            return Ok(Extraction {
                record: IntermediateRecord::default(),
                selection,
                attempts: Vec::new(),
                tokens_used: 0,
                cost_usd: 0.0,
            });
        }

        let document = prompt::render_blocks(blocks, self.max_blocks);
        let mut attempts: Vec<ModelAttempt> = Vec::new();
        let mut tried = HashSet::new();
        let mut model = selection.model.clone();

        loop {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }
            tried.insert(model.clone());

            let outcome = match self.invoke(&model, &document, cancel).await {
                Ok(reply) => match IntermediateRecord::from_model_output(&reply.content) {
                    Ok(record) => Ok((reply, record)),
                    Err(e) => Err((Some(reply), format!("Unparseable model output: {}", e))),
                },
                Err(ExtractionError::Invocation { reason, .. }) => Err((None, reason)),
                Err(e) => return Err(e),
            };

            match outcome {
                Ok((reply, mut record)) => {
                    attempts.push(self.attempt(&model, Some(&reply), None));
                    record.source_blocks = blocks.len();
                    let tokens_used = attempts
                        .iter()
                        .map(|a| a.input_tokens + a.output_tokens)
                        .sum();
                    let cost = attempts.iter().map(|a| a.cost_usd).sum::<f64>();
                    return Ok(Extraction {
                        record,
                        selection,
                        attempts,
                        tokens_used,
                        cost_usd: (cost * 1e6).round() / 1e6,
                    });
                }
                Err((reply, reason)) => {
                    warn!(model = %model, error = %reason, "Model invocation failed");
                    attempts.push(self.attempt(&model, reply.as_ref(), Some(reason.clone())));

                    match self
                        .router
                        .get_fallback(&model)
                        .filter(|next| !tried.contains(next))
                    {
                        Some(next) => {
                            info!(from = %model, to = %next, "Falling back to next model");
                            model = next;
                        }
                        None => {
                            return Err(ExtractionError::FallbackExhausted {
                                reason: selection.reason,
                                tried: attempts.into_iter().map(|a| a.model).collect(),
                                last_error: reason,
                            })
                        }
                    }
                }
            }
        }
    }
}
