use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::{parallel_limited, ApiClient, ClientConfig};
use crate::config::{Config, PipelineSettings};
use crate::db::Database;
use crate::error::{ContractflowError, ProcessError};
use crate::extraction::{
    complexity_score, ExtractionError, ExtractionRequest, Extractor, LlmExtractor,
};
use crate::processor::{BlockKind, DocumentFormat, PageImage, PageText, Processors};
use crate::router::{ModelRouter, RoutingOutcome, RoutingSignals, SqliteRoutingHistory};
use crate::sanitize;
use crate::storage::{AuditLog, RecordStore, SqliteStore, StorageError};
use crate::validation::{ContractValidator, Validator};
use crate::worker::{JobInput, ProcessingResult};

use super::context::PipelineContext;
use super::error::{PipelineError, StageError};
use super::path::ProcessingPath;
use super::stage::{Stage, StageOutput, StageRecord, StageStatus};

/// The collaborators a pipeline drives.
#[derive(Clone)]
pub struct PipelineParts {
    pub processors: Processors,
    pub extractor: Arc<dyn Extractor>,
    pub validator: Arc<dyn Validator>,
    pub audit: Arc<dyn AuditLog>,
    pub records: Arc<dyn RecordStore>,
    pub router: Arc<ModelRouter>,
}

pub struct Pipeline {
    parts: PipelineParts,
    settings: PipelineSettings,
    testing_mode: bool,
}

impl Pipeline {
    /// Production constructor: builds every collaborator from config over
    /// one SQLite database.
    pub fn from_config(config: &Config, db: Database) -> Result<Self, ContractflowError> {
        let history = Arc::new(SqliteRoutingHistory::new(db.clone()));
        let router = Arc::new(ModelRouter::from_config(config).with_history(history));
        let client = Arc::new(ApiClient::new(ClientConfig::from_settings(&config.client))?);
        let extractor = Arc::new(LlmExtractor::new(
            Arc::clone(&router),
            client,
            &config.backends,
            config.pipeline.max_blocks_per_request,
        ));
        let store = Arc::new(SqliteStore::new(db));

        let parts = PipelineParts {
            processors: Processors::from_settings(&config.pipeline)?,
            extractor,
            validator: Arc::new(ContractValidator::new()),
            audit: store.clone(),
            records: store,
            router,
        };
        Ok(Self::new(
            parts,
            config.pipeline.clone(),
            config.router.testing_mode,
        ))
    }

    /// Injects specific collaborators.
    pub fn new(parts: PipelineParts, settings: PipelineSettings, testing_mode: bool) -> Self {
        Self {
            parts,
            settings,
            testing_mode,
        }
    }

    /// Runs one document from raw bytes to a stored record. Never fails:
    /// a failed job comes back as an unsuccessful [`ProcessingResult`].
    pub async fn process_document(
        &self,
        input: JobInput,
        cancel: &CancellationToken,
    ) -> ProcessingResult {
        let started = Instant::now();
        let filename = sanitize::redact_path(Path::new(&input.filename));

        if DocumentFormat::from_filename(&input.filename).is_none() {
            let err = PipelineError::UnsupportedFormat(filename.clone());
            warn!(filename = %filename, "Rejected document: {}", err);
            let job_id = uuid::Uuid::new_v4().to_string();
            return ProcessingResult::failure(
                &job_id,
                err.to_string(),
                started.elapsed(),
                Vec::new(),
                Vec::new(),
            );
        }

        let routing_mode = input.mode.routing_mode(self.testing_mode);
        let ctx = PipelineContext::new(input, routing_mode);
        let span = info_span!("pipeline",
            job_id = %ctx.job.id,
            filename = %filename,
            mode = ctx.job.mode.as_str(),
        );
        self.run(ctx, cancel).instrument(span).await
    }

    async fn run(&self, mut ctx: PipelineContext, cancel: &CancellationToken) -> ProcessingResult {
        if let Err(source) = self.parts.audit.create_job(&ctx.job) {
            let err = PipelineError::Audit {
                what: "create job",
                source,
            };
            error!("Document rejected: {}", err);
            return ProcessingResult::failure(
                &ctx.job.id,
                err.to_string(),
                ctx.started.elapsed(),
                Vec::new(),
                Vec::new(),
            );
        }

        let outcome = self.run_stages(&mut ctx, cancel).await;

        if let Some(routing) = ctx.routing_outcome.take() {
            self.parts.router.record_outcome(&ctx.job.id, &routing);
        }

        let duration = ctx.started.elapsed();
        let outcome = outcome.and_then(|()| {
            ctx.record_id
                .clone()
                .ok_or(PipelineError::Stage {
                    stage: Stage::Storage,
                    source: StageError::MissingInput("record id"),
                })
        });

        match outcome {
            Ok(record_id) => {
                ctx.job.succeed(record_id.clone());
                self.warn_on_failure("finalize job", self.parts.audit.update_job(&ctx.job));
                info!(
                    record_id = %record_id,
                    issues = ctx.issues.len(),
                    duration_ms = duration.as_millis() as u64,
                    "Document processed"
                );
                ProcessingResult::success(&ctx.job, record_id, duration, ctx.stages, ctx.issues)
            }
            Err(e) => {
                let message = e.to_string();
                ctx.job.fail(message.clone());
                self.warn_on_failure("finalize job", self.parts.audit.update_job(&ctx.job));
                error!(duration_ms = duration.as_millis() as u64, "Document failed: {}", message);
                ProcessingResult::failure(&ctx.job.id, message, duration, ctx.stages, ctx.issues)
            }
        }
    }

    async fn run_stages(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.run_stage(ctx, Stage::Classification, cancel).await?;

        let path = ctx.path.ok_or(PipelineError::Stage {
            stage: Stage::Classification,
            source: StageError::MissingInput("processing path"),
        })?;
        debug!(path = path.as_str(), "Processing path selected");

        for &stage in path.stages().iter().skip(1) {
            self.run_stage(ctx, stage, cancel).await?;
        }
        Ok(())
    }

    /// Runs and logs one stage. Validation failures are logged as partial
    /// and do not stop the job; every other failure does.
    async fn run_stage(
        &self,
        ctx: &mut PipelineContext,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(stage));
        }

        let started = Instant::now();
        let result = self
            .execute(ctx, stage, cancel)
            .instrument(info_span!("stage", stage = stage.as_str()))
            .await;
        let duration = started.elapsed();

        let (status, output, error) = match &result {
            Ok(output) => (StageStatus::Success, output.clone(), None),
            Err(StageError::Validation(err)) => {
                let output = StageOutput::new()
                    .with("findings", err.findings().len())
                    .with(
                        "kinds",
                        err.findings().iter().map(|f| f.kind).collect::<Vec<_>>(),
                    );
                (StageStatus::Partial, output, Some(err.to_string()))
            }
            Err(e) => (StageStatus::Failed, StageOutput::new(), Some(e.to_string())),
        };

        let record = StageRecord {
            job_id: ctx.job.id.clone(),
            stage,
            status,
            tokens_used: output.tokens_used,
            cost_usd: output.cost_usd,
            output: output.summary,
            error,
            duration,
            created_at: Utc::now(),
        };
        let logged = self.parts.audit.append_stage(&record);
        ctx.stages.push(record);
        if let Err(source) = logged {
            return Err(PipelineError::Audit {
                what: "append stage log",
                source,
            });
        }

        match result {
            Ok(_) => {
                info!(
                    stage = stage.as_str(),
                    duration_ms = duration.as_millis() as u64,
                    "Stage succeeded"
                );
                Ok(())
            }
            Err(StageError::Validation(err)) => {
                let mut issue = err.to_issue(&ctx.job.id);
                issue.id = Some(self.parts.audit.create_issue(&issue).map_err(|source| {
                    PipelineError::Audit {
                        what: "create quality issue",
                        source,
                    }
                })?);
                warn!(
                    issue_type = %issue.issue_type,
                    severity = issue.severity.as_str(),
                    manual_review = issue.requires_manual_review,
                    "Validation incomplete, continuing: {}",
                    err
                );
                ctx.issues.push(issue);
                Ok(())
            }
            Err(source) if source.is_cancelled() => {
                info!(stage = stage.as_str(), "Stage cancelled");
                Err(PipelineError::Stage { stage, source })
            }
            Err(source) => {
                warn!(stage = stage.as_str(), "Stage failed: {}", source);
                Err(PipelineError::Stage { stage, source })
            }
        }
    }

    async fn execute(
        &self,
        ctx: &mut PipelineContext,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        match stage {
            Stage::Classification => self.step_classify(ctx),
            Stage::XmlParsing => self.step_parse_xml(ctx),
            Stage::Ocr => self.step_ocr(ctx, cancel).await,
            Stage::LayoutAnalysis => self.step_layout(ctx),
            Stage::EntityExtraction => self.step_extract(ctx, cancel).await,
            Stage::Validation => self.step_validate(ctx),
            Stage::Storage => self.step_store(ctx),
        }
    }

    fn step_classify(&self, ctx: &mut PipelineContext) -> Result<StageOutput, StageError> {
        let classification = self
            .parts
            .processors
            .classifier
            .classify(&ctx.bytes, &ctx.job.filename)
            .map_err(StageError::Classification)?;

        ctx.job.apply_classification(&classification);
        self.warn_on_failure("update job", self.parts.audit.update_job(&ctx.job));

        let Some(path) = ProcessingPath::select(&classification) else {
            return Err(StageError::UnsupportedContent(format!(
                "{} content in {}",
                classification.format.as_str(),
                sanitize::redact_path(Path::new(&ctx.job.filename))
            )));
        };

        let output = StageOutput::new()
            .with("format", classification.format.as_str())
            .with("is_searchable", classification.is_searchable)
            .with("page_count", classification.page_count)
            .with("confidence", classification.confidence)
            .with("path", path.as_str());
        ctx.path = Some(path);
        ctx.classification = Some(classification);
        Ok(output)
    }

    fn step_parse_xml(&self, ctx: &mut PipelineContext) -> Result<StageOutput, StageError> {
        let parsed = self.parts.processors.xml.parse(&ctx.bytes)?;
        let output = StageOutput::new()
            .with("blocks", parsed.blocks.len())
            .with("document_type", parsed.record.document_type.clone())
            .with("parties", parsed.record.parties.len())
            .with("clauses", parsed.record.clauses.len());
        ctx.blocks = parsed.blocks;
        ctx.record = Some(parsed.record);
        Ok(output)
    }

    /// OCRs every page, at most `page_concurrency` at a time. Pages that
    /// fail are skipped; the stage fails only when no page could be read.
    async fn step_ocr(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        let format = ctx
            .classification
            .as_ref()
            .map(|c| c.format)
            .ok_or(StageError::MissingInput("classification"))?;

        let images = if format.is_image() {
            vec![PageImage {
                number: 1,
                bytes: ctx.bytes.clone(),
            }]
        } else {
            let rendering = self
                .parts
                .processors
                .pdf
                .render_pages(&ctx.bytes, self.settings.ocr.dpi);
            tokio::select! {
                pages = rendering => pages?,
                _ = cancel.cancelled() => return Err(StageError::Cancelled),
            }
        };
        if images.is_empty() {
            return Err(ProcessError::OcrFailed("Document has no pages to read".to_string()).into());
        }

        let calls: Vec<_> = images
            .iter()
            .map(|page| {
                let ocr = Arc::clone(&self.parts.processors.ocr);
                move || async move { (page.number, ocr.extract_text(page).await) }
            })
            .collect();
        let results = tokio::select! {
            results = parallel_limited(calls, self.settings.page_concurrency) => results,
            _ = cancel.cancelled() => return Err(StageError::Cancelled),
        };

        let mut pages = Vec::with_capacity(results.len());
        let mut last_error = None;
        for (number, result) in results {
            match result {
                Ok(ocr) => pages.push(PageText {
                    number,
                    text: ocr.text,
                    confidence: Some(ocr.confidence),
                }),
                Err(e) => {
                    warn!(page = number, "OCR failed for page: {}", e);
                    last_error = Some(e);
                }
            }
        }
        if pages.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| ProcessError::OcrFailed("No page could be read".to_string()))
                .into());
        }

        let confidence =
            pages.iter().filter_map(|p| p.confidence).sum::<f64>() / pages.len() as f64;
        let output = StageOutput::new()
            .with("pages", pages.len())
            .with("pages_failed", images.len() - pages.len())
            .with("characters", pages.iter().map(|p| p.text.chars().count()).sum::<usize>())
            .with("mean_confidence", (confidence * 1e4).round() / 1e4);
        ctx.ocr_confidence = Some(confidence);
        ctx.pages = pages;
        Ok(output)
    }

    /// Segments every page into blocks and scores the document's complexity.
    /// On the text-native path the pages come from the PDF text layer.
    fn step_layout(&self, ctx: &mut PipelineContext) -> Result<StageOutput, StageError> {
        if !ctx.is_scanned() {
            let read_at_classify = ctx
                .classification
                .as_mut()
                .map(|c| std::mem::take(&mut c.text_layer))
                .unwrap_or_default();
            ctx.pages = if read_at_classify.is_empty() {
                self.parts.processors.pdf.text_pages(&ctx.bytes)?
            } else {
                read_at_classify
            };
        }

        let mut blocks = Vec::new();
        for page in &ctx.pages {
            blocks.extend(self.parts.processors.layout.segment(page)?);
        }

        let complexity = complexity_score(&blocks, ctx.page_count(), ctx.ocr_confidence);
        let output = StageOutput::new()
            .with("pages", ctx.pages.len())
            .with("blocks", blocks.len())
            .with(
                "tables",
                blocks.iter().filter(|b| b.kind == BlockKind::Table).count(),
            )
            .with("complexity", complexity);
        ctx.blocks = blocks;
        ctx.complexity = Some(complexity);
        Ok(output)
    }

    async fn step_extract(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        let signals = RoutingSignals {
            complexity: ctx.complexity.unwrap_or(0.0),
            is_scanned: ctx.is_scanned(),
        };
        let request = ExtractionRequest {
            signals,
            mode: ctx.routing_mode,
            forced_model: ctx.forced_model.clone(),
        };

        let extraction = match self
            .parts
            .extractor
            .extract_all(&ctx.blocks, &request, cancel)
            .await
        {
            Ok(extraction) => extraction,
            Err(err) => {
                if let ExtractionError::FallbackExhausted { reason, tried, .. } = &err {
                    ctx.routing_outcome = tried
                        .first()
                        .filter(|_| reason.feeds_history())
                        .map(|model| RoutingOutcome {
                            model: model.clone(),
                            complexity: signals.complexity,
                            is_scanned: signals.is_scanned,
                            success: false,
                        });
                }
                return Err(err.into());
            }
        };

        if !extraction.attempts.is_empty() && extraction.selection.reason.feeds_history() {
            ctx.routing_outcome = Some(RoutingOutcome {
                model: extraction.selection.model.clone(),
                complexity: signals.complexity,
                is_scanned: signals.is_scanned,
                success: extraction.first_choice_succeeded(),
            });
        }
        ctx.job.model = extraction.model().map(str::to_string);

        let output = StageOutput::new()
            .with("selection", serde_json::to_value(&extraction.selection).unwrap_or_default())
            .with("attempts", serde_json::to_value(&extraction.attempts).unwrap_or_default())
            .with("model", extraction.model())
            .with("blocks", ctx.blocks.len())
            .with_usage(extraction.tokens_used, extraction.cost_usd);
        ctx.record = Some(extraction.record.clone());
        ctx.extraction = Some(extraction);
        Ok(output)
    }

    fn step_validate(&self, ctx: &mut PipelineContext) -> Result<StageOutput, StageError> {
        let record = ctx
            .record
            .as_ref()
            .ok_or(StageError::MissingInput("intermediate record"))?;

        if let Err(err) = self.parts.validator.validate(record) {
            if let Some(outcome) = ctx.routing_outcome.as_mut() {
                outcome.success = false;
            }
            return Err(err.into());
        }

        Ok(StageOutput::new().with("findings", 0))
    }

    fn step_store(&self, ctx: &mut PipelineContext) -> Result<StageOutput, StageError> {
        let record = ctx
            .record
            .as_ref()
            .ok_or(StageError::MissingInput("intermediate record"))?;
        let record_id = self.parts.records.save_record(&ctx.job.id, record)?;
        let output = StageOutput::new()
            .with("record_id", record_id.clone())
            .with("open_issues", ctx.issues.len());
        ctx.record_id = Some(record_id);
        Ok(output)
    }

    /// Job-row updates only mirror state that the stage log already holds,
    /// so a failed update is logged and the job carries on.
    fn warn_on_failure(&self, what: &str, result: Result<(), StorageError>) {
        if let Err(e) = result {
            warn!("Failed to {}: {}", what, e);
        }
    }
}
