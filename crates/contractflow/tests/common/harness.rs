//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct provides a complete isolated environment for
//! testing the document processing pipeline, including:
//! - A temporary SQLite database with migrations applied
//! - The real classifier, PDF, layout, XML, extraction and storage stack
//! - A scripted transport in place of the model backends
//! - A fixed OCR engine so no Tesseract install is required

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use contractflow::client::{ApiClient, ClientConfig};
use contractflow::db::Database;
use contractflow::processor::{OcrEngine, OcrText, PageImage, Processors};
use contractflow::router::{ModelRouter, SqliteRoutingHistory};
use contractflow::validation::ContractValidator;
use contractflow::worker::{JobInput, ProcessingResult};
use contractflow::{Config, LlmExtractor, Pipeline, PipelineParts, ProcessError, SqliteStore};

use super::builders::ConfigBuilder;
use super::transport::ScriptedTransport;

/// OCR engine returning the same text for every page.
pub struct FixedOcr {
    text: String,
    confidence: f64,
}

impl FixedOcr {
    pub fn new(text: &str, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            confidence,
        })
    }
}

#[async_trait]
impl OcrEngine for FixedOcr {
    async fn extract_text(&self, _page: &PageImage) -> Result<OcrText, ProcessError> {
        Ok(OcrText {
            text: self.text.clone(),
            confidence: self.confidence,
        })
    }
}

/// Test harness providing an isolated execution environment for integration tests.
pub struct TestHarness {
    /// Temporary directory holding the database file.
    temp_dir: TempDir,
    pub config: Config,
    pub db: Database,
    pub store: SqliteStore,
    pub router: Arc<ModelRouter>,
    pub transport: Arc<ScriptedTransport>,
    pipeline: Arc<Pipeline>,
}

impl TestHarness {
    /// Create a harness with default settings and readable OCR output.
    pub fn new(transport: Arc<ScriptedTransport>) -> Self {
        Self::with_config(ConfigBuilder::new(), transport)
    }

    pub fn with_config(builder: ConfigBuilder, transport: Arc<ScriptedTransport>) -> Self {
        let ocr = FixedOcr::new(
            "This Lease Agreement is made between Acme GmbH and Beta Ltd for the office premises.",
            0.92,
        );
        Self::with_ocr(builder, transport, ocr)
    }

    pub fn with_ocr(
        builder: ConfigBuilder,
        transport: Arc<ScriptedTransport>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("contractflow.db"))
            .expect("Failed to open test database");
        let config = builder.build();

        let history = Arc::new(SqliteRoutingHistory::new(db.clone()));
        let router = Arc::new(ModelRouter::from_config(&config).with_history(history));
        let client = Arc::new(ApiClient::with_transport(
            ClientConfig::from_settings(&config.client),
            transport.clone(),
        ));
        let extractor = Arc::new(LlmExtractor::new(
            Arc::clone(&router),
            client,
            &config.backends,
            config.pipeline.max_blocks_per_request,
        ));
        let store = SqliteStore::new(db.clone());

        let mut processors =
            Processors::from_settings(&config.pipeline).expect("Failed to build processors");
        processors.ocr = ocr;

        let parts = PipelineParts {
            processors,
            extractor,
            validator: Arc::new(ContractValidator::new()),
            audit: Arc::new(store.clone()),
            records: Arc::new(store.clone()),
            router: Arc::clone(&router),
        };
        let pipeline = Arc::new(Pipeline::new(
            parts,
            config.pipeline.clone(),
            config.router.testing_mode,
        ));

        Self {
            temp_dir,
            config,
            db,
            store,
            router,
            transport,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline)
    }

    pub fn database_path(&self) -> PathBuf {
        self.temp_dir.path().join("contractflow.db")
    }

    /// Run a document through the full pipeline in auto mode.
    pub async fn process(&self, filename: &str, bytes: Vec<u8>) -> ProcessingResult {
        self.process_input(JobInput::new(filename, filename, bytes))
            .await
    }

    pub async fn process_input(&self, input: JobInput) -> ProcessingResult {
        self.pipeline
            .process_document(input, &CancellationToken::new())
            .await
    }

    /// Stage names as persisted in the stage log, in insertion order.
    pub fn logged_stages(&self, job_id: &str) -> Vec<String> {
        self.store
            .stage_log(job_id)
            .expect("Failed to read stage log")
            .into_iter()
            .map(|row| row.stage)
            .collect()
    }
}
