pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod pipeline;
pub mod processor;
pub mod router;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod telemetry;
pub mod validation;
pub mod worker;

pub use client::{ApiClient, ClientConfig, ClientError, TransportError};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ContractflowError, ProcessError, Result, WorkerError};
pub use extraction::{ExtractionError, IntermediateRecord, LlmExtractor};
pub use pipeline::{Pipeline, PipelineError, PipelineParts, Stage, StageRecord, StageStatus};
pub use router::{ModelRouter, ModelSelection, RoutingMode};
pub use secrets::{resolve_secret, SecretError};
pub use storage::{AuditLog, MemoryStore, RecordStore, SqliteStore, StorageError};
pub use validation::{QualityIssue, Severity, ValidationError};
pub use worker::{JobInput, ProcessingMode, ProcessingResult, WorkerPool};
