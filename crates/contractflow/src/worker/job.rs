use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::StageRecord;
use crate::processor::{Classification, DocumentFormat};
use crate::router::RoutingMode;
use crate::validation::QualityIssue;

/// How much effort the caller wants spent on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Auto,
    Fast,
    Deep,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Auto => "auto",
            ProcessingMode::Fast => "fast",
            ProcessingMode::Deep => "deep",
        }
    }

    /// Routing mode for this processing mode. `deep` always goes to the
    /// expert model; a router in testing mode overrides `auto` and `fast`.
    pub fn routing_mode(&self, testing: bool) -> RoutingMode {
        match self {
            ProcessingMode::Deep => RoutingMode::Expert,
            _ if testing => RoutingMode::Testing,
            _ => RoutingMode::Auto,
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ProcessingMode::Auto),
            "fast" => Ok(ProcessingMode::Fast),
            "deep" => Ok(ProcessingMode::Deep),
            other => Err(format!("unknown processing mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// What a caller submits for processing.
#[derive(Debug, Clone)]
pub struct JobInput {
    pub document_id: String,
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mode: ProcessingMode,
    /// Model id or alias that overrides routing.
    pub forced_model: Option<String>,
}

impl JobInput {
    pub fn new(document_id: impl Into<String>, filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            document_id: document_id.into(),
            bytes,
            filename: filename.into(),
            mode: ProcessingMode::default(),
            forced_model: None,
        }
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_forced_model(mut self, model: impl Into<String>) -> Self {
        self.forced_model = Some(model.into());
        self
    }
}

/// One processing run for one document, owned by the pipeline while it runs.
#[derive(Debug, Clone)]
pub struct DocumentJob {
    pub id: String,
    pub document_id: String,
    pub filename: String,
    pub format: Option<DocumentFormat>,
    pub is_searchable: Option<bool>,
    pub page_count: Option<u32>,
    pub classification_confidence: Option<f64>,
    pub mode: ProcessingMode,
    pub status: JobStatus,
    pub error: Option<String>,
    pub record_id: Option<String>,
    /// Model that produced the record.
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DocumentJob {
    pub fn new(input: &JobInput) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: input.document_id.clone(),
            filename: input.filename.clone(),
            format: None,
            is_searchable: None,
            page_count: None,
            classification_confidence: None,
            mode: input.mode,
            status: JobStatus::Running,
            error: None,
            record_id: None,
            model: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn apply_classification(&mut self, classification: &Classification) {
        self.format = Some(classification.format);
        self.is_searchable = Some(classification.is_searchable);
        self.page_count = Some(classification.page_count);
        self.classification_confidence = Some(classification.confidence);
        self.updated_at = Utc::now();
    }

    pub fn succeed(&mut self, record_id: String) {
        let now = Utc::now();
        self.status = JobStatus::Succeeded;
        self.record_id = Some(record_id);
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, error: String) {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}

/// Outcome of `Pipeline::process_document`. A failed job is reported
/// here, never as an error.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub success: bool,
    pub job_id: String,
    pub record_id: Option<String>,
    pub duration: Duration,
    pub error: Option<String>,
    /// The audit trail, in execution order.
    pub stages: Vec<StageRecord>,
    pub issues: Vec<QualityIssue>,
}

impl ProcessingResult {
    pub fn success(
        job: &DocumentJob,
        record_id: String,
        duration: Duration,
        stages: Vec<StageRecord>,
        issues: Vec<QualityIssue>,
    ) -> Self {
        Self {
            success: true,
            job_id: job.id.clone(),
            record_id: Some(record_id),
            duration,
            error: None,
            stages,
            issues,
        }
    }

    pub fn failure(
        job_id: &str,
        error: String,
        duration: Duration,
        stages: Vec<StageRecord>,
        issues: Vec<QualityIssue>,
    ) -> Self {
        Self {
            success: false,
            job_id: job_id.to_string(),
            record_id: None,
            duration,
            error: Some(error),
            stages,
            issues,
        }
    }

    /// Stage names in the order they ran.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.stage.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_mapping() {
        assert_eq!(ProcessingMode::Auto.routing_mode(false), RoutingMode::Auto);
        assert_eq!(ProcessingMode::Fast.routing_mode(false), RoutingMode::Auto);
        assert_eq!(ProcessingMode::Deep.routing_mode(false), RoutingMode::Expert);
        assert_eq!(ProcessingMode::Fast.routing_mode(true), RoutingMode::Testing);
        assert_eq!(ProcessingMode::Deep.routing_mode(true), RoutingMode::Expert);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("DEEP".parse::<ProcessingMode>().unwrap(), ProcessingMode::Deep);
        assert!("thorough".parse::<ProcessingMode>().is_err());
    }

    #[test]
    fn test_job_lifecycle() {
        let input = JobInput::new("doc-1", "lease.pdf", vec![]).with_mode(ProcessingMode::Fast);
        let mut job = DocumentJob::new(&input);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.mode, ProcessingMode::Fast);

        job.apply_classification(&Classification {
            format: DocumentFormat::Pdf,
            is_searchable: true,
            page_count: 3,
            confidence: 0.99,
            text_layer: Vec::new(),
        });
        assert_eq!(job.page_count, Some(3));

        job.succeed("rec-1".to_string());
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.status.is_terminal());
        assert!(job.completed_at.is_some());
        assert_eq!(job.record_id.as_deref(), Some("rec-1"));
    }

    #[test]
    fn test_job_ids_unique() {
        let input = JobInput::new("doc-1", "a.xml", vec![]);
        assert_ne!(DocumentJob::new(&input).id, DocumentJob::new(&input).id);
    }
}
