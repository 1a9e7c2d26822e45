//! Persistence collaborators: the audit trail (job rows, stage logs,
//! quality issues) and the record store.
//!
//! Both traits are synchronous; SQLite writes are short and serialized
//! behind the database mutex.

pub mod memory;

use thiserror::Error;

use crate::db::issue_repo::{self, IssueRow};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::record_repo::{self, RecordRow};
use crate::db::stage_repo::{self, StageLogRow};
use crate::db::{now_rfc3339, Database, DatabaseError};
use crate::extraction::IntermediateRecord;
use crate::pipeline::StageRecord;
use crate::validation::QualityIssue;
use crate::worker::{DocumentJob, JobStatus};

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Sideways sink for everything the orchestrator reports about a job.
pub trait AuditLog: Send + Sync {
    fn create_job(&self, job: &DocumentJob) -> Result<(), StorageError>;

    fn update_job(&self, job: &DocumentJob) -> Result<(), StorageError>;

    fn append_stage(&self, record: &StageRecord) -> Result<(), StorageError>;

    /// Returns the id assigned to the issue.
    fn create_issue(&self, issue: &QualityIssue) -> Result<i64, StorageError>;
}

pub trait RecordStore: Send + Sync {
    /// Persists the record and returns its id.
    fn save_record(&self, job_id: &str, record: &IntermediateRecord)
        -> Result<String, StorageError>;
}

/// SQLite-backed audit log and record store.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn find_job(&self, job_id: &str) -> Result<Option<JobRow>, StorageError> {
        Ok(job_repo::find_by_id(&self.db, job_id)?)
    }

    /// Jobs matching `filter`, newest first, plus the unpaginated total.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), StorageError> {
        Ok(job_repo::query(&self.db, filter)?)
    }

    /// Number of jobs per status.
    pub fn status_counts(&self) -> Result<Vec<(JobStatus, u64)>, StorageError> {
        [JobStatus::Running, JobStatus::Succeeded, JobStatus::Failed]
            .into_iter()
            .map(|status| Ok((status, job_repo::count_by_status(&self.db, status.as_str())?)))
            .collect()
    }

    /// Stage log of a job in execution order.
    pub fn stage_log(&self, job_id: &str) -> Result<Vec<StageLogRow>, StorageError> {
        Ok(stage_repo::list_for_job(&self.db, job_id)?)
    }

    pub fn issues_for_job(&self, job_id: &str) -> Result<Vec<IssueRow>, StorageError> {
        Ok(issue_repo::list_for_job(&self.db, job_id)?)
    }

    pub fn open_issues(&self) -> Result<Vec<IssueRow>, StorageError> {
        Ok(issue_repo::list_open(&self.db)?)
    }

    /// Marks an open issue resolved. `false` when no open issue has that id.
    pub fn resolve_issue(&self, issue_id: i64) -> Result<bool, StorageError> {
        Ok(issue_repo::resolve(&self.db, issue_id)?)
    }

    pub fn load_record(&self, record_id: &str) -> Result<Option<IntermediateRecord>, StorageError> {
        let Some(row) = record_repo::find_by_id(&self.db, record_id)? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&row.record_json).map_err(|e| StorageError::Serialize {
            what: "intermediate record",
            source: e,
        })?;
        Ok(Some(record))
    }
}

fn job_row(job: &DocumentJob) -> JobRow {
    JobRow {
        id: job.id.clone(),
        document_id: job.document_id.clone(),
        filename: job.filename.clone(),
        format: job.format.map(|f| f.as_str().to_string()),
        is_searchable: job.is_searchable,
        page_count: job.page_count,
        classification_confidence: job.classification_confidence,
        mode: job.mode.as_str().to_string(),
        status: job.status.as_str().to_string(),
        error: job.error.clone(),
        record_id: job.record_id.clone(),
        model: job.model.clone(),
        created_at: job.created_at.to_rfc3339(),
        updated_at: job.updated_at.to_rfc3339(),
        completed_at: job.completed_at.map(|t| t.to_rfc3339()),
    }
}

impl AuditLog for SqliteStore {
    fn create_job(&self, job: &DocumentJob) -> Result<(), StorageError> {
        job_repo::insert(&self.db, &job_row(job))?;
        Ok(())
    }

    fn update_job(&self, job: &DocumentJob) -> Result<(), StorageError> {
        job_repo::update(&self.db, &job_row(job))?;
        Ok(())
    }

    fn append_stage(&self, record: &StageRecord) -> Result<(), StorageError> {
        let output_data =
            serde_json::to_string(&record.output).map_err(|e| StorageError::Serialize {
                what: "stage output",
                source: e,
            })?;
        stage_repo::insert(
            &self.db,
            &StageLogRow {
                id: None,
                job_id: record.job_id.clone(),
                stage: record.stage.as_str().to_string(),
                status: record.status.as_str().to_string(),
                output_data,
                error_message: record.error.clone(),
                duration_ms: record.duration.as_millis() as u64,
                tokens_used: record.tokens_used,
                cost_usd: record.cost_usd,
                created_at: record.created_at.to_rfc3339(),
            },
        )?;
        Ok(())
    }

    fn create_issue(&self, issue: &QualityIssue) -> Result<i64, StorageError> {
        let id = issue_repo::insert(
            &self.db,
            &IssueRow {
                id: None,
                job_id: issue.job_id.clone(),
                issue_type: issue.issue_type.clone(),
                severity: issue.severity.as_str().to_string(),
                description: issue.description.clone(),
                requires_manual_review: issue.requires_manual_review,
                status: issue.status.as_str().to_string(),
                created_at: now_rfc3339(),
                resolved_at: None,
            },
        )?;
        Ok(id)
    }
}

impl RecordStore for SqliteStore {
    fn save_record(
        &self,
        job_id: &str,
        record: &IntermediateRecord,
    ) -> Result<String, StorageError> {
        let record_json = serde_json::to_string(record).map_err(|e| StorageError::Serialize {
            what: "intermediate record",
            source: e,
        })?;
        let id = uuid::Uuid::new_v4().to_string();
        record_repo::insert(
            &self.db,
            &RecordRow {
                id: id.clone(),
                job_id: job_id.to_string(),
                record_json,
                created_at: now_rfc3339(),
            },
        )?;
        Ok(id)
    }
}
