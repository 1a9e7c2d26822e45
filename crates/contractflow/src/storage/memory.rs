//! In-process audit log and record store, for dry runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::extraction::IntermediateRecord;
use crate::pipeline::StageRecord;
use crate::validation::QualityIssue;
use crate::worker::DocumentJob;

use super::{AuditLog, RecordStore, StorageError};

#[derive(Default)]
struct State {
    jobs: HashMap<String, DocumentJob>,
    stages: Vec<StageRecord>,
    issues: Vec<QualityIssue>,
    records: HashMap<String, (String, IntermediateRecord)>,
}

/// Keeps everything in memory. Audit writes or record saves can be made to
/// fail on demand.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_audit: AtomicBool,
    fail_stages: AtomicBool,
    fail_records: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every audit write fails with [`StorageError::Unavailable`].
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Only `append_stage` fails; job rows and issues are still written.
    pub fn fail_stage_writes(&self, fail: bool) {
        self.fail_stages.store(fail, Ordering::SeqCst);
    }

    /// Every `save_record` fails with [`StorageError::Unavailable`].
    pub fn fail_record_saves(&self, fail: bool) {
        self.fail_records.store(fail, Ordering::SeqCst);
    }

    pub fn job(&self, job_id: &str) -> Option<DocumentJob> {
        self.lock().ok()?.jobs.get(job_id).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.lock().map(|s| s.jobs.len()).unwrap_or(0)
    }

    /// Stage records of a job in append order.
    pub fn stages(&self, job_id: &str) -> Vec<StageRecord> {
        self.lock()
            .map(|s| {
                s.stages
                    .iter()
                    .filter(|r| r.job_id == job_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn issues(&self, job_id: &str) -> Vec<QualityIssue> {
        self.lock()
            .map(|s| {
                s.issues
                    .iter()
                    .filter(|i| i.job_id == job_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn record(&self, record_id: &str) -> Option<IntermediateRecord> {
        self.lock()
            .ok()?
            .records
            .get(record_id)
            .map(|(_, record)| record.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn check_audit(&self) -> Result<(), StorageError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("audit log offline".to_string()));
        }
        Ok(())
    }
}

impl AuditLog for MemoryStore {
    fn create_job(&self, job: &DocumentJob) -> Result<(), StorageError> {
        self.check_audit()?;
        self.lock()?.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn update_job(&self, job: &DocumentJob) -> Result<(), StorageError> {
        self.check_audit()?;
        self.lock()?.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn append_stage(&self, record: &StageRecord) -> Result<(), StorageError> {
        self.check_audit()?;
        if self.fail_stages.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("stage log offline".to_string()));
        }
        self.lock()?.stages.push(record.clone());
        Ok(())
    }

    fn create_issue(&self, issue: &QualityIssue) -> Result<i64, StorageError> {
        self.check_audit()?;
        let mut state = self.lock()?;
        let id = state.issues.len() as i64 + 1;
        let mut issue = issue.clone();
        issue.id = Some(id);
        state.issues.push(issue);
        Ok(id)
    }
}

impl RecordStore for MemoryStore {
    fn save_record(
        &self,
        job_id: &str,
        record: &IntermediateRecord,
    ) -> Result<String, StorageError> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("record store offline".to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.lock()?
            .records
            .insert(id.clone(), (job_id.to_string(), record.clone()));
        Ok(id)
    }
}
