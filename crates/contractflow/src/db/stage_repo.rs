//! Stage log repository. Rows are append-only.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// One `stage_logs` row. `output_data` holds the stage summary as JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct StageLogRow {
    pub id: Option<i64>,
    pub job_id: String,
    pub stage: String,
    pub status: String,
    pub output_data: String,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
    pub created_at: String,
}

impl StageLogRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            stage: row.get("stage")?,
            status: row.get("status")?,
            output_data: row.get("output_data")?,
            error_message: row.get("error_message")?,
            duration_ms: row.get("duration_ms")?,
            tokens_used: row.get("tokens_used")?,
            cost_usd: row.get("cost_usd")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Appends a stage log row and returns its rowid.
pub fn insert(db: &Database, log: &StageLogRow) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO stage_logs (job_id, stage, status, output_data, error_message,
             duration_ms, tokens_used, cost_usd, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                log.job_id,
                log.stage,
                log.status,
                log.output_data,
                log.error_message,
                log.duration_ms,
                log.tokens_used,
                log.cost_usd,
                log.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// All stage logs of a job in insertion (execution) order.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<StageLogRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM stage_logs WHERE job_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![job_id], StageLogRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
