//! Quality issue repository.

use rusqlite::{params, Row};

use super::{now_rfc3339, Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct IssueRow {
    pub id: Option<i64>,
    pub job_id: String,
    pub issue_type: String,
    pub severity: String,
    pub description: String,
    pub requires_manual_review: bool,
    pub status: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl IssueRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            issue_type: row.get("issue_type")?,
            severity: row.get("severity")?,
            description: row.get("description")?,
            requires_manual_review: row.get("requires_manual_review")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            resolved_at: row.get("resolved_at")?,
        })
    }
}

/// Inserts an issue and returns its rowid.
pub fn insert(db: &Database, issue: &IssueRow) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO quality_issues (job_id, issue_type, severity, description,
             requires_manual_review, status, created_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                issue.job_id,
                issue.issue_type,
                issue.severity,
                issue.description,
                issue.requires_manual_review,
                issue.status,
                issue.created_at,
                issue.resolved_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<IssueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM quality_issues WHERE job_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![job_id], IssueRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Open issues across all jobs, oldest first.
pub fn list_open(db: &Database) -> Result<Vec<IssueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM quality_issues WHERE status = 'open' ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], IssueRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Marks an open issue as resolved. Returns false if no open issue has that id.
pub fn resolve(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE quality_issues SET status = 'resolved', resolved_at = ?2
             WHERE id = ?1 AND status = 'open'",
            params![id, now_rfc3339()],
        )?;
        Ok(changed > 0)
    })
}
