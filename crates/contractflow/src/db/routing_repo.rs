//! Routing outcome repository, the history behind RAG-assisted routing.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingOutcomeRow {
    pub job_id: String,
    pub model: String,
    pub complexity: f64,
    pub is_scanned: bool,
    pub success: bool,
    pub created_at: String,
}

impl RoutingOutcomeRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            model: row.get("model")?,
            complexity: row.get("complexity")?,
            is_scanned: row.get("is_scanned")?,
            success: row.get("success")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert(db: &Database, outcome: &RoutingOutcomeRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO routing_outcomes (job_id, model, complexity, is_scanned, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                outcome.job_id,
                outcome.model,
                outcome.complexity,
                outcome.is_scanned,
                outcome.success,
                outcome.created_at,
            ],
        )?;
        Ok(())
    })
}

/// The `limit` outcomes whose complexity is closest to `complexity`.
/// Ties go to the most recent outcome.
pub fn nearest_by_complexity(
    db: &Database,
    complexity: f64,
    limit: usize,
) -> Result<Vec<RoutingOutcomeRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM routing_outcomes
             ORDER BY ABS(complexity - ?1) ASC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![complexity, limit as i64], RoutingOutcomeRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
