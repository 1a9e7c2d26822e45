//! Historical routing outcomes (the retrieval side of RAG-assisted routing).

use thiserror::Error;

use crate::db::routing_repo::{self, RoutingOutcomeRow};
use crate::db::{now_rfc3339, Database, DatabaseError};

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Routing history unavailable: {0}")]
    Database(#[from] DatabaseError),
}

/// The model a finished document was first routed to and how it went.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingOutcome {
    pub model: String,
    pub complexity: f64,
    pub is_scanned: bool,
    /// The first model succeeded and validation found nothing.
    pub success: bool,
}

pub trait RoutingHistory: Send + Sync {
    /// Up to `limit` past outcomes with the closest complexity.
    fn similar(&self, complexity: f64, limit: usize) -> Result<Vec<RoutingOutcome>, HistoryError>;

    fn record(&self, job_id: &str, outcome: &RoutingOutcome) -> Result<(), HistoryError>;
}

pub struct SqliteRoutingHistory {
    db: Database,
}

impl SqliteRoutingHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl RoutingHistory for SqliteRoutingHistory {
    fn similar(&self, complexity: f64, limit: usize) -> Result<Vec<RoutingOutcome>, HistoryError> {
        let rows = routing_repo::nearest_by_complexity(&self.db, complexity, limit)?;
        Ok(rows
            .into_iter()
            .map(|row| RoutingOutcome {
                model: row.model,
                complexity: row.complexity,
                is_scanned: row.is_scanned,
                success: row.success,
            })
            .collect())
    }

    fn record(&self, job_id: &str, outcome: &RoutingOutcome) -> Result<(), HistoryError> {
        routing_repo::insert(
            &self.db,
            &RoutingOutcomeRow {
                job_id: job_id.to_string(),
                model: outcome.model.clone(),
                complexity: outcome.complexity,
                is_scanned: outcome.is_scanned,
                success: outcome.success,
                created_at: now_rfc3339(),
            },
        )?;
        Ok(())
    }
}
