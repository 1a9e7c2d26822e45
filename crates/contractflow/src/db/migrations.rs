//! Schema migrations.
//!
//! Applied versions are recorded in `_migrations`. Each pending migration
//! runs in its own transaction together with its bookkeeping row, so a
//! failure leaves the schema at the previous version.

use rusqlite::{params, Connection};

use super::error::DatabaseError;
use super::now_rfc3339;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_document_jobs_table",
        sql: include_str!("sql/001_create_document_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_stage_logs_table",
        sql: include_str!("sql/002_create_stage_logs.sql"),
    },
    Migration {
        version: 3,
        description: "create_quality_issues_table",
        sql: include_str!("sql/003_create_quality_issues.sql"),
    },
    Migration {
        version: 4,
        description: "create_intermediate_records_table",
        sql: include_str!("sql/004_create_intermediate_records.sql"),
    },
    Migration {
        version: 5,
        description: "create_routing_outcomes_table",
        sql: include_str!("sql/005_create_routing_outcomes.sql"),
    },
];

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

/// Applies every pending migration and returns how many ran.
pub fn run_all(conn: &Connection) -> Result<usize, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let failed = |source| DatabaseError::Migration {
            version: migration.version,
            description: migration.description,
            source,
        };

        let tx = conn.unchecked_transaction().map_err(failed)?;
        log::info!("Applying migration v{}: {}", migration.version, migration.description);
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.description, now_rfc3339()],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;
        applied += 1;
    }

    Ok(applied)
}
