//! Intermediate record repository.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct RecordRow {
    pub id: String,
    pub job_id: String,
    pub record_json: String,
    pub created_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            record_json: row.get("record_json")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert(db: &Database, record: &RecordRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO intermediate_records (id, job_id, record_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.job_id,
                record.record_json,
                record.created_at
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<RecordRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM intermediate_records WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], RecordRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}
