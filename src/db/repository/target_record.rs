use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::ocr_result::close_pending;
use super::{format_timestamp, parse_timestamp, PromotionError, TargetSink};
use crate::db::{Database, DatabaseError};
use crate::models::{FieldMap, RetentionPolicy, TargetCollection, TargetRecord};

const ENTITY: &str = "target_record";

/// Target collections stored alongside the review queue.
pub struct SqliteTargetSink {
    db: Arc<Database>,
}

impl SqliteTargetSink {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, id: &Uuid) -> Result<TargetRecord, DatabaseError> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                "SELECT id, collection, data, source_result_id, created_by, created_at
                 FROM target_records WHERE id = ?1",
                params![id.to_string()],
                TargetRow::from_row,
            )
            .optional()?
            .ok_or_else(|| DatabaseError::NotFound {
                entity_type: ENTITY.to_string(),
                id: id.to_string(),
            })?;
        record_from_row(row)
    }

    pub fn list_by_collection(&self, collection: TargetCollection) -> Result<Vec<TargetRecord>, DatabaseError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, collection, data, source_result_id, created_by, created_at
             FROM target_records WHERE collection = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![collection.as_str()], TargetRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(record_from_row(row?)?);
        }
        Ok(records)
    }
}

impl TargetSink for SqliteTargetSink {
    fn promote(&self, record: &TargetRecord, retention: RetentionPolicy) -> Result<(), PromotionError> {
        let conn = self.db.lock().map_err(PromotionError::Transition)?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| PromotionError::Transition(DatabaseError::Sqlite(e)))?;

        insert_record(&tx, record).map_err(PromotionError::Insert)?;
        close_pending(&tx, &record.source_result_id, retention).map_err(PromotionError::Transition)?;

        tx.commit()
            .map_err(|e| PromotionError::Transition(DatabaseError::Sqlite(e)))?;

        tracing::debug!(
            target_id = %record.id,
            result_id = %record.source_result_id,
            collection = record.collection.as_str(),
            "Target record promoted"
        );
        Ok(())
    }
}

fn insert_record(conn: &Connection, record: &TargetRecord) -> Result<(), DatabaseError> {
    let data_json = serde_json::to_string(&record.data)?;
    conn.execute(
        "INSERT INTO target_records
         (id, collection, data, source_result_id, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id.to_string(),
            record.collection.as_str(),
            data_json,
            record.source_result_id.to_string(),
            record.created_by,
            format_timestamp(&record.created_at),
        ],
    )?;
    Ok(())
}

struct TargetRow {
    id: String,
    collection: String,
    data: String,
    source_result_id: String,
    created_by: String,
    created_at: String,
}

impl TargetRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            collection: row.get(1)?,
            data: row.get(2)?,
            source_result_id: row.get(3)?,
            created_by: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

fn record_from_row(row: TargetRow) -> Result<TargetRecord, DatabaseError> {
    let data: FieldMap = serde_json::from_str(&row.data)?;
    let parse = |field: &str, value: &str| {
        Uuid::parse_str(value).map_err(|_| DatabaseError::InvalidEnum {
            field: field.to_string(),
            value: value.to_string(),
        })
    };

    Ok(TargetRecord {
        id: parse("id", &row.id)?,
        collection: TargetCollection::from_str(&row.collection)?,
        data,
        source_result_id: parse("source_result_id", &row.source_result_id)?,
        created_by: row.created_by,
        created_at: parse_timestamp(&row.created_at)?,
    })
}
