use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, PageKey, ResultFilter, ResultStore};
use crate::db::{Database, DatabaseError};
use crate::models::{FieldMap, OcrResult, RetentionPolicy, ReviewState};

const ENTITY: &str = "ocr_result";

const SELECT_COLUMNS: &str = "SELECT id, attempt_id, raw_text, parsed_fields, suggested_collection,
        uploaded_by, state, created_at
 FROM ocr_results";

/// SQLite-backed result store.
pub struct SqliteResultStore {
    db: Arc<Database>,
}

impl SqliteResultStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl ResultStore for SqliteResultStore {
    fn create(&self, result: &OcrResult) -> Result<Uuid, DatabaseError> {
        let fields_json = serde_json::to_string(&result.parsed_fields)?;
        let conn = self.db.lock()?;

        conn.execute(
            "INSERT INTO ocr_results
             (id, attempt_id, raw_text, parsed_fields, suggested_collection,
              uploaded_by, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                result.id.to_string(),
                result.attempt_id.to_string(),
                result.raw_text,
                fields_json,
                result.suggested_collection,
                result.uploaded_by,
                result.state.as_str(),
                format_timestamp(&result.created_at),
            ],
        )
        .map_err(|e| {
            if is_attempt_conflict(&e) {
                DatabaseError::Duplicate {
                    entity_type: ENTITY.to_string(),
                    key: result.attempt_id.to_string(),
                }
            } else {
                DatabaseError::Sqlite(e)
            }
        })?;

        tracing::debug!(result_id = %result.id, attempt_id = %result.attempt_id, "OCR result stored");
        Ok(result.id)
    }

    fn get(&self, id: &Uuid) -> Result<OcrResult, DatabaseError> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                ResultRow::from_row,
            )
            .optional()?
            .ok_or_else(|| not_found(id))?;
        result_from_row(row)
    }

    fn list_page(
        &self,
        filter: &ResultFilter,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<OcrResult>, DatabaseError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(state) = filter.state {
            clauses.push("state = ?");
            values.push(state.as_str().to_string());
        }
        if let Some(ref uploader) = filter.uploaded_by {
            clauses.push("uploaded_by = ?");
            values.push(uploader.clone());
        }
        if let Some(ref tag) = filter.suggested_collection {
            clauses.push("suggested_collection = ?");
            values.push(tag.clone());
        }
        if let Some(key) = after {
            clauses.push("(created_at > ? OR (created_at = ? AND id > ?))");
            values.push(key.created_at.clone());
            values.push(key.created_at.clone());
            values.push(key.id.clone());
        }

        let mut sql = SELECT_COLUMNS.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY created_at ASC, id ASC LIMIT {limit}"));

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), ResultRow::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(result_from_row(row?)?);
        }
        Ok(results)
    }

    fn delete(&self, id: &Uuid) -> Result<(), DatabaseError> {
        let conn = self.db.lock()?;
        let changed = conn.execute("DELETE FROM ocr_results WHERE id = ?1", params![id.to_string()])?;
        if changed == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    fn mark_approved(&self, id: &Uuid) -> Result<(), DatabaseError> {
        let conn = self.db.lock()?;
        close_pending(&conn, id, RetentionPolicy::KeepApproved)
    }

    fn delete_pending(&self, id: &Uuid) -> Result<(), DatabaseError> {
        let conn = self.db.lock()?;
        close_pending(&conn, id, RetentionPolicy::Remove)
    }
}

/// Move a result out of `pending`: mark it approved or delete it.
///
/// Conditional on the record still being pending; runs on whatever
/// connection or transaction the caller holds.
pub(super) fn close_pending(conn: &Connection, id: &Uuid, retention: RetentionPolicy) -> Result<(), DatabaseError> {
    let changed = match retention {
        RetentionPolicy::KeepApproved => conn.execute(
            "UPDATE ocr_results SET state = 'approved', reviewed_at = ?1
             WHERE id = ?2 AND state = 'pending'",
            params![format_timestamp(&chrono::Utc::now()), id.to_string()],
        )?,
        RetentionPolicy::Remove => conn.execute(
            "DELETE FROM ocr_results WHERE id = ?1 AND state = 'pending'",
            params![id.to_string()],
        )?,
    };
    if changed == 0 {
        return Err(conflict_or_missing(conn, id));
    }
    Ok(())
}

/// Only the `attempt_id` unique index signals a repeated attempt; other
/// constraint failures (primary key, state check) stay SQLite errors.
fn is_attempt_conflict(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && msg.contains("ocr_results.attempt_id")
        }
        _ => false,
    }
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: ENTITY.to_string(),
        id: id.to_string(),
    }
}

/// Explain why a conditional update touched no rows.
fn conflict_or_missing(conn: &Connection, id: &Uuid) -> DatabaseError {
    let state: Result<Option<String>, rusqlite::Error> = conn
        .query_row(
            "SELECT state FROM ocr_results WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional();

    match state {
        Ok(Some(state)) => DatabaseError::StateConflict {
            entity_type: ENTITY.to_string(),
            id: id.to_string(),
            state,
        },
        Ok(None) => not_found(id),
        Err(e) => DatabaseError::Sqlite(e),
    }
}

// ═══════════════════════════════════════════
// Internal row mapping
// ═══════════════════════════════════════════

struct ResultRow {
    id: String,
    attempt_id: String,
    raw_text: String,
    parsed_fields: String,
    suggested_collection: String,
    uploaded_by: String,
    state: String,
    created_at: String,
}

impl ResultRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            attempt_id: row.get(1)?,
            raw_text: row.get(2)?,
            parsed_fields: row.get(3)?,
            suggested_collection: row.get(4)?,
            uploaded_by: row.get(5)?,
            state: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(value).map_err(|_| DatabaseError::InvalidEnum {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn result_from_row(row: ResultRow) -> Result<OcrResult, DatabaseError> {
    let parsed_fields: FieldMap = serde_json::from_str(&row.parsed_fields)?;

    Ok(OcrResult {
        id: parse_uuid("id", &row.id)?,
        attempt_id: parse_uuid("attempt_id", &row.attempt_id)?,
        raw_text: row.raw_text,
        parsed_fields,
        suggested_collection: row.suggested_collection,
        uploaded_by: row.uploaded_by,
        state: ReviewState::from_str(&row.state)?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::repository::ResultCursor;

    fn setup_store() -> SqliteResultStore {
        SqliteResultStore::new(Arc::new(Database::open_in_memory().expect("in-memory DB")))
    }

    fn make_result(tag: &str, uploader: &str) -> OcrResult {
        let fields = json!({"document_type": tag, "amount": 120});
        OcrResult::pending(
            Uuid::new_v4(),
            "Invoice #42".into(),
            fields.as_object().unwrap().clone(),
            tag.into(),
            uploader.into(),
        )
    }

    #[test]
    fn create_and_get_round_trip() {
        let store = setup_store();
        let result = make_result("invoice", "user-1");
        let id = store.create(&result).unwrap();

        let loaded = store.get(&id).unwrap();
        assert_eq!(loaded.raw_text, "Invoice #42");
        assert_eq!(loaded.parsed_fields["amount"], 120);
        assert_eq!(loaded.suggested_collection, "invoice");
        assert_eq!(loaded.state, ReviewState::Pending);
        assert_eq!(loaded.attempt_id, result.attempt_id);
    }

    #[test]
    fn second_record_for_same_attempt_is_duplicate() {
        let store = setup_store();
        let first = make_result("invoice", "user-1");
        store.create(&first).unwrap();

        let mut second = make_result("invoice", "user-1");
        second.attempt_id = first.attempt_id;
        let err = store.create(&second).unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { .. }));

        let all: Vec<_> = ResultCursor::new(&store, ResultFilter::default())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn reused_id_is_not_reported_as_duplicate_attempt() {
        let store = setup_store();
        let first = make_result("invoice", "user-1");
        store.create(&first).unwrap();

        let mut clash = make_result("invoice", "user-1");
        clash.id = first.id;
        let err = store.create(&clash).unwrap_err();
        assert!(matches!(err, DatabaseError::Sqlite(_)), "got {err:?}");
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = setup_store();
        let err = store.get(&Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn delete_removes_record() {
        let store = setup_store();
        let id = store.create(&make_result("invoice", "user-1")).unwrap();
        store.delete(&id).unwrap();
        assert!(matches!(store.get(&id), Err(DatabaseError::NotFound { .. })));
        assert!(matches!(store.delete(&id), Err(DatabaseError::NotFound { .. })));
    }

    #[test]
    fn mark_approved_is_one_way() {
        let store = setup_store();
        let id = store.create(&make_result("invoice", "user-1")).unwrap();

        store.mark_approved(&id).unwrap();
        assert_eq!(store.get(&id).unwrap().state, ReviewState::Approved);

        let err = store.mark_approved(&id).unwrap_err();
        assert!(matches!(err, DatabaseError::StateConflict { ref state, .. } if state == "approved"));
        let err = store.delete_pending(&id).unwrap_err();
        assert!(matches!(err, DatabaseError::StateConflict { .. }));
        assert_eq!(store.get(&id).unwrap().state, ReviewState::Approved);
    }

    #[test]
    fn mark_approved_missing_is_not_found() {
        let store = setup_store();
        let err = store.mark_approved(&Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn cursor_pages_through_all_records_in_order() {
        let store = setup_store();
        let mut ids = Vec::new();
        for i in 0..7 {
            let mut r = make_result("invoice", "user-1");
            r.created_at = chrono::Utc::now() + chrono::Duration::milliseconds(i);
            ids.push(store.create(&r).unwrap());
        }

        let listed: Vec<Uuid> = ResultCursor::with_page_size(&store, ResultFilter::default(), 3)
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn cursor_is_restartable() {
        let store = setup_store();
        for _ in 0..4 {
            store.create(&make_result("invoice", "user-1")).unwrap();
        }
        let first = ResultCursor::with_page_size(&store, ResultFilter::default(), 2).count();
        let second = ResultCursor::with_page_size(&store, ResultFilter::default(), 2).count();
        assert_eq!(first, 4);
        assert_eq!(second, 4);
    }

    #[test]
    fn filter_by_state_uploader_and_tag() {
        let store = setup_store();
        let approved = store.create(&make_result("invoice", "alice")).unwrap();
        store.mark_approved(&approved).unwrap();
        store.create(&make_result("invoice", "bob")).unwrap();
        store.create(&make_result("contract", "alice")).unwrap();

        let pending = ResultCursor::new(&store, ResultFilter::pending()).count();
        assert_eq!(pending, 2);

        let alice = ResultFilter {
            uploaded_by: Some("alice".into()),
            ..ResultFilter::default()
        };
        assert_eq!(ResultCursor::new(&store, alice).count(), 2);

        let alice_contracts = ResultFilter {
            uploaded_by: Some("alice".into()),
            suggested_collection: Some("contract".into()),
            state: Some(ReviewState::Pending),
        };
        assert_eq!(ResultCursor::new(&store, alice_contracts).count(), 1);
    }

    #[test]
    fn concurrent_creates_do_not_interleave() {
        let store = Arc::new(setup_store());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut r = make_result("invoice", &format!("user-{i}"));
                    r.raw_text = format!("document {i}");
                    store.create(&r).unwrap()
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let id = handle.join().unwrap();
            let loaded = store.get(&id).unwrap();
            assert_eq!(loaded.raw_text, format!("document {i}"));
            assert_eq!(loaded.uploaded_by, format!("user-{i}"));
        }
    }
}
