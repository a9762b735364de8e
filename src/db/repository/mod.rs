//! Repository layer: persistence contracts for OCR results and the target
//! collections they are promoted into.

mod ocr_result;
mod target_record;

use std::collections::VecDeque;

use thiserror::Error;
use uuid::Uuid;

use super::DatabaseError;
use crate::models::{OcrResult, RetentionPolicy, ReviewState, TargetRecord};

pub use ocr_result::*;
pub use target_record::*;

/// Rows fetched per round-trip by [`ResultCursor`].
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Storage for OCR results. Operations are independent per record.
pub trait ResultStore: Send + Sync {
    /// Persist a new record. Fails with `Duplicate` if the attempt already
    /// produced a record.
    fn create(&self, result: &OcrResult) -> Result<Uuid, DatabaseError>;

    fn get(&self, id: &Uuid) -> Result<OcrResult, DatabaseError>;

    /// One page of records strictly after `after`, ordered by `(created_at, id)`.
    fn list_page(
        &self,
        filter: &ResultFilter,
        after: Option<&PageKey>,
        limit: usize,
    ) -> Result<Vec<OcrResult>, DatabaseError>;

    fn delete(&self, id: &Uuid) -> Result<(), DatabaseError>;

    /// `pending` → `approved`. Fails with `StateConflict` if the record is
    /// no longer pending.
    fn mark_approved(&self, id: &Uuid) -> Result<(), DatabaseError>;

    /// Delete the record only while it is still pending.
    fn delete_pending(&self, id: &Uuid) -> Result<(), DatabaseError>;
}

/// Insertion contract for the domain collections results are promoted into.
pub trait TargetSink: Send + Sync {
    /// Insert `record` and move its source result out of `pending` as one
    /// unit: either both happen or neither does.
    fn promote(&self, record: &TargetRecord, retention: RetentionPolicy) -> Result<(), PromotionError>;
}

/// Which half of a promotion failed. Nothing was written in either case.
#[derive(Error, Debug)]
pub enum PromotionError {
    #[error("Target insert failed: {0}")]
    Insert(#[source] DatabaseError),

    #[error(transparent)]
    Transition(DatabaseError),
}

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFilter {
    pub state: Option<ReviewState>,
    pub uploaded_by: Option<String>,
    pub suggested_collection: Option<String>,
}

impl ResultFilter {
    pub fn pending() -> Self {
        Self {
            state: Some(ReviewState::Pending),
            ..Self::default()
        }
    }
}

/// Keyset position of the last row handed out by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageKey {
    pub created_at: String,
    pub id: String,
}

impl PageKey {
    pub fn of(result: &OcrResult) -> Self {
        Self {
            created_at: format_timestamp(&result.created_at),
            id: result.id.to_string(),
        }
    }
}

/// Lazy, finite listing over a [`ResultStore`].
///
/// Pages are fetched on demand; calling `list` again starts over from the
/// first record. After an error the cursor yields nothing more.
pub struct ResultCursor<'a> {
    store: &'a dyn ResultStore,
    filter: ResultFilter,
    page_size: usize,
    last: Option<PageKey>,
    buffer: VecDeque<OcrResult>,
    exhausted: bool,
}

impl<'a> ResultCursor<'a> {
    pub fn new(store: &'a dyn ResultStore, filter: ResultFilter) -> Self {
        Self::with_page_size(store, filter, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(store: &'a dyn ResultStore, filter: ResultFilter, page_size: usize) -> Self {
        Self {
            store,
            filter,
            page_size: page_size.max(1),
            last: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

impl Iterator for ResultCursor<'_> {
    type Item = Result<OcrResult, DatabaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self
                .store
                .list_page(&self.filter, self.last.as_ref(), self.page_size)
            {
                Ok(page) => {
                    if page.len() < self.page_size {
                        self.exhausted = true;
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let next = self.buffer.pop_front()?;
        self.last = Some(PageKey::of(&next));
        Some(Ok(next))
    }
}

/// Fixed-width UTC timestamp; lexical order equals chronological order.
pub(crate) fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub(crate) fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>, DatabaseError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| DatabaseError::Timestamp(format!("{s}: {e}")))
}
