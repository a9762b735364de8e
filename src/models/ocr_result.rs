use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ReviewState, Role};

/// Structured fields emitted by the engine. Keys are unique, order is irrelevant.
pub type FieldMap = serde_json::Map<String, serde_json::Value>;

/// An already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// One end-to-end submission. Lives only as long as the processor call.
#[derive(Debug, Clone)]
pub struct UploadAttempt {
    pub attempt_id: Uuid,
    pub source_path: PathBuf,
    pub content_type: String,
    pub actor: Actor,
}

/// Persisted extraction result awaiting (or past) review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub raw_text: String,
    pub parsed_fields: FieldMap,
    /// Free-text tag chosen by the engine; resolved against the collection
    /// catalogue only at review time.
    pub suggested_collection: String,
    pub uploaded_by: String,
    pub state: ReviewState,
    pub created_at: DateTime<Utc>,
}

impl OcrResult {
    /// Build a fresh `pending` record for an attempt.
    pub fn pending(
        attempt_id: Uuid,
        raw_text: String,
        parsed_fields: FieldMap,
        suggested_collection: String,
        uploaded_by: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt_id,
            raw_text,
            parsed_fields,
            suggested_collection,
            uploaded_by,
            state: ReviewState::Pending,
            created_at: Utc::now(),
        }
    }
}
