use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::TargetCollection;
use super::ocr_result::{FieldMap, OcrResult};

/// A domain record promoted from an approved OCR result.
///
/// `data` is a pass-through of the result's parsed fields; the target
/// collection owns its own schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRecord {
    pub id: Uuid,
    pub collection: TargetCollection,
    pub data: FieldMap,
    pub source_result_id: Uuid,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl TargetRecord {
    pub fn from_result(result: &OcrResult, collection: TargetCollection, created_by: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection,
            data: result.parsed_fields.clone(),
            source_result_id: result.id,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        }
    }
}
