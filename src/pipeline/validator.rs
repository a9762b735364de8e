//! Turns a finished engine run into an unpersisted `pending` result.
//!
//! Nothing is salvaged: a run that exited 0 but left only one artifact is
//! reported as missing output, not as a partial result.

use std::sync::Arc;

use super::contract::{
    parse_engine_summary, ArtifactLocations, ContractV1, OutputContract, DOCUMENT_TYPE_KEY,
};
use super::supervisor::ExtractionOutcome;
use super::PipelineError;
use crate::models::{OcrResult, UploadAttempt};

/// Tag used when the engine did not classify the document.
pub const DEFAULT_COLLECTION_TAG: &str = "general";

#[derive(Clone)]
pub struct ResultValidator {
    contract: Arc<dyn OutputContract>,
}

impl Default for ResultValidator {
    fn default() -> Self {
        Self::new(Arc::new(ContractV1))
    }
}

impl ResultValidator {
    pub fn new(contract: Arc<dyn OutputContract>) -> Self {
        Self { contract }
    }

    pub fn contract(&self) -> &dyn OutputContract {
        self.contract.as_ref()
    }

    pub fn validate(
        &self,
        outcome: &ExtractionOutcome,
        locations: &ArtifactLocations,
        attempt: &UploadAttempt,
    ) -> Result<OcrResult, PipelineError> {
        // A killed run also carries a non-zero exit code; timeout wins.
        if outcome.timed_out {
            return Err(PipelineError::ExtractionTimeout {
                deadline: outcome.deadline,
            });
        }
        if outcome.exit_code != 0 {
            return Err(PipelineError::ExtractionFailed {
                exit_code: outcome.exit_code,
                stderr: outcome.stderr.trim().to_string(),
            });
        }

        if let Some(summary) = parse_engine_summary(&outcome.stdout) {
            tracing::debug!(
                attempt_id = %attempt.attempt_id,
                summary_chars = summary.raw_text.len(),
                summary_tag = summary.suggested_collection.as_deref().unwrap_or(""),
                "Engine summary on stdout"
            );
        }

        let text = self.contract.read_text(&locations.text)?;
        let fields = self.contract.read_fields(&locations.fields)?;

        if let Some(note) = text.error.as_deref().filter(|n| !n.trim().is_empty()) {
            tracing::warn!(attempt_id = %attempt.attempt_id, "Engine reported a degraded extraction: {note}");
        }

        let suggested_collection = fields
            .get(DOCUMENT_TYPE_KEY)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .unwrap_or(DEFAULT_COLLECTION_TAG)
            .to_string();

        tracing::debug!(
            attempt_id = %attempt.attempt_id,
            contract = self.contract.version(),
            text_chars = text.text.chars().count(),
            field_count = fields.len(),
            suggested_collection = %suggested_collection,
            "Extraction output validated"
        );

        Ok(OcrResult::pending(
            attempt.attempt_id,
            text.text,
            fields,
            suggested_collection,
            attempt.actor.id.clone(),
        ))
    }
}
