//! Review workflow: approve promotes a pending result into its target
//! collection, reject discards it.
//!
//! Checks run in a fixed order and never mutate state on failure:
//! existence → pending → collection → role. Approval inserts the target
//! record and moves the result out of `pending` in one transaction, so a
//! result is never both pending and promoted, and a lost race writes nothing.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::authorization::{can_reject, can_write, resolve_collection};
use crate::db::repository::{PromotionError, ResultStore, TargetSink};
use crate::models::{Actor, OcrResult, RetentionPolicy, TargetRecord};
use crate::pipeline::PipelineError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Outcome of a successful approval.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    pub result_id: Uuid,
    pub target: TargetRecord,
    pub retention: RetentionPolicy,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ReviewWorkflow {
    store: Arc<dyn ResultStore>,
    sink: Arc<dyn TargetSink>,
    retention: RetentionPolicy,
}

impl ReviewWorkflow {
    pub fn new(store: Arc<dyn ResultStore>, sink: Arc<dyn TargetSink>) -> Self {
        Self {
            store,
            sink,
            retention: RetentionPolicy::default(),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Promote a pending result into the collection its tag names.
    pub fn approve(&self, id: &Uuid, actor: &Actor) -> Result<ApprovalOutcome, PipelineError> {
        let result = self.load_pending(id)?;

        let collection = resolve_collection(&result.suggested_collection)
            .ok_or_else(|| PipelineError::UnsupportedCollection(result.suggested_collection.clone()))?;

        if !can_write(actor.role, collection) {
            tracing::warn!(result_id = %id, role = actor.role.as_str(), collection = collection.as_str(), "Approval refused");
            return Err(PipelineError::unauthorized(
                actor.role,
                format!("approve '{collection}' results"),
            ));
        }

        let target = TargetRecord::from_result(&result, collection, &actor.id);
        self.sink
            .promote(&target, self.retention)
            .map_err(|e| match e {
                PromotionError::Insert(e) => {
                    tracing::error!(result_id = %id, collection = collection.as_str(), "Target insertion failed: {e}");
                    PipelineError::TargetInsert(e)
                }
                PromotionError::Transition(e) => {
                    tracing::warn!(result_id = %id, "Review transition failed, nothing promoted: {e}");
                    e.into()
                }
            })?;

        tracing::info!(
            result_id = %id,
            target_id = %target.id,
            collection = collection.as_str(),
            approved_by = %actor.id,
            retention = self.retention.as_str(),
            "OCR result approved"
        );

        Ok(ApprovalOutcome {
            result_id: *id,
            target,
            retention: self.retention,
        })
    }

    /// Discard a pending result.
    pub fn reject(&self, id: &Uuid, actor: &Actor) -> Result<(), PipelineError> {
        let result = self.load_pending(id)?;

        if !can_reject(actor.role, &result.suggested_collection) {
            tracing::warn!(result_id = %id, role = actor.role.as_str(), tag = %result.suggested_collection, "Rejection refused");
            return Err(PipelineError::unauthorized(
                actor.role,
                format!("reject '{}' results", result.suggested_collection),
            ));
        }

        self.store.delete_pending(id)?;
        tracing::info!(result_id = %id, rejected_by = %actor.id, "OCR result rejected");
        Ok(())
    }

    fn load_pending(&self, id: &Uuid) -> Result<OcrResult, PipelineError> {
        let result = self.store.get(id)?;
        if result.state.is_terminal() {
            return Err(PipelineError::InvalidState {
                id: id.to_string(),
                state: result.state.to_string(),
            });
        }
        Ok(result)
    }
}
