pub mod staging;
pub mod supervisor;
pub mod contract;
pub mod validator;
pub mod processor; // submit → supervise → validate → persist

#[cfg(test)]
pub(crate) mod test_support;

pub use staging::*;
pub use supervisor::*;
pub use contract::*;
pub use validator::*;
pub use processor::*;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::Role;

/// Every failure the intake pipeline and review workflow can report.
///
/// None of these are fatal to the process: a failed attempt only affects
/// its own caller.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Staging storage failed at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction engine not found: {program}")]
    ExecutableNotFound { program: String },

    #[error("Could not start extraction engine {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction failed (exit code {exit_code}): {stderr}")]
    ExtractionFailed { exit_code: i32, stderr: String },

    #[error("Extraction exceeded its {deadline:?} deadline")]
    ExtractionTimeout { deadline: Duration },

    #[error("Extraction output missing: {artifact} at {}", .path.display())]
    MissingOutput { artifact: &'static str, path: PathBuf },

    #[error("Extraction output malformed: {artifact}: {reason}")]
    MalformedOutput { artifact: &'static str, reason: String },

    #[error("Attempt {0} already produced a result")]
    DuplicateAttempt(String),

    #[error("OCR result not found: {0}")]
    NotFound(String),

    #[error("OCR result {id} is {state}, expected pending")]
    InvalidState { id: String, state: String },

    #[error("Role '{role}' is not allowed to {action}")]
    Unauthorized { role: Role, action: String },

    #[error("Unsupported collection: '{0}'")]
    UnsupportedCollection(String),

    #[error("Target insertion failed: {0}")]
    TargetInsert(#[source] DatabaseError),

    #[error("Database error: {0}")]
    Database(#[source] DatabaseError),
}

impl PipelineError {
    /// Stable machine-readable tag for callers and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::ExecutableNotFound { .. } => "EXECUTABLE_NOT_FOUND",
            Self::Spawn { .. } => "SPAWN_ERROR",
            Self::ExtractionFailed { .. } => "EXTRACTION_FAILED",
            Self::ExtractionTimeout { .. } => "EXTRACTION_TIMEOUT",
            Self::MissingOutput { .. } => "MISSING_OUTPUT",
            Self::MalformedOutput { .. } => "MALFORMED_OUTPUT",
            Self::DuplicateAttempt(_) => "DUPLICATE_ATTEMPT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::UnsupportedCollection(_) => "UNSUPPORTED_COLLECTION",
            Self::TargetInsert(_) => "TARGET_INSERT_FAILED",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Only a deadline overrun is worth another attempt; everything else
    /// would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExtractionTimeout { .. })
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unauthorized(role: Role, action: impl Into<String>) -> Self {
        Self::Unauthorized {
            role,
            action: action.into(),
        }
    }
}

impl From<DatabaseError> for PipelineError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { id, .. } => Self::NotFound(id),
            DatabaseError::Duplicate { key, .. } => Self::DuplicateAttempt(key),
            DatabaseError::StateConflict { id, state, .. } => Self::InvalidState { id, state },
            other => Self::Database(other),
        }
    }
}
