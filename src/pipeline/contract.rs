//! Output contract between the pipeline and the extraction engine.
//!
//! The engine is contracted to write two artifacts at deterministic
//! locations: a plain-text extraction and a structured-fields mapping whose
//! keys include a document-type tag. The contract is versioned so another
//! engine (or a test double) can be dropped in without touching the
//! supervisor or the validator.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::PipelineError;
use crate::models::FieldMap;

pub const TEXT_ARTIFACT: &str = "processing_result.json";
pub const FIELDS_ARTIFACT: &str = "important_details.json";

/// Key in the fields artifact carrying the engine's collection tag.
pub const DOCUMENT_TYPE_KEY: &str = "document_type";

/// Where a given run's artifacts are expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocations {
    pub text: PathBuf,
    pub fields: PathBuf,
}

/// The plain-text artifact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextArtifact {
    pub text: String,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Engine-side note about a degraded extraction (empty when clean).
    #[serde(default)]
    pub error: Option<String>,
}

/// Summary the engine prints on stdout. Informational only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSummary {
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub suggested_collection: Option<String>,
}

pub trait OutputContract: Send + Sync {
    fn version(&self) -> &'static str;

    /// Artifact locations for an engine run against `input`.
    fn locations(&self, input: &Path) -> ArtifactLocations;

    fn read_text(&self, path: &Path) -> Result<TextArtifact, PipelineError>;

    fn read_fields(&self, path: &Path) -> Result<FieldMap, PipelineError>;
}

/// v1: both artifacts are JSON files written next to the input file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractV1;

impl OutputContract for ContractV1 {
    fn version(&self) -> &'static str {
        "v1"
    }

    fn locations(&self, input: &Path) -> ArtifactLocations {
        let dir = input.parent().unwrap_or_else(|| Path::new("."));
        ArtifactLocations {
            text: dir.join(TEXT_ARTIFACT),
            fields: dir.join(FIELDS_ARTIFACT),
        }
    }

    fn read_text(&self, path: &Path) -> Result<TextArtifact, PipelineError> {
        let raw = read_artifact(TEXT_ARTIFACT, path)?;
        serde_json::from_str(&raw).map_err(|e| PipelineError::MalformedOutput {
            artifact: TEXT_ARTIFACT,
            reason: e.to_string(),
        })
    }

    fn read_fields(&self, path: &Path) -> Result<FieldMap, PipelineError> {
        let raw = read_artifact(FIELDS_ARTIFACT, path)?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| PipelineError::MalformedOutput {
                artifact: FIELDS_ARTIFACT,
                reason: e.to_string(),
            })?;

        match value {
            serde_json::Value::Object(map) => {
                if let Some(tag) = map.get(DOCUMENT_TYPE_KEY) {
                    if !tag.is_string() {
                        return Err(PipelineError::MalformedOutput {
                            artifact: FIELDS_ARTIFACT,
                            reason: format!("{DOCUMENT_TYPE_KEY} must be a string, got {tag}"),
                        });
                    }
                }
                Ok(map)
            }
            other => Err(PipelineError::MalformedOutput {
                artifact: FIELDS_ARTIFACT,
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }
}

fn read_artifact(artifact: &'static str, path: &Path) -> Result<String, PipelineError> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => PipelineError::MissingOutput {
            artifact,
            path: path.to_path_buf(),
        },
        ErrorKind::InvalidData => PipelineError::MalformedOutput {
            artifact,
            reason: "not valid UTF-8".into(),
        },
        _ => PipelineError::storage(path, e),
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Remove artifacts left by an earlier run in the same directory.
pub fn clear_artifacts(locations: &ArtifactLocations) -> Result<(), PipelineError> {
    for path in [&locations.text, &locations.fields] {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::storage(path, e)),
        }
    }
    Ok(())
}

/// Parse the engine's stdout summary: the last line that is a JSON object.
pub fn parse_engine_summary(stdout: &str) -> Option<EngineSummary> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}
