//! ocr-intake CLI
//!
//! Usage:
//!   ocr-intake --actor ID --role ROLE submit <FILE>   Extract a document into the review queue
//!   ocr-intake list [--state pending]                 List stored results (JSON lines)
//!   ocr-intake show <ID>                              Show one result
//!   ocr-intake --actor ID --role ROLE approve <ID>    Promote a result into its collection
//!   ocr-intake --actor ID --role ROLE reject <ID>     Discard a pending result
//!   ocr-intake cleanup                                Remove stale attempt directories
//!
//! Engine, deadline, storage locations and retention come from the
//! `OCR_INTAKE_*` environment variables.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use ocr_intake_lib::config::{self, ConfigError, IntakeConfig};
use ocr_intake_lib::db::repository::{ResultFilter, SqliteResultStore, SqliteTargetSink};
use ocr_intake_lib::db::{Database, DatabaseError};
use ocr_intake_lib::models::{Actor, ReviewState, Role};
use ocr_intake_lib::pipeline::{IntakeProcessor, PipelineError};

#[derive(Parser, Debug)]
#[command(name = config::APP_NAME, version = config::APP_VERSION, about = "OCR document intake and review")]
struct Cli {
    /// Identity recorded as uploader or reviewer.
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    /// Role of the caller (admin, hr, finance, legal, engineer).
    #[arg(long, global = true, default_value = "admin")]
    role: Role,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a document through the extraction engine.
    Submit {
        file: PathBuf,
        /// MIME type; guessed from the file extension when omitted.
        #[arg(long)]
        content_type: Option<String>,
    },
    /// List stored results, oldest first.
    List {
        #[arg(long)]
        state: Option<ReviewState>,
        #[arg(long)]
        uploaded_by: Option<String>,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Show one result.
    Show { id: Uuid },
    /// Approve a pending result into its target collection.
    Approve { id: Uuid },
    /// Reject (delete) a pending result.
    Reject { id: Uuid },
    /// Remove attempt directories left behind by crashed runs.
    Cleanup,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Cannot read {}: {source}", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot encode output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Pipeline(e) => e.kind(),
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Input { .. } => "INPUT_ERROR",
            Self::Output(_) => "OUTPUT_ERROR",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    ocr_intake_lib::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error[{}]: {e}", e.kind());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = IntakeConfig::from_env()?;
    tracing::debug!(
        version = config::APP_VERSION,
        engine = %config.engine.display(),
        db = %config.database_path.display(),
        "Configuration loaded"
    );

    let db = Arc::new(Database::open(&config.database_path)?);
    let processor = IntakeProcessor::from_config(
        &config,
        Arc::new(SqliteResultStore::new(db.clone())),
        Arc::new(SqliteTargetSink::new(db)),
    );
    let actor = Actor::new(cli.actor, cli.role);

    match cli.command {
        Command::Submit { file, content_type } => {
            let bytes = tokio::fs::read(&file).await.map_err(|source| CliError::Input {
                path: file.clone(),
                source,
            })?;
            let content_type = content_type.unwrap_or_else(|| content_type_for(&file).to_string());
            let result = processor.submit(&bytes, &content_type, &actor).await?;
            print_json(&result)?;
        }
        Command::List {
            state,
            uploaded_by,
            collection,
        } => {
            let filter = ResultFilter {
                state,
                uploaded_by,
                suggested_collection: collection,
            };
            for result in processor.list(filter) {
                println!("{}", serde_json::to_string(&result.map_err(PipelineError::from)?)?);
            }
        }
        Command::Show { id } => print_json(&processor.get(&id)?)?,
        Command::Approve { id } => print_json(&processor.approve(&id, &actor)?)?,
        Command::Reject { id } => {
            processor.reject(&id, &actor)?;
            print_json(&serde_json::json!({ "id": id, "rejected": true }))?;
        }
        Command::Cleanup => {
            let removed = processor.sweep_orphaned_staging();
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
